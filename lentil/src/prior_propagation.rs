use crate::blocks::{BlockDescriptor, BlockMap, BlockRegistry};
use crate::hyper_update::HyperBlock;
use crate::common::*;
use crate::population::PopulationBlock;

use matrix_param::{GaussianMoments, Inference, TwoStatParam};
use matrix_util::traits::SubsetOps;

/// Unit priors of the first pass.
///
/// Each unit starts from the population prior with its covariance
/// inflated by `n_units`; the random effects are then set from the
/// population prior itself, as if it were the current posterior.
pub fn build_unit_priors(
    population: &BlockMap<PopulationBlock>,
    registry: &BlockRegistry,
    n_units: usize,
) -> anyhow::Result<BlockMap<GaussianMoments>> {
    anyhow::ensure!(n_units > 0, "no units");

    let mut unit_priors = BlockMap::new();
    let mut at_prior = BlockMap::new();

    for desc in registry.iter() {
        let block = population
            .get(&desc.tag)
            .ok_or(anyhow::anyhow!("{}: no population block", desc.tag))?;

        unit_priors.insert(
            desc.tag,
            GaussianMoments::new(block.prior.mean.clone(), &block.prior.cov * n_units as f64)?,
        );

        let mut state = block.clone();
        state.posterior = state.prior.clone();
        state.precision.reset_stat();
        at_prior.insert(desc.tag, state);
    }

    refresh_unit_priors(&mut unit_priors, &at_prior, registry)?;
    Ok(unit_priors)
}

/// Pull the random effects of the unit priors toward the current
/// population posterior: mean `mu`, and `diag(b/a)` over the random-effect
/// sub-block. Fixed-effect entries, including their covariance with the
/// random effects, keep the scaled population prior.
pub fn refresh_unit_priors(
    unit_priors: &mut BlockMap<GaussianMoments>,
    population: &BlockMap<PopulationBlock>,
    registry: &BlockRegistry,
) -> anyhow::Result<()> {
    for desc in registry.iter() {
        let block = population
            .get(&desc.tag)
            .ok_or(anyhow::anyhow!("{}: no population block", desc.tag))?;
        let prior = unit_priors
            .get_mut(&desc.tag)
            .ok_or(anyhow::anyhow!("{}: no unit prior", desc.tag))?;
        refresh_block(prior, block, desc)?;
    }
    Ok(())
}

fn refresh_block(
    prior: &mut GaussianMoments,
    block: &PopulationBlock,
    desc: &BlockDescriptor,
) -> anyhow::Result<()> {
    anyhow::ensure!(
        prior.len() == desc.dim && block.len() == desc.dim,
        "{}: unit prior ({}) and population ({}) dimensions differ",
        desc.tag,
        prior.len(),
        block.len()
    );

    let rfx = &desc.random;
    let expected_var = block.precision.posterior_mean_inverse().subset(rfx);

    prior.mean.assign_subset(rfx, &block.posterior.mean.subset(rfx));
    prior.cov.assign_subset(rfx, &Mat::from_diagonal(&expected_var));
    Ok(())
}

/// Unit priors of the hyperparameter variant: each block's template
/// covariance scaled by its expected prior variance `b/a`
pub fn rescale_unit_priors(
    unit_priors: &mut BlockMap<GaussianMoments>,
    hyper: &BlockMap<HyperBlock>,
) {
    for (&tag, block) in hyper.iter() {
        unit_priors.insert(tag, block.effective_prior());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::BlockTag;
    use crate::effects::FIXED_EFFECT;
    use crate::population::PopulationPrior;
    use approx::assert_abs_diff_eq;

    /// phi: [random, fixed, random], theta: [inactive, random]
    fn setup() -> anyhow::Result<(BlockMap<PopulationBlock>, BlockRegistry)> {
        let mut phi = PopulationPrior::standard(3);
        phi.gaussian.mean = DVec::from_vec(vec![0.5, -1.0, 2.0]);
        phi.gaussian.cov[(0, 1)] = 0.3;
        phi.gaussian.cov[(1, 0)] = 0.3;
        phi.shape = DVec::from_vec(vec![2.0, FIXED_EFFECT.0, 3.0]);
        phi.rate = DVec::from_vec(vec![4.0, FIXED_EFFECT.1, 1.5]);

        let mut theta = PopulationPrior::standard(2);
        theta.gaussian.cov[(0, 0)] = 0.0;

        let mut priors = BlockMap::new();
        priors.insert(BlockTag::Observation, phi);
        priors.insert(BlockTag::Evolution, theta);

        let registry = BlockRegistry::from_population_priors(&priors)?;
        let mut population = BlockMap::new();
        for (&tag, prior) in priors.iter() {
            population.insert(tag, PopulationBlock::from_prior(prior)?);
        }
        Ok((population, registry))
    }

    #[test]
    fn test_build() -> anyhow::Result<()> {
        let (population, registry) = setup()?;
        let priors = build_unit_priors(&population, &registry, 4)?;

        let phi = &priors[&BlockTag::Observation];
        assert_eq!(phi.mean.as_slice(), &[0.5, -1.0, 2.0]);
        // random: b0/a0
        assert_eq!(phi.cov[(0, 0)], 2.0);
        assert_eq!(phi.cov[(2, 2)], 0.5);
        // fixed: population prior (co)variance x n_units
        assert_eq!(phi.cov[(1, 1)], 4.0);
        assert_eq!(phi.cov[(0, 1)], 0.3 * 4.0);
        assert_eq!(phi.cov[(1, 0)], 0.3 * 4.0);

        let theta = &priors[&BlockTag::Evolution];
        assert_eq!(theta.cov[(0, 0)], 0.0);
        assert_eq!(theta.cov[(1, 1)], 1.0);
        Ok(())
    }

    #[test]
    fn test_random_block_is_diagonal_cross_terms_kept() -> anyhow::Result<()> {
        // [random, fixed, random] with correlated prior
        let mut prior = PopulationPrior::standard(3);
        prior.gaussian.cov = Mat::from_row_slice(3, 3, &[1.0, 0.5, 0.2, 0.5, 1.0, 0.4, 0.2, 0.4, 1.0]);
        prior.shape = DVec::from_vec(vec![2.0, FIXED_EFFECT.0, 3.0]);
        prior.rate = DVec::from_vec(vec![4.0, FIXED_EFFECT.1, 1.5]);

        let mut priors = BlockMap::new();
        priors.insert(BlockTag::Evolution, prior.clone());
        let registry = BlockRegistry::from_population_priors(&priors)?;
        let mut population = BlockMap::new();
        population.insert(BlockTag::Evolution, PopulationBlock::from_prior(&prior)?);

        let built = build_unit_priors(&population, &registry, 3)?;
        let cov = &built[&BlockTag::Evolution].cov;

        // rfx x rfx: diag(b/a), no correlation left between random effects
        assert_eq!(cov[(0, 0)], 2.0);
        assert_eq!(cov[(2, 2)], 0.5);
        assert_eq!(cov[(0, 2)], 0.0);
        assert_eq!(cov[(2, 0)], 0.0);

        // anything touching the fixed effect stays at n_units x V0
        assert_eq!(cov[(1, 1)], 3.0);
        assert_abs_diff_eq!(cov[(0, 1)], 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(cov[(1, 0)], 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(cov[(1, 2)], 1.2, epsilon = 1e-12);
        assert_abs_diff_eq!(cov[(2, 1)], 1.2, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_refresh_at_prior_round_trip() -> anyhow::Result<()> {
        let (population, registry) = setup()?;
        let built = build_unit_priors(&population, &registry, 4)?;

        let mut refreshed = built.clone();
        refresh_unit_priors(&mut refreshed, &population, &registry)?;
        assert_eq!(refreshed, built);
        Ok(())
    }

    #[test]
    fn test_fixed_effects_ignore_posterior() -> anyhow::Result<()> {
        let (mut population, registry) = setup()?;
        let built = build_unit_priors(&population, &registry, 4)?;

        let phi = population.get_mut(&BlockTag::Observation).unwrap();
        phi.posterior.mean = DVec::from_vec(vec![10.0, 20.0, 30.0]);
        phi.posterior.cov = Mat::from_element(3, 3, 7.0);
        phi.precision.update_stat_at(
            &[0, 2],
            &DVec::from_vec(vec![1.0, 1.0]),
            &DVec::from_vec(vec![5.0, 0.5]),
        );

        let mut refreshed = built.clone();
        refresh_unit_priors(&mut refreshed, &population, &registry)?;

        let before = &built[&BlockTag::Observation];
        let after = &refreshed[&BlockTag::Observation];
        assert_eq!(after.mean[1], before.mean[1]);
        assert_eq!(after.cov[(1, 1)], before.cov[(1, 1)]);
        assert_eq!(after.cov[(0, 1)], before.cov[(0, 1)]);

        assert_eq!(after.mean[0], 10.0);
        assert_eq!(after.mean[2], 30.0);
        assert_eq!(after.cov[(0, 0)], 9.0 / 3.0);
        assert_eq!(after.cov[(2, 2)], 2.0 / 4.0);
        Ok(())
    }
}
