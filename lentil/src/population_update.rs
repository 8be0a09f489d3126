use crate::blocks::{BlockDescriptor, BlockMap, BlockRegistry};
use crate::common::*;
use crate::engine::UnitFit;
use crate::population::PopulationBlock;

use matrix_param::{GaussianMoments, Inference, TwoStatParam};
use matrix_util::dmatrix_util::{robust_inverse, symmetrize};
use matrix_util::traits::SubsetOps;

/// Conjugate update of every population block from the unit posteriors
pub fn update_population(
    population: &mut BlockMap<PopulationBlock>,
    registry: &BlockRegistry,
    fits: &[UnitFit],
) -> anyhow::Result<()> {
    for desc in registry.iter() {
        let posteriors = fits
            .iter()
            .map(|fit| fit.block(desc.tag))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let block = population
            .get_mut(&desc.tag)
            .ok_or(anyhow::anyhow!("{}: no population block", desc.tag))?;

        update_population_block(block, desc, &posteriors)?;
    }
    Ok(())
}

/// Update one population block in place.
///
/// Random effects: Gaussian mean and Gamma precision by conjugacy, using
/// the expected precision `a/b` before this update. The Gamma rate takes
/// the unit residuals around the updated mean, which together with the
/// `ns diag(V)` term is the expected squared deviation under q.
///
/// Fixed effects: the full unit precisions over the active set are summed
/// (information-form pooling) and the pooled covariance is then restricted
/// to the fixed coordinates. No population variance is learned for them.
///
/// Inactive coordinates keep their prior values.
pub fn update_population_block(
    block: &mut PopulationBlock,
    desc: &BlockDescriptor,
    unit_posteriors: &[&GaussianMoments],
) -> anyhow::Result<()> {
    let ns = unit_posteriors.len();
    anyhow::ensure!(ns > 0, "{}: no unit posteriors", desc.tag);
    anyhow::ensure!(
        block.len() == desc.dim,
        "{}: population block has {} parameters, expected {}",
        desc.tag,
        block.len(),
        desc.dim
    );
    for post in unit_posteriors {
        anyhow::ensure!(
            post.len() == desc.dim,
            "{}: unit posterior has {} parameters, expected {}",
            desc.tag,
            post.len(),
            desc.dim
        );
    }

    let active = desc.active_indices();
    let position_in_active = |idx: &[usize]| -> Vec<usize> {
        idx.iter()
            .filter_map(|i| active.iter().position(|a| a == i))
            .collect()
    };

    if !desc.random.is_empty() {
        let rfx = &desc.random;
        let nr = rfx.len();

        let iv0 = robust_inverse(&block.prior.cov.subset(&active)).subset(&position_in_active(rfx));
        let m0 = block.prior.mean.subset(rfx);
        let iq = block.precision.posterior_mean().subset(rfx);

        let mut sm = DVec::zeros(nr);
        for post in unit_posteriors {
            sm += post.mean.subset(rfx);
        }

        let vv = symmetrize(&robust_inverse(
            &(&iv0 + Mat::from_diagonal(&iq) * ns as f64),
        ));
        let mm = &vv * (&iv0 * &m0 + iq.component_mul(&sm));

        // spread of the units around the updated population mean
        let mut sv = DVec::zeros(nr);
        for post in unit_posteriors {
            let ei = post.mean.subset(rfx) - &mm;
            sv += ei.component_mul(&ei) + post.cov.subset(rfx).diagonal();
        }

        let add_a = DVec::from_element(nr, 0.5 * ns as f64);
        let add_b = (sv + vv.diagonal() * ns as f64) * 0.5;

        block.posterior.mean.assign_subset(rfx, &mm);
        block.posterior.cov.assign_subset(rfx, &vv);
        block.precision.update_stat_at(rfx, &add_a, &add_b);
    }

    if !desc.fixed.is_empty() {
        let ffx = &desc.fixed;
        let ffx_pos = position_in_active(ffx);
        let k = active.len();

        let mut wsm = DVec::zeros(k);
        let mut sp = Mat::zeros(k, k);
        for post in unit_posteriors {
            let pi = robust_inverse(&post.cov.subset(&active));
            wsm += &pi * post.mean.subset(&active);
            sp += pi;
        }

        let vv = symmetrize(&robust_inverse(&sp).subset(&ffx_pos));
        let mm = &vv * wsm.subset(&ffx_pos);

        block.posterior.mean.assign_subset(ffx, &mm);
        block.posterior.cov.assign_subset(ffx, &vv);
    }

    // the two sub-blocks are estimated separately
    for &i in desc.random.iter() {
        for &j in desc.fixed.iter() {
            block.posterior.cov[(i, j)] = 0.0;
            block.posterior.cov[(j, i)] = 0.0;
        }
    }

    debug!(
        "{}: population update over {} units ({} random, {} fixed)",
        desc.tag,
        ns,
        desc.random.len(),
        desc.fixed.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::BlockTag;
    use crate::effects::FIXED_EFFECT;
    use crate::population::PopulationPrior;
    use approx::assert_abs_diff_eq;

    fn scalar(mean: f64, var: f64) -> GaussianMoments {
        GaussianMoments::new(DVec::from_element(1, mean), Mat::from_element(1, 1, var)).unwrap()
    }

    fn scalar_block(
        m0: f64,
        v0: f64,
        a0: f64,
        b0: f64,
    ) -> anyhow::Result<(PopulationBlock, BlockDescriptor)> {
        let prior = PopulationPrior::new(
            scalar(m0, v0),
            DVec::from_element(1, a0),
            DVec::from_element(1, b0),
        )?;
        let mut priors = BlockMap::new();
        priors.insert(BlockTag::Observation, prior.clone());
        let registry = BlockRegistry::from_population_priors(&priors)?;
        let desc = registry
            .get(BlockTag::Observation)
            .cloned()
            .ok_or(anyhow::anyhow!("missing"))?;
        Ok((PopulationBlock::from_prior(&prior)?, desc))
    }

    #[test]
    fn test_fixed_effect_pooling() -> anyhow::Result<()> {
        let (mut block, desc) = scalar_block(0.0, 1.0, FIXED_EFFECT.0, FIXED_EFFECT.1)?;
        assert_eq!(desc.fixed, vec![0]);

        let units = [scalar(2.0, 0.25), scalar(4.0, 1.0)];
        update_population_block(&mut block, &desc, &units.iter().collect::<Vec<_>>())?;

        assert_abs_diff_eq!(block.posterior.mean[0], 2.4, epsilon = 1e-12);
        assert_abs_diff_eq!(block.posterior.cov[(0, 0)], 0.2, epsilon = 1e-12);
        // no population variance for fixed effects
        assert!(block.precision.shape()[0].is_infinite());
        assert_eq!(block.precision.rate()[0], 0.0);
        Ok(())
    }

    #[test]
    fn test_three_units_closed_form() -> anyhow::Result<()> {
        let (mut block, desc) = scalar_block(0.0, 1.0, 1.0, 1.0)?;
        let units = [scalar(1.8, 0.1), scalar(2.1, 0.1), scalar(2.3, 0.1)];
        update_population_block(&mut block, &desc, &units.iter().collect::<Vec<_>>())?;

        // V = 1/(1 + 3), m = V (0 + 6.2)
        // sv = 0.25² + 0.55² + 0.75² + 0.3 around the new mean 1.55
        let mean = block.posterior.mean[0];
        assert!(mean > 0.0 && mean < 6.2 / 3.0);
        assert_abs_diff_eq!(mean, 1.55, epsilon = 1e-9);
        assert_abs_diff_eq!(block.posterior.cov[(0, 0)], 0.25, epsilon = 1e-9);
        assert_abs_diff_eq!(block.precision.shape()[0], 2.5, epsilon = 1e-9);
        assert_abs_diff_eq!(block.precision.rate()[0], 1.0 + 0.5 * (1.2275 + 0.75), epsilon = 1e-9);

        // a second update starts from the prior statistics again
        update_population_block(&mut block, &desc, &units.iter().collect::<Vec<_>>())?;
        assert_abs_diff_eq!(block.precision.shape()[0], 2.5, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_single_unit_flat_prior() -> anyhow::Result<()> {
        let unit = scalar(3.7, 0.5);
        let mut errors = vec![];
        for v0 in [1e2, 1e6, 1e10] {
            let (mut block, desc) = scalar_block(-5.0, v0, 1.0, 1.0)?;
            update_population_block(&mut block, &desc, &[&unit])?;
            errors.push((block.posterior.mean[0] - 3.7).abs());
        }
        assert!(errors[0] > errors[1] && errors[1] > errors[2]);
        assert!(errors[2] < 1e-8);
        Ok(())
    }

    #[test]
    fn test_mixed_block() -> anyhow::Result<()> {
        // [random, fixed, inactive]
        let mut prior = PopulationPrior::standard(3);
        prior.gaussian.mean[2] = 9.0;
        prior.gaussian.cov[(2, 2)] = 0.0;
        prior.shape[1] = FIXED_EFFECT.0;
        prior.rate[1] = FIXED_EFFECT.1;

        let mut priors = BlockMap::new();
        priors.insert(BlockTag::Evolution, prior.clone());
        let registry = BlockRegistry::from_population_priors(&priors)?;
        let mut population = BlockMap::new();
        population.insert(BlockTag::Evolution, PopulationBlock::from_prior(&prior)?);

        let unit = |m: [f64; 3]| {
            let mut cov = Mat::identity(3, 3) * 0.5;
            cov[(0, 1)] = 0.1;
            cov[(1, 0)] = 0.1;
            cov[(2, 2)] = 0.0;
            GaussianMoments::new(DVec::from_vec(m.to_vec()), cov).unwrap()
        };
        let u1 = unit([1.0, 2.0, 9.0]);
        let u2 = unit([3.0, 2.0, 9.0]);

        let desc = registry.get(BlockTag::Evolution).cloned().unwrap();
        let block = population.get_mut(&BlockTag::Evolution).unwrap();
        update_population_block(block, &desc, &[&u1, &u2])?;

        // inactive entries untouched
        assert_eq!(block.posterior.mean[2], 9.0);
        assert_eq!(block.posterior.cov[(2, 2)], 0.0);
        assert_eq!(block.precision.shape()[2], 1.0);

        // fixed: pooled covariance restricted first, then applied to the
        // fixed part of Σ P_i m_i (the joint pooled mean would be 2.0)
        assert_abs_diff_eq!(block.posterior.cov[(1, 1)], 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(block.posterior.mean[1], 5.0 / 3.0, epsilon = 1e-12);
        assert_eq!(block.posterior.cov[(0, 1)], 0.0);

        // random: V = 1/(1 + 2), m = V * 4
        assert_abs_diff_eq!(block.posterior.mean[0], 4.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(block.precision.shape()[0], 2.0, epsilon = 1e-12);
        // residuals around 4/3: (1/9 + 25/9) + 2 * 0.5, plus 2 * V
        assert_abs_diff_eq!(block.precision.rate()[0], 59.0 / 18.0, epsilon = 1e-12);
        Ok(())
    }
}
