use crate::blocks::{BlockDescriptor, BlockMap, BlockRegistry};
use crate::common::*;
use crate::engine::UnitFit;
use crate::hyper_update::HyperBlock;
use crate::population::PopulationBlock;

use matrix_param::{gamma_entropy, gamma_kl_moments, gaussian_entropy};
use matrix_util::dmatrix_util::{log_det, robust_inverse, trace_product};
use matrix_util::traits::SubsetOps;
use special::Gamma as SpecialGamma;

/// Free energy of the group model: the unit free energies plus one
/// correction per population block for the population level
pub fn group_free_energy(
    fits: &[UnitFit],
    population: &BlockMap<PopulationBlock>,
    registry: &BlockRegistry,
) -> anyhow::Result<f64> {
    let ns = fits.len();
    let mut ret: f64 = fits.iter().map(|f| f.free_energy()).sum();

    for desc in registry.iter() {
        let block = population
            .get(&desc.tag)
            .ok_or(anyhow::anyhow!("{}: no population block", desc.tag))?;
        ret += group_block_correction(block, desc, ns);
    }
    Ok(ret)
}

/// Population-level correction of one block, over its random effects.
///
/// ```text
///   -0.5 ns Σ ln(a/b)
///   + Σ (a0 + 0.5 ns - 1)(ψ(a) - ln b)
///   - Σ (0.5 ns diag(V) + b0)(a/b)
///   + Σ (a0 ln b0 + ln Γ(b0))
///   - 0.5 n ln 2π - 0.5 ln|V0|
///   - 0.5 e' V0⁻¹ e - 0.5 tr(V0⁻¹ V)
///   + Σ H[Gamma(a, 1/b)] + H[N(., V)]
///   + 0.5 (ns - 1) nffx ln 2π
/// ```
///
/// with `e = mu - mu0` and `n`, `nffx` the number of random and fixed
/// active parameters.
pub fn group_block_correction(block: &PopulationBlock, desc: &BlockDescriptor, ns: usize) -> f64 {
    let rfx = &desc.random;
    let n = rfx.len() as f64;
    let ns = ns as f64;
    let nffx = desc.fixed.len() as f64;

    let a = block.precision.shape().subset(rfx);
    let b = block.precision.rate().subset(rfx);
    let a0 = block.precision.prior_shape().subset(rfx);
    let b0 = block.precision.prior_rate().subset(rfx);

    let vv = block.posterior.cov.subset(rfx);
    let v0 = block.prior.cov.subset(rfx);
    let iv0 = robust_inverse(&v0);
    let ee = block.posterior.mean.subset(rfx) - block.prior.mean.subset(rfx);
    let diag_v = vv.diagonal();

    let mut ret = 0.0;
    for k in 0..rfx.len() {
        let (a, b, a0, b0) = (a[k], b[k], a0[k], b0[k]);
        let e_ln_tau = a.digamma() - b.ln();
        ret += -0.5 * ns * (a / b).ln();
        ret += (a0 + 0.5 * ns - 1.0) * e_ln_tau;
        ret -= (0.5 * ns * diag_v[k] + b0) * (a / b);
        ret += a0 * b0.ln() + SpecialGamma::ln_gamma(b0).0;
        ret += gamma_entropy(a, 1.0 / b);
    }

    ret -= 0.5 * n * LN_2PI + 0.5 * log_det(&v0);
    ret -= 0.5 * ee.dot(&(&iv0 * &ee)) + 0.5 * trace_product(&iv0, &vv);
    ret += gaussian_entropy(&vv);
    ret += 0.5 * (ns - 1.0) * nffx * LN_2PI;
    ret
}

/// Free energy of the hyperparameter model: the unit free energy plus one
/// correction per block precision
pub fn hyper_free_energy(fit: &UnitFit, hyper: &BlockMap<HyperBlock>) -> f64 {
    fit.free_energy()
        + hyper
            .values()
            .map(|h| {
                hyper_block_correction(
                    h.shape(),
                    h.rate(),
                    h.prior_shape(),
                    h.prior_rate(),
                    h.num_active(),
                )
            })
            .sum::<f64>()
}

/// `0.5 n (E[ln τ] - ln E[τ]) - KL(Gamma(a, b) || Gamma(a0, b0))`
///
/// The unit was inverted under the plug-in precision `E[τ] = a/b`; the
/// first term moves its log prior normaliser to the expectation under q.
pub fn hyper_block_correction(a: f64, b: f64, a0: f64, b0: f64, n: usize) -> f64 {
    let mean = a / b;
    let mean0 = a0 / b0;
    let kl = gamma_kl_moments(mean, mean / b, mean0, mean0 / b0);
    0.5 * n as f64 * (a.digamma() - b.ln() - mean.ln()) - kl
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::BlockTag;
    use crate::effects::FIXED_EFFECT;
    use crate::population::PopulationPrior;
    use approx::assert_abs_diff_eq;
    use matrix_param::{GaussianMoments, TwoStatParam};

    fn scalar_population(
        a0: f64,
        b0: f64,
    ) -> anyhow::Result<(BlockMap<PopulationBlock>, BlockRegistry)> {
        let prior = PopulationPrior::new(
            GaussianMoments::new(DVec::from_element(1, 1.0), Mat::from_element(1, 1, 2.0))?,
            DVec::from_element(1, a0),
            DVec::from_element(1, b0),
        )?;
        let mut priors = BlockMap::new();
        priors.insert(BlockTag::Observation, prior.clone());
        let registry = BlockRegistry::from_population_priors(&priors)?;
        let mut population = BlockMap::new();
        population.insert(BlockTag::Observation, PopulationBlock::from_prior(&prior)?);
        Ok((population, registry))
    }

    /// the scalar formula written out term by term
    #[allow(clippy::too_many_arguments)]
    fn scalar_correction(a: f64, b: f64, a0: f64, b0: f64, m: f64, m0: f64, v: f64, v0: f64, ns: f64) -> f64 {
        let e = m - m0;
        -0.5 * ns * (a / b).ln() + (a0 + 0.5 * ns - 1.0) * (a.digamma() - b.ln())
            - (0.5 * ns * v + b0) * (a / b)
            + a0 * b0.ln()
            + SpecialGamma::ln_gamma(b0).0
            - 0.5 * LN_2PI
            - 0.5 * v0.ln()
            - 0.5 * e * e / v0
            - 0.5 * v / v0
            + gamma_entropy(a, 1.0 / b)
            + 0.5 * (1.0 + LN_2PI)
            + 0.5 * v.ln()
    }

    #[test]
    fn test_scalar_group_correction() -> anyhow::Result<()> {
        let (mut population, registry) = scalar_population(1.5, 2.0)?;
        let desc = registry.get(BlockTag::Observation).unwrap();

        let at_prior = group_block_correction(&population[&BlockTag::Observation], desc, 4);
        assert_abs_diff_eq!(
            at_prior,
            scalar_correction(1.5, 2.0, 1.5, 2.0, 1.0, 1.0, 2.0, 2.0, 4.0),
            epsilon = 1e-10
        );

        let block = population.get_mut(&BlockTag::Observation).unwrap();
        block.posterior.mean[0] = 1.7;
        block.posterior.cov[(0, 0)] = 0.3;
        block.precision.update_stat_at(
            &[0],
            &DVec::from_element(1, 2.0),
            &DVec::from_element(1, 3.5),
        );
        let updated = group_block_correction(&population[&BlockTag::Observation], desc, 4);
        assert_abs_diff_eq!(
            updated,
            scalar_correction(3.5, 5.5, 1.5, 2.0, 1.7, 1.0, 0.3, 2.0, 4.0),
            epsilon = 1e-10
        );
        Ok(())
    }

    #[test]
    fn test_all_fixed_block() -> anyhow::Result<()> {
        let (population, registry) = scalar_population(FIXED_EFFECT.0, FIXED_EFFECT.1)?;
        let desc = registry.get(BlockTag::Observation).unwrap();
        let block = &population[&BlockTag::Observation];
        assert_abs_diff_eq!(group_block_correction(block, desc, 3), LN_2PI, epsilon = 1e-12);
        assert_abs_diff_eq!(group_block_correction(block, desc, 1), 0.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_hyper_correction() {
        // at the prior only the plug-in term remains
        let (a, b) = (3.0_f64, 2.0_f64);
        assert_abs_diff_eq!(
            hyper_block_correction(a, b, a, b, 4),
            2.0 * (a.digamma() - a.ln()),
            epsilon = 1e-10
        );

        // E[ln τ] <= ln E[τ] and KL >= 0
        assert!(hyper_block_correction(5.0, 1.5, 1.0, 1.0, 3) < 0.0);
        assert_abs_diff_eq!(
            hyper_block_correction(2.0, 1.0, 1.0, 1.0, 0),
            -matrix_param::gamma_kl(2.0, 1.0, 1.0, 1.0),
            epsilon = 1e-12
        );
    }
}
