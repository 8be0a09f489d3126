use crate::common::*;

use matrix_param::{GammaVector, GaussianMoments, Inference, TwoStatParam};
use matrix_util::dmatrix_util::{robust_inverse, trace_product};
use matrix_util::traits::SubsetOps;
use serde::Serialize;

/// One shared precision over a block of parameters.
///
/// The unit prior of the block is `N(mean, Q / τ)` with `Q` the template
/// covariance and `τ ~ Gamma(a, b)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HyperBlock {
    /// mean and covariance `Q` before precision scaling
    pub template: GaussianMoments,
    /// a single Gamma(a, b) with the prior (a0, b0) kept inside
    pub precision: GammaVector,
    /// coordinates with non-zero template variance
    active: Vec<usize>,
}

impl HyperBlock {
    pub fn new(template: GaussianMoments, a0: f64, b0: f64) -> anyhow::Result<Self> {
        anyhow::ensure!(
            a0.is_finite() && b0.is_finite() && a0 > 0.0 && b0 > 0.0,
            "hyperprior must be a proper Gamma, got ({}, {})",
            a0,
            b0
        );
        let active = template.active_indices();
        Ok(Self {
            template,
            precision: GammaVector::new(1, a0, b0),
            active,
        })
    }

    /// number of active parameters
    pub fn num_active(&self) -> usize {
        self.active.len()
    }

    pub fn shape(&self) -> f64 {
        self.precision.shape()[0]
    }

    pub fn rate(&self) -> f64 {
        self.precision.rate()[0]
    }

    pub fn prior_shape(&self) -> f64 {
        self.precision.prior_shape()[0]
    }

    pub fn prior_rate(&self) -> f64 {
        self.precision.prior_rate()[0]
    }

    /// `(b/a) Q`, the prior covariance to invert the unit with
    pub fn effective_prior(&self) -> GaussianMoments {
        let scale = self.precision.posterior_mean_inverse()[0];
        GaussianMoments {
            mean: self.template.mean.clone(),
            cov: &self.template.cov * scale,
        }
    }

    /// `a = a0 + n/2`, `b = b0 + (d' Q⁻¹ d + tr(Q⁻¹ Σ)) / 2` over the
    /// active set, where `d` is the posterior minus prior mean
    pub fn update(&mut self, posterior: &GaussianMoments, deviation: &DVec) -> anyhow::Result<()> {
        let n = self.template.len();
        anyhow::ensure!(
            posterior.len() == n && deviation.len() == n,
            "posterior ({}) and deviation ({}) do not match the block size {}",
            posterior.len(),
            deviation.len(),
            n
        );

        let iq = robust_inverse(&self.template.cov.subset(&self.active));
        let dd = deviation.subset(&self.active);
        let ss = posterior.cov.subset(&self.active);

        let quad = dd.dot(&(&iq * &dd)) + trace_product(&iq, &ss);

        self.precision.update_stat(
            &DVec::from_element(1, 0.5 * self.active.len() as f64),
            &DVec::from_element(1, 0.5 * quad),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_update_closed_form() -> anyhow::Result<()> {
        let mut q = Mat::identity(3, 3) * 2.0;
        q[(2, 2)] = 0.0;
        let template = GaussianMoments::new(DVec::zeros(3), q)?;
        let mut block = HyperBlock::new(template, 1.0, 0.5)?;
        assert_eq!(block.num_active(), 2);

        let posterior = GaussianMoments::new(
            DVec::from_vec(vec![1.0, -2.0, 0.0]),
            Mat::from_diagonal(&DVec::from_vec(vec![0.4, 0.6, 0.0])),
        )?;
        let deviation = posterior.mean.clone();
        block.update(&posterior, &deviation)?;

        // d'Q⁻¹d = (1 + 4)/2, tr(Q⁻¹Σ) = (0.4 + 0.6)/2
        assert_abs_diff_eq!(block.shape(), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(block.rate(), 0.5 + 0.5 * 3.0, epsilon = 1e-12);

        let eff = block.effective_prior();
        assert_abs_diff_eq!(eff.cov[(0, 0)], 2.0 * 2.0 / 2.0, epsilon = 1e-12);
        assert_eq!(eff.cov[(2, 2)], 0.0);

        // the rate is recomputed from the prior each time
        block.update(&posterior, &deviation)?;
        assert_abs_diff_eq!(block.rate(), 2.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_effective_prior_at_hyperprior() -> anyhow::Result<()> {
        let block = HyperBlock::new(GaussianMoments::standard(2), 4.0, 2.0)?;
        assert_eq!(block.effective_prior().cov, Mat::identity(2, 2) * 0.5);
        assert!(HyperBlock::new(GaussianMoments::standard(2), 0.0, 2.0).is_err());
        Ok(())
    }
}
