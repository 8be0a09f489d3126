use crate::common::*;
use crate::defaults::{DEFAULT_PRECISION_RATE, DEFAULT_PRECISION_SHAPE};
use crate::effects::is_fixed;

use matrix_param::{GammaVector, GaussianMoments};
use serde::{Deserialize, Serialize};

/// Population prior of one block: a Gaussian over the population mean
/// and an elementwise Gamma(shape, rate) over the population precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationPrior {
    pub gaussian: GaussianMoments,
    pub shape: DVec,
    pub rate: DVec,
}

impl PopulationPrior {
    pub fn new(gaussian: GaussianMoments, shape: DVec, rate: DVec) -> anyhow::Result<Self> {
        let ret = Self {
            gaussian,
            shape,
            rate,
        };
        ret.validate()?;
        Ok(ret)
    }

    /// N(0, I) over the mean, Gamma(1, 1) over each precision
    pub fn standard(dim: usize) -> Self {
        Self {
            gaussian: GaussianMoments::standard(dim),
            shape: DVec::from_element(dim, DEFAULT_PRECISION_SHAPE),
            rate: DVec::from_element(dim, DEFAULT_PRECISION_RATE),
        }
    }

    pub fn len(&self) -> usize {
        self.gaussian.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gaussian.is_empty()
    }

    /// Every (shape, rate) pair is either a proper Gamma or the fixed-effect sentinel
    pub fn validate(&self) -> anyhow::Result<()> {
        let n = self.gaussian.len();
        anyhow::ensure!(
            self.gaussian.cov.nrows() == n && self.gaussian.cov.ncols() == n,
            "population prior covariance is {}x{}, expected {}x{}",
            self.gaussian.cov.nrows(),
            self.gaussian.cov.ncols(),
            n,
            n
        );
        anyhow::ensure!(
            self.shape.len() == n && self.rate.len() == n,
            "population precision prior has {} shapes and {} rates for {} parameters",
            self.shape.len(),
            self.rate.len(),
            n
        );
        for (i, (&a, &b)) in self.shape.iter().zip(self.rate.iter()).enumerate() {
            let proper = a.is_finite() && b.is_finite() && a > 0.0 && b > 0.0;
            anyhow::ensure!(
                proper || is_fixed(a, b),
                "invalid precision prior Gamma({}, {}) at index {}",
                a,
                b,
                i
            );
        }
        Ok(())
    }
}

/// Population sufficient statistics of one block.
///
/// Created once as a copy of the prior; `posterior` and `precision` are
/// overwritten in place by the population update every outer iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationBlock {
    /// m0, V0
    pub prior: GaussianMoments,
    /// mu, Sigma
    pub posterior: GaussianMoments,
    /// (a, b) with the prior (a0, b0) kept inside
    pub precision: GammaVector,
}

impl PopulationBlock {
    pub fn from_prior(prior: &PopulationPrior) -> anyhow::Result<Self> {
        prior.validate()?;
        Ok(Self {
            prior: prior.gaussian.clone(),
            posterior: prior.gaussian.clone(),
            precision: GammaVector::from_prior(prior.shape.clone(), prior.rate.clone())?,
        })
    }

    pub fn len(&self) -> usize {
        self.prior.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prior.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::FIXED_EFFECT;

    #[test]
    fn test_validate() {
        let mut prior = PopulationPrior::standard(2);
        assert!(prior.validate().is_ok());

        prior.shape[0] = FIXED_EFFECT.0;
        prior.rate[0] = FIXED_EFFECT.1;
        assert!(prior.validate().is_ok());

        // infinite shape with a positive rate is neither
        prior.rate[0] = 1.0;
        assert!(prior.validate().is_err());

        prior.rate[0] = 0.0;
        prior.shape[1] = -1.0;
        assert!(prior.validate().is_err());

        let short = PopulationPrior {
            gaussian: GaussianMoments::standard(2),
            shape: DVec::from_element(1, 1.0),
            rate: DVec::from_element(2, 1.0),
        };
        assert!(short.validate().is_err());
    }

    #[test]
    fn test_from_prior_copies() -> anyhow::Result<()> {
        let prior = PopulationPrior::standard(3);
        let block = PopulationBlock::from_prior(&prior)?;
        assert_eq!(block.posterior, prior.gaussian);
        assert_eq!(block.precision.shape(), &prior.shape);
        assert_eq!(block.precision.prior_rate(), &prior.rate);
        Ok(())
    }
}
