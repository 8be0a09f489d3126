use matrix_util::dmatrix_util::log_det;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Multivariate Gaussian N(mean, cov) given by its first two moments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianMoments {
    pub mean: DVector<f64>,
    pub cov: DMatrix<f64>,
}

impl GaussianMoments {
    pub fn new(mean: DVector<f64>, cov: DMatrix<f64>) -> anyhow::Result<Self> {
        anyhow::ensure!(
            cov.nrows() == mean.len() && cov.ncols() == mean.len(),
            "covariance {}x{} does not match mean of length {}",
            cov.nrows(),
            cov.ncols(),
            mean.len()
        );
        Ok(Self { mean, cov })
    }

    /// N(0, I)
    pub fn standard(dim: usize) -> Self {
        Self {
            mean: DVector::zeros(dim),
            cov: DMatrix::identity(dim, dim),
        }
    }

    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    /// Coordinates with non-zero prior variance
    pub fn active_mask(&self) -> Vec<bool> {
        self.cov.diagonal().iter().map(|&v| v != 0.0).collect()
    }

    pub fn active_indices(&self) -> Vec<usize> {
        self.active_mask()
            .into_iter()
            .enumerate()
            .filter_map(|(i, a)| a.then_some(i))
            .collect()
    }
}

/// Entropy of N(., V): `0.5 n (1 + ln 2π) + 0.5 ln|V|`
pub fn gaussian_entropy(cov: &DMatrix<f64>) -> f64 {
    let n = cov.nrows() as f64;
    0.5 * n * (1.0 + LN_2PI) + 0.5 * log_det(cov)
}
