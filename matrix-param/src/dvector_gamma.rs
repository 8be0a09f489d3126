use crate::traits::*;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use special::Gamma as SpecialGamma;

/// Gamma(shape = a, rate = b) over a vector of precision parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GammaVector {
    //////////////////////
    // hyper parameters //
    //////////////////////
    a0: DVector<f64>,
    b0: DVector<f64>,
    ///////////////////////////
    // sufficient statistics //
    ///////////////////////////
    a_stat: DVector<f64>,
    b_stat: DVector<f64>,
}

impl GammaVector {
    /// Start from the prior: the posterior statistics are a copy of (a0, b0)
    pub fn from_prior(a0: DVector<f64>, b0: DVector<f64>) -> anyhow::Result<Self> {
        anyhow::ensure!(
            a0.len() == b0.len(),
            "shape and rate lengths differ: {} vs {}",
            a0.len(),
            b0.len()
        );
        Ok(Self {
            a_stat: a0.clone(),
            b_stat: b0.clone(),
            a0,
            b0,
        })
    }

    pub fn shape(&self) -> &DVector<f64> {
        &self.a_stat
    }

    pub fn rate(&self) -> &DVector<f64> {
        &self.b_stat
    }

    pub fn prior_shape(&self) -> &DVector<f64> {
        &self.a0
    }

    pub fn prior_rate(&self) -> &DVector<f64> {
        &self.b0
    }
}

impl TwoStatParam for GammaVector {
    type Vec = DVector<f64>;
    type Scalar = f64;

    fn new(len: usize, a: Self::Scalar, b: Self::Scalar) -> Self {
        Self {
            a0: DVector::from_element(len, a),
            b0: DVector::from_element(len, b),
            a_stat: DVector::from_element(len, a),
            b_stat: DVector::from_element(len, b),
        }
    }

    fn add_stat(&mut self, add_a: &Self::Vec, add_b: &Self::Vec) {
        self.a_stat += add_a;
        self.b_stat += add_b;
    }

    fn update_stat(&mut self, update_a: &Self::Vec, update_b: &Self::Vec) {
        self.reset_stat();
        self.add_stat(update_a, update_b);
    }

    fn update_stat_at(&mut self, idx: &[usize], update_a: &Self::Vec, update_b: &Self::Vec) {
        for (k, &i) in idx.iter().enumerate() {
            self.a_stat[i] = self.a0[i] + update_a[k];
            self.b_stat[i] = self.b0[i] + update_b[k];
        }
    }

    fn reset_stat(&mut self) {
        self.a_stat.copy_from(&self.a0);
        self.b_stat.copy_from(&self.b0);
    }
}

impl Inference for GammaVector {
    type Vec = DVector<f64>;

    fn posterior_mean(&self) -> Self::Vec {
        self.a_stat.zip_map(&self.b_stat, |a, b| a / b)
    }

    fn posterior_sd(&self) -> Self::Vec {
        self.a_stat.zip_map(&self.b_stat, |a, b| a.sqrt() / b)
    }

    fn posterior_log_mean(&self) -> Self::Vec {
        self.a_stat.zip_map(&self.b_stat, |a, b| a.digamma() - b.ln())
    }

    fn posterior_mean_inverse(&self) -> Self::Vec {
        self.a_stat.zip_map(&self.b_stat, |a, b| b / a)
    }

    fn len(&self) -> usize {
        self.a_stat.len()
    }
}

/// Entropy of Gamma(shape = k, scale = θ)
///
/// `H = k + ln θ + ln Γ(k) + (1 - k) ψ(k)`
pub fn gamma_entropy(shape: f64, scale: f64) -> f64 {
    shape + scale.ln() + SpecialGamma::ln_gamma(shape).0 + (1.0 - shape) * shape.digamma()
}

/// KL( Gamma(a, b) || Gamma(a0, b0) ) in the shape/rate parameterization
pub fn gamma_kl(a: f64, b: f64, a0: f64, b0: f64) -> f64 {
    (a - a0) * a.digamma() - SpecialGamma::ln_gamma(a).0 + SpecialGamma::ln_gamma(a0).0
        + a0 * (b.ln() - b0.ln())
        + a * (b0 - b) / b
}

/// KL between two Gamma densities given by their (mean, variance)
///
/// `shape = mean^2 / var`, `rate = mean / var`
pub fn gamma_kl_moments(mean: f64, var: f64, mean0: f64, var0: f64) -> f64 {
    gamma_kl(mean * mean / var, mean / var, mean0 * mean0 / var0, mean0 / var0)
}
