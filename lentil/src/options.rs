use serde::{Deserialize, Serialize};

/// Default convergence tolerance on |ΔF|
pub const DEFAULT_TOL_FUN: f64 = 2e-2;

/// Default outer iteration cap of the group inversion
pub const DEFAULT_GROUP_MAX_ITER: usize = 16;

/// Options for the group (mixed-effects) inversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupOptions {
    /// Stop when |F(it+1) - F(it)| <= tol_fun. Default: 2e-2
    pub tol_fun: f64,
    /// Maximum number of outer iterations. Default: 16
    pub max_iter: usize,
    /// Inner iteration cap handed to the unit engine (None: engine default).
    /// Default: None
    pub unit_max_iter: Option<usize>,
    /// Invert the units of one iteration in parallel. Default: true
    pub parallel: bool,
    /// Noise precision hyperprior Gamma(a, b) handed to every unit.
    /// Default: None (engine default)
    pub noise_precision: Option<(f64, f64)>,
    /// Passed through to the unit engine. Default: false
    pub display_win: bool,
    /// Passed through to the unit engine. Default: false
    pub verbose: bool,
}

impl Default for GroupOptions {
    fn default() -> Self {
        GroupOptions {
            tol_fun: DEFAULT_TOL_FUN,
            max_iter: DEFAULT_GROUP_MAX_ITER,
            unit_max_iter: None,
            parallel: true,
            noise_precision: None,
            display_win: false,
            verbose: false,
        }
    }
}

impl GroupOptions {
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_tol_fun(self.tol_fun)?;
        validate_noise_precision(self.noise_precision)
    }
}

/// Options for the single-unit hyperparameter inversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperOptions {
    /// Stop when |F(it+1) - F(it)| <= tol_fun. Default: 2e-2
    pub tol_fun: f64,
    /// Maximum number of outer iterations (None: the engine's own cap).
    /// Default: None
    pub max_iter: Option<usize>,
    /// Inner iteration cap handed to the unit engine (None: engine default).
    /// Default: None
    pub unit_max_iter: Option<usize>,
    /// Noise precision hyperprior Gamma(a, b). Default: None (engine default)
    pub noise_precision: Option<(f64, f64)>,
    /// Passed through to the unit engine. Default: false
    pub display_win: bool,
    /// Passed through to the unit engine. Default: false
    pub verbose: bool,
}

impl Default for HyperOptions {
    fn default() -> Self {
        HyperOptions {
            tol_fun: DEFAULT_TOL_FUN,
            max_iter: None,
            unit_max_iter: None,
            noise_precision: None,
            display_win: false,
            verbose: false,
        }
    }
}

impl HyperOptions {
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_tol_fun(self.tol_fun)?;
        validate_noise_precision(self.noise_precision)
    }
}

fn validate_tol_fun(tol_fun: f64) -> anyhow::Result<()> {
    anyhow::ensure!(
        tol_fun.is_finite() && tol_fun >= 0.0,
        "tol_fun must be a finite non-negative number, got {}",
        tol_fun
    );
    Ok(())
}

fn validate_noise_precision(noise: Option<(f64, f64)>) -> anyhow::Result<()> {
    if let Some((a, b)) = noise {
        anyhow::ensure!(
            a.is_finite() && b.is_finite() && a > 0.0 && b > 0.0,
            "noise precision prior must be a proper Gamma, got ({}, {})",
            a,
            b
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opt = GroupOptions::default();
        assert_eq!(opt.tol_fun, 2e-2);
        assert_eq!(opt.max_iter, 16);
        assert!(opt.validate().is_ok());

        let opt = HyperOptions::default();
        assert_eq!(opt.max_iter, None);
        assert!(opt.validate().is_ok());
    }

    #[test]
    fn test_invalid() {
        let opt = GroupOptions {
            tol_fun: -1.0,
            ..Default::default()
        };
        assert!(opt.validate().is_err());

        let opt = HyperOptions {
            noise_precision: Some((0.0, 1.0)),
            ..Default::default()
        };
        assert!(opt.validate().is_err());
    }

    #[test]
    fn test_partial_json() -> anyhow::Result<()> {
        let opt: GroupOptions = serde_json::from_str(r#"{ "max_iter": 4, "parallel": false }"#)?;
        assert_eq!(opt.max_iter, 4);
        assert!(!opt.parallel);
        assert_eq!(opt.tol_fun, DEFAULT_TOL_FUN);
        Ok(())
    }
}
