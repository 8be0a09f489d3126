use crate::blocks::{BlockMap, BlockTag};
use crate::common::*;

use matrix_param::GaussianMoments;
use serde::{Deserialize, Serialize};

/// Model dimensions as given by the caller; any field may be missing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DimsSpec {
    /// number of observation parameters
    pub n_phi: Option<usize>,
    /// number of evolution parameters
    pub n_theta: Option<usize>,
    /// number of hidden states (initial conditions)
    pub n: Option<usize>,
    /// number of output channels
    pub p: Option<usize>,
    /// number of time samples
    pub n_t: Option<usize>,
    /// number of inputs
    pub u: Option<usize>,
}

impl DimsSpec {
    pub fn new(n_phi: usize, n_theta: usize, n: usize) -> Self {
        Self {
            n_phi: Some(n_phi),
            n_theta: Some(n_theta),
            n: Some(n),
            ..Default::default()
        }
    }

    /// Complete dimensions for one unit.
    ///
    /// The three parameter counts are required. Channel and sample counts
    /// may be read off the data shape (`p x n_t`), the input count off the
    /// input matrix.
    pub fn resolve(&self, data: &UnitData) -> anyhow::Result<ModelDims> {
        let n_phi = self
            .n_phi
            .ok_or(anyhow::anyhow!("missing dimension: n_phi"))?;
        let n_theta = self
            .n_theta
            .ok_or(anyhow::anyhow!("missing dimension: n_theta"))?;
        let n = self.n.ok_or(anyhow::anyhow!("missing dimension: n"))?;

        let p = self.p.unwrap_or(data.y.nrows());
        let n_t = self.n_t.unwrap_or(data.y.ncols());
        let u = self.u.unwrap_or(data.u.nrows());

        anyhow::ensure!(
            p == data.y.nrows() && n_t == data.y.ncols(),
            "data is {}x{}, expected p={} by n_t={}",
            data.y.nrows(),
            data.y.ncols(),
            p,
            n_t
        );
        anyhow::ensure!(
            u == data.u.nrows(),
            "{} input rows, expected u={}",
            data.u.nrows(),
            u
        );

        Ok(ModelDims {
            n_phi,
            n_theta,
            n,
            p,
            n_t,
            u,
        })
    }
}

/// Fully resolved model dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDims {
    pub n_phi: usize,
    pub n_theta: usize,
    pub n: usize,
    pub p: usize,
    pub n_t: usize,
    pub u: usize,
}

impl ModelDims {
    pub fn block_dim(&self, tag: BlockTag) -> usize {
        match tag {
            BlockTag::Observation => self.n_phi,
            BlockTag::Evolution => self.n_theta,
            BlockTag::InitialCondition => self.n,
        }
    }

    /// Blocks with at least one parameter
    pub fn present_blocks(&self) -> Vec<BlockTag> {
        BlockTag::ALL
            .into_iter()
            .filter(|&tag| self.block_dim(tag) > 0)
            .collect()
    }

    pub fn num_observations(&self) -> usize {
        self.p * self.n_t
    }
}

/// Observed time series of one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitData {
    /// p x n_t responses
    pub y: Mat,
    /// u x n_t inputs (zero rows when the model has none)
    pub u: Mat,
}

impl UnitData {
    pub fn new(y: Mat) -> Self {
        let n_t = y.ncols();
        Self {
            y,
            u: Mat::zeros(0, n_t),
        }
    }

    pub fn with_inputs(y: Mat, u: Mat) -> Self {
        Self { y, u }
    }
}

/// Priors handed to the engine for one inversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitPriors {
    pub blocks: BlockMap<GaussianMoments>,
    /// Gamma(shape, rate) over the observation noise precision
    pub noise_precision: Option<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InversionOptions {
    pub priors: UnitPriors,
    /// `Some(0)` asks for the prior-only baseline, `None` for the engine default
    pub max_inner_iter: Option<usize>,
    pub verbose: bool,
    pub display: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitMetrics {
    /// proportion of variance explained
    pub r2: f64,
    pub log_likelihood: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// the unit's own free energy
    pub free_energy: f64,
    /// posterior minus prior mean, per block
    pub deviations: BlockMap<DVec>,
    pub fit: FitMetrics,
    /// inner iterations used
    pub iterations: usize,
}

/// Posterior and diagnostics of one unit inversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitFit {
    pub posterior: BlockMap<GaussianMoments>,
    pub diagnostics: Diagnostics,
}

impl UnitFit {
    pub fn free_energy(&self) -> f64 {
        self.diagnostics.free_energy
    }

    pub fn block(&self, tag: BlockTag) -> anyhow::Result<&GaussianMoments> {
        self.posterior
            .get(&tag)
            .ok_or(anyhow::anyhow!("{}: no posterior for this block", tag))
    }

    pub fn deviation(&self, tag: BlockTag) -> anyhow::Result<&DVec> {
        self.diagnostics
            .deviations
            .get(&tag)
            .ok_or(anyhow::anyhow!("{}: no deviation for this block", tag))
    }
}

/// Variational inversion of one unit under given block priors.
///
/// Implementations must be deterministic given their arguments; the outer
/// loops may call them from several threads at once.
pub trait UnitInversionEngine: Sync {
    /// Invert one unit. `warm_start` is the fit of the previous outer
    /// iteration for this unit, if any.
    fn invert(
        &self,
        data: &UnitData,
        dims: &ModelDims,
        options: &InversionOptions,
        warm_start: Option<&UnitFit>,
    ) -> anyhow::Result<UnitFit>;

    /// Outer iteration cap when the caller does not give one
    fn default_max_iter(&self) -> usize {
        32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_infers_shape() -> anyhow::Result<()> {
        let data = UnitData::new(Mat::zeros(2, 7));
        let dims = DimsSpec::new(1, 3, 0).resolve(&data)?;
        assert_eq!((dims.p, dims.n_t, dims.u), (2, 7, 0));
        assert_eq!(dims.present_blocks(), vec![BlockTag::Observation, BlockTag::Evolution]);
        assert_eq!(dims.num_observations(), 14);
        Ok(())
    }

    #[test]
    fn test_resolve_missing_is_fatal() {
        let data = UnitData::new(Mat::zeros(2, 7));
        let spec = DimsSpec {
            n_phi: Some(1),
            n: Some(2),
            ..Default::default()
        };
        let err = spec.resolve(&data).unwrap_err();
        assert!(err.to_string().contains("n_theta"));

        let spec = DimsSpec {
            p: Some(3),
            ..DimsSpec::new(1, 1, 1)
        };
        assert!(spec.resolve(&data).is_err());
    }
}
