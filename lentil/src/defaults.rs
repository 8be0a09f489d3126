use crate::blocks::{BlockMap, BlockTag};
use crate::common::*;
use crate::engine::ModelDims;
use crate::population::PopulationPrior;

use matrix_param::GaussianMoments;

/// Gamma shape of a block precision when none is given
pub const DEFAULT_PRECISION_SHAPE: f64 = 1.0;

/// Gamma rate of a block precision when none is given
pub const DEFAULT_PRECISION_RATE: f64 = 1.0;

/// Noise precision Gamma(shape, rate) assumed by engines when none is given
pub const DEFAULT_NOISE_PRECISION: (f64, f64) = (1.0, 1.0);

/// Population priors for every present block of `dims`.
///
/// Missing blocks get N(0, I) over the mean and Gamma(1, 1) over the
/// precision. Priors for blocks the model does not have are dropped.
pub fn fill_population_priors(
    dims: &ModelDims,
    priors: Option<BlockMap<PopulationPrior>>,
) -> anyhow::Result<BlockMap<PopulationPrior>> {
    let mut priors = priors.unwrap_or_default();
    let mut ret = BlockMap::new();

    for tag in dims.present_blocks() {
        let dim = dims.block_dim(tag);
        let prior = match priors.remove(&tag) {
            Some(prior) => {
                anyhow::ensure!(
                    prior.len() == dim,
                    "{}: population prior has {} parameters, model has {}",
                    tag,
                    prior.len(),
                    dim
                );
                prior.validate()?;
                prior
            }
            None => {
                info!("{}: default population prior N(0, I), Gamma(1, 1)", tag);
                PopulationPrior::standard(dim)
            }
        };
        ret.insert(tag, prior);
    }
    Ok(ret)
}

/// Gaussian priors (templates) for every present block of `dims`
pub fn fill_unit_priors(
    dims: &ModelDims,
    priors: Option<BlockMap<GaussianMoments>>,
) -> anyhow::Result<BlockMap<GaussianMoments>> {
    let mut priors = priors.unwrap_or_default();
    let mut ret = BlockMap::new();

    for tag in dims.present_blocks() {
        let dim = dims.block_dim(tag);
        let prior = match priors.remove(&tag) {
            Some(prior) => {
                anyhow::ensure!(
                    prior.len() == dim && prior.cov.nrows() == dim && prior.cov.ncols() == dim,
                    "{}: prior has {} parameters, model has {}",
                    tag,
                    prior.len(),
                    dim
                );
                prior
            }
            None => {
                info!("{}: default prior N(0, I)", tag);
                GaussianMoments::standard(dim)
            }
        };
        ret.insert(tag, prior);
    }
    Ok(ret)
}

/// Gamma(shape, rate) hyperprior over the precision of each block
pub fn fill_hyperpriors(
    tags: &[BlockTag],
    hyperpriors: Option<BlockMap<(f64, f64)>>,
) -> anyhow::Result<BlockMap<(f64, f64)>> {
    let hyperpriors = hyperpriors.unwrap_or_default();
    let mut ret = BlockMap::new();

    for &tag in tags {
        let (a0, b0) = match hyperpriors.get(&tag) {
            Some(&ab) => ab,
            None => {
                info!("{}: default hyperprior Gamma(1, 1)", tag);
                (DEFAULT_PRECISION_SHAPE, DEFAULT_PRECISION_RATE)
            }
        };
        anyhow::ensure!(
            a0.is_finite() && b0.is_finite() && a0 > 0.0 && b0 > 0.0,
            "{}: hyperprior must be a proper Gamma, got ({}, {})",
            tag,
            a0,
            b0
        );
        ret.insert(tag, (a0, b0));
    }
    Ok(ret)
}
