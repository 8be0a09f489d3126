use crate::blocks::{BlockMap, BlockTag};
use crate::common::*;
use crate::defaults::DEFAULT_NOISE_PRECISION;
use crate::engine::*;

use matrix_param::GaussianMoments;
use matrix_util::dmatrix_util::*;
use matrix_util::traits::SubsetOps;

/// Conjugate linear-Gaussian unit model
///
/// ```text
/// vec(y) = Σ_b X_b θ_b + ε,   ε ~ N(0, I/λ),   θ_b ~ N(μ_b, Σ_b)
/// ```
///
/// with one design matrix `X_b` (`(p n_t) x dim_b`) per block, shared by
/// all units, and `λ` fixed at the mean of the noise precision prior. The
/// posterior is exact, so a single inner iteration suffices and warm starts
/// are not needed. Parameters with zero prior variance stay at their prior
/// mean.
pub struct LinearGaussianEngine {
    designs: BlockMap<Mat>,
}

/// (tag, offset, dim) of each block within the stacked parameter vector
type Layout = Vec<(BlockTag, usize, usize)>;

impl LinearGaussianEngine {
    pub fn new(designs: BlockMap<Mat>) -> anyhow::Result<Self> {
        let mut nrows = designs.values().map(|x| x.nrows());
        if let Some(n) = nrows.next() {
            anyhow::ensure!(
                nrows.all(|m| m == n),
                "design matrices must share the number of observations"
            );
        }
        Ok(Self { designs })
    }

    /// Stack the designs and priors of the present blocks
    fn stack(
        &self,
        dims: &ModelDims,
        priors: &UnitPriors,
    ) -> anyhow::Result<(Layout, Mat, GaussianMoments)> {
        let nobs = dims.num_observations();
        let mut layout = vec![];
        let mut designs = vec![];
        let mut means = vec![];
        let mut covs = vec![];
        let mut offset = 0;

        for tag in dims.present_blocks() {
            let dim = dims.block_dim(tag);
            let prior = priors
                .blocks
                .get(&tag)
                .ok_or(anyhow::anyhow!("{}: no prior given", tag))?;
            let design = self
                .designs
                .get(&tag)
                .ok_or(anyhow::anyhow!("{}: no design matrix", tag))?;

            anyhow::ensure!(
                prior.len() == dim,
                "{}: prior has {} parameters, model has {}",
                tag,
                prior.len(),
                dim
            );
            anyhow::ensure!(
                design.nrows() == nobs && design.ncols() == dim,
                "{}: design is {}x{}, expected {}x{}",
                tag,
                design.nrows(),
                design.ncols(),
                nobs,
                dim
            );

            layout.push((tag, offset, dim));
            designs.push(design);
            means.push(&prior.mean);
            covs.push(&prior.cov);
            offset += dim;
        }

        let mut xx = Mat::zeros(nobs, offset);
        for (&(_, off, dim), design) in layout.iter().zip(designs) {
            xx.view_mut((0, off), (nobs, dim)).copy_from(design);
        }

        let prior = GaussianMoments::new(concatenate_vectors(&means), block_diagonal(&covs))?;
        Ok((layout, xx, prior))
    }
}

impl UnitInversionEngine for LinearGaussianEngine {
    fn invert(
        &self,
        data: &UnitData,
        dims: &ModelDims,
        options: &InversionOptions,
        warm_start: Option<&UnitFit>,
    ) -> anyhow::Result<UnitFit> {
        anyhow::ensure!(
            data.y.nrows() == dims.p && data.y.ncols() == dims.n_t,
            "data is {}x{}, expected {}x{}",
            data.y.nrows(),
            data.y.ncols(),
            dims.p,
            dims.n_t
        );

        if warm_start.is_some() {
            debug!("closed-form posterior; warm start not used");
        }

        let (layout, xx, prior) = self.stack(dims, &options.priors)?;

        let (a, b) = options
            .priors
            .noise_precision
            .unwrap_or(DEFAULT_NOISE_PRECISION);
        anyhow::ensure!(a > 0.0 && b > 0.0, "invalid noise precision Gamma({}, {})", a, b);
        let lambda = a / b;

        let yy = DVec::from_column_slice(data.y.as_slice());
        let nn = yy.len() as f64;

        let active = prior.active_indices();
        let inactive: Vec<usize> = (0..prior.len())
            .filter(|i| !active.contains(i))
            .collect();

        // inactive parameters are held at their prior mean
        let x_a = xx.select_columns(active.iter());
        let x_i = xx.select_columns(inactive.iter());
        let r0 = &yy - &x_i * prior.mean.subset(&inactive);

        let mu0 = prior.mean.subset(&active);
        let s0 = prior.cov.subset(&active);
        let is0 = robust_inverse(&s0);
        let xtx = x_a.transpose() * &x_a;

        let (mu, ss, iterations) = if options.max_inner_iter == Some(0) {
            (mu0.clone(), s0.clone(), 0)
        } else {
            let ss = symmetrize(&robust_inverse(&(&is0 + &xtx * lambda)));
            let mu = &ss * (&is0 * &mu0 + x_a.transpose() * &r0 * lambda);
            (mu, ss, 1)
        };

        // E_q[ln p(y | θ)] - KL(q || p)
        let resid = &r0 - &x_a * &mu;
        let rss = resid.norm_squared();
        let log_likelihood = -0.5 * nn * LN_2PI + 0.5 * nn * lambda.ln() - 0.5 * lambda * rss;
        let expected_llik = log_likelihood - 0.5 * lambda * trace_product(&xtx, &ss);

        let dd = &mu - &mu0;
        let kl = 0.5
            * (trace_product(&is0, &ss) + dd.dot(&(&is0 * &dd)) - active.len() as f64
                + log_det(&s0)
                - log_det(&ss));
        let free_energy = expected_llik - kl;

        let ybar = yy.mean();
        let tss = yy.map(|y| (y - ybar).powi(2)).sum();
        let r2 = if tss > 0.0 { 1.0 - rss / tss } else { 0.0 };

        let mut mean = prior.mean.clone();
        mean.assign_subset(&active, &mu);
        let mut cov = Mat::zeros(prior.len(), prior.len());
        cov.assign_subset(&active, &ss);

        let mut posterior = BlockMap::new();
        let mut deviations = BlockMap::new();
        for &(tag, off, dim) in layout.iter() {
            let block = GaussianMoments::new(
                mean.rows(off, dim).into_owned(),
                cov.view((off, off), (dim, dim)).into_owned(),
            )?;
            deviations.insert(tag, &block.mean - prior.mean.rows(off, dim));
            posterior.insert(tag, block);
        }

        if options.verbose {
            info!(
                "F = {:.4}, R2 = {:.4}, log-likelihood = {:.4}",
                free_energy, r2, log_likelihood
            );
        }

        Ok(UnitFit {
            posterior,
            diagnostics: Diagnostics {
                free_energy,
                deviations,
                fit: FitMetrics {
                    r2,
                    log_likelihood,
                },
                iterations,
            },
        })
    }
}
