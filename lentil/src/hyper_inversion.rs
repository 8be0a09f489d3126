use crate::blocks::BlockMap;
use crate::common::*;
use crate::convergence::{ConvergenceMonitor, ConvergenceStatus};
use crate::defaults::{fill_hyperpriors, fill_unit_priors};
use crate::engine::*;
use crate::free_energy::hyper_free_energy;
use crate::hyper_update::HyperBlock;
use crate::observer::IterationObserver;
use crate::options::HyperOptions;
use crate::prior_propagation::rescale_unit_priors;

use matrix_param::GaussianMoments;
use serde::Serialize;
use std::time::Instant;

/// Single-unit inversion where the prior precision of every parameter
/// block is learned with a Gamma posterior.
pub struct HyperInversion<'a, E: UnitInversionEngine> {
    engine: &'a E,
    options: HyperOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct HyperResult {
    /// fit of the last outer iteration
    pub fit: UnitFit,
    /// template and Gamma posterior of each block precision
    pub hyper: BlockMap<HyperBlock>,
    /// F(0) from the baseline, then one entry per outer iteration
    pub free_energy: Vec<f64>,
    pub iterations: usize,
    pub status: ConvergenceStatus,
    /// prior-only fit under the hyperprior mean precision
    pub baseline: UnitFit,
    pub elapsed_secs: f64,
}

impl<'a, E: UnitInversionEngine> HyperInversion<'a, E> {
    pub fn new(engine: &'a E, options: HyperOptions) -> Self {
        Self { engine, options }
    }

    /// Run the outer loop to convergence or the iteration cap.
    ///
    /// * `dims` - `n_phi`, `n_theta` and `n` must be given
    /// * `priors` - block templates `N(mean, Q)`; missing blocks get `N(0, I)`
    /// * `hyperpriors` - Gamma(a0, b0) per block; missing blocks get Gamma(1, 1)
    pub fn run(
        &self,
        data: &UnitData,
        dims: &DimsSpec,
        priors: Option<BlockMap<GaussianMoments>>,
        hyperpriors: Option<BlockMap<(f64, f64)>>,
        observer: &mut dyn IterationObserver,
    ) -> anyhow::Result<HyperResult> {
        self.options.validate()?;
        let timer = Instant::now();

        let dims = dims.resolve(data)?;
        let templates = fill_unit_priors(&dims, priors)?;
        let tags: Vec<_> = templates.keys().copied().collect();
        let hyperpriors = fill_hyperpriors(&tags, hyperpriors)?;

        let mut hyper = BlockMap::new();
        for (tag, template) in templates.into_iter() {
            let &(a0, b0) = hyperpriors
                .get(&tag)
                .ok_or(anyhow::anyhow!("{}: no hyperprior", tag))?;
            hyper.insert(tag, HyperBlock::new(template, a0, b0)?);
        }

        let max_iter = self
            .options
            .max_iter
            .unwrap_or(self.engine.default_max_iter());

        let mut unit_priors = BlockMap::new();
        rescale_unit_priors(&mut unit_priors, &hyper);

        let baseline = self
            .engine
            .invert(data, &dims, &self.inversion_options(&unit_priors, Some(0)), None)?;

        let mut monitor = ConvergenceMonitor::new(self.options.tol_fun, max_iter);
        let f0 = hyper_free_energy(&baseline, &hyper);
        let mut status = monitor.start(f0);
        observer.on_iteration(0, f0, status);

        let mut fit = baseline.clone();

        while !status.is_terminal() {
            rescale_unit_priors(&mut unit_priors, &hyper);

            fit = self.engine.invert(
                data,
                &dims,
                &self.inversion_options(&unit_priors, self.options.unit_max_iter),
                Some(&fit),
            )?;

            for (&tag, block) in hyper.iter_mut() {
                block.update(fit.block(tag)?, fit.deviation(tag)?)?;
                debug!(
                    "{}: precision Gamma({:.3}, {:.3}), mean {:.4}",
                    tag,
                    block.shape(),
                    block.rate(),
                    block.shape() / block.rate()
                );
            }

            let free_energy = hyper_free_energy(&fit, &hyper);
            status = monitor.push(free_energy);
            observer.on_iteration(monitor.iterations(), free_energy, status);
        }

        let iterations = monitor.iterations();
        observer.on_finish(status, iterations);

        info!(
            "hyperparameter inversion: {} after {} iteration(s), F = {:.4}",
            status,
            iterations,
            monitor.last().unwrap_or(f0)
        );

        Ok(HyperResult {
            fit,
            hyper,
            free_energy: monitor.into_history(),
            iterations,
            status,
            baseline,
            elapsed_secs: timer.elapsed().as_secs_f64(),
        })
    }

    fn inversion_options(
        &self,
        priors: &BlockMap<GaussianMoments>,
        max_inner_iter: Option<usize>,
    ) -> InversionOptions {
        InversionOptions {
            priors: UnitPriors {
                blocks: priors.clone(),
                noise_precision: self.options.noise_precision,
            },
            max_inner_iter,
            verbose: self.options.verbose,
            display: self.options.display_win,
        }
    }
}
