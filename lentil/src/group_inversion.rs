use crate::blocks::{BlockMap, BlockRegistry};
use crate::common::*;
use crate::convergence::{ConvergenceMonitor, ConvergenceStatus};
use crate::defaults::fill_population_priors;
use crate::engine::*;
use crate::free_energy::group_free_energy;
use crate::observer::IterationObserver;
use crate::options::GroupOptions;
use crate::population::{PopulationBlock, PopulationPrior};
use crate::population_update::update_population;
use crate::prior_propagation::{build_unit_priors, refresh_unit_priors};

use anyhow::Context;
use matrix_param::GaussianMoments;
use rayon::prelude::*;
use serde::Serialize;
use std::time::Instant;

/// Mixed-effects inversion of many units sharing one model.
///
/// Each outer iteration refreshes the unit priors from the population
/// posterior, re-inverts every unit (in parallel unless disabled), updates
/// the population statistics and records the free energy.
pub struct GroupInversion<'a, E: UnitInversionEngine> {
    engine: &'a E,
    options: GroupOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupResult {
    /// population prior and posterior per block
    pub population: BlockMap<PopulationBlock>,
    pub registry: BlockRegistry,
    /// F(0) from the baseline, then one entry per outer iteration
    pub free_energy: Vec<f64>,
    pub iterations: usize,
    pub status: ConvergenceStatus,
    /// fits of the last outer iteration
    pub units: Vec<UnitFit>,
    /// prior-only fits before any population learning
    pub baseline: Vec<UnitFit>,
    /// R² averaged over units, log-likelihood summed
    pub within_fit: FitMetrics,
    pub elapsed_secs: f64,
}

impl<'a, E: UnitInversionEngine> GroupInversion<'a, E> {
    pub fn new(engine: &'a E, options: GroupOptions) -> Self {
        Self { engine, options }
    }

    /// Run the outer loop to convergence or the iteration cap.
    ///
    /// * `units` - data of each unit
    /// * `dims` - model dimensions, completed per unit from its data
    /// * `priors` - population priors; missing blocks get the defaults
    pub fn run(
        &self,
        units: &[UnitData],
        dims: &DimsSpec,
        priors: Option<BlockMap<PopulationPrior>>,
        observer: &mut dyn IterationObserver,
    ) -> anyhow::Result<GroupResult> {
        self.options.validate()?;
        anyhow::ensure!(!units.is_empty(), "no units to invert");

        let timer = Instant::now();
        let ns = units.len();

        let unit_dims = units
            .iter()
            .enumerate()
            .map(|(i, data)| dims.resolve(data).with_context(|| format!("unit {}", i)))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let priors = fill_population_priors(&unit_dims[0], priors)?;
        let registry = BlockRegistry::from_population_priors(&priors)?;

        let mut population = BlockMap::new();
        for (&tag, prior) in priors.iter() {
            population.insert(tag, PopulationBlock::from_prior(prior)?);
        }

        for desc in registry.iter() {
            info!(
                "{}: {} random, {} fixed, {} inactive",
                desc.tag,
                desc.random.len(),
                desc.fixed.len(),
                desc.dim - desc.num_active()
            );
        }

        // baseline: prior-only estimates
        let mut unit_priors = build_unit_priors(&population, &registry, ns)?;
        let baseline = self.invert_all(units, &unit_dims, &unit_priors, Some(0), None)?;

        let mut monitor = ConvergenceMonitor::new(self.options.tol_fun, self.options.max_iter);
        let f0 = group_free_energy(&baseline, &population, &registry)?;
        let mut status = monitor.start(f0);
        observer.on_iteration(0, f0, status);

        let mut fits = baseline.clone();

        while !status.is_terminal() {
            refresh_unit_priors(&mut unit_priors, &population, &registry)?;

            fits = self.invert_all(
                units,
                &unit_dims,
                &unit_priors,
                self.options.unit_max_iter,
                Some(fits.as_slice()),
            )?;

            update_population(&mut population, &registry, &fits)?;

            let free_energy = group_free_energy(&fits, &population, &registry)?;
            status = monitor.push(free_energy);
            observer.on_iteration(monitor.iterations(), free_energy, status);
        }

        let iterations = monitor.iterations();
        observer.on_finish(status, iterations);

        let within_fit = FitMetrics {
            r2: fits.iter().map(|f| f.diagnostics.fit.r2).sum::<f64>() / ns as f64,
            log_likelihood: fits.iter().map(|f| f.diagnostics.fit.log_likelihood).sum(),
        };

        info!(
            "group inversion of {} units: {} after {} iteration(s), F = {:.4}",
            ns,
            status,
            iterations,
            monitor.last().unwrap_or(f0)
        );

        Ok(GroupResult {
            population,
            registry,
            free_energy: monitor.into_history(),
            iterations,
            status,
            units: fits,
            baseline,
            within_fit,
            elapsed_secs: timer.elapsed().as_secs_f64(),
        })
    }

    /// One engine call per unit, all under the same priors
    fn invert_all(
        &self,
        units: &[UnitData],
        unit_dims: &[ModelDims],
        priors: &BlockMap<GaussianMoments>,
        max_inner_iter: Option<usize>,
        warm_start: Option<&[UnitFit]>,
    ) -> anyhow::Result<Vec<UnitFit>> {
        let options = InversionOptions {
            priors: UnitPriors {
                blocks: priors.clone(),
                noise_precision: self.options.noise_precision,
            },
            max_inner_iter,
            verbose: self.options.verbose,
            display: self.options.display_win,
        };

        let invert = |i: usize| -> anyhow::Result<UnitFit> {
            self.engine
                .invert(
                    &units[i],
                    &unit_dims[i],
                    &options,
                    warm_start.map(|fits| &fits[i]),
                )
                .with_context(|| format!("failed to invert unit {}", i))
        };

        if self.options.parallel {
            (0..units.len()).into_par_iter().map(invert).collect()
        } else {
            (0..units.len()).map(invert).collect()
        }
    }
}
