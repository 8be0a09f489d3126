//! Hierarchical (empirical-Bayes) variational inference on top of a
//! black-box unit inversion engine.
//!
//! Two outer loops share the same machinery:
//!
//! - **Group (mixed-effects) inversion**: many units share one model but
//!   keep individual parameter estimates, pooled through a population
//!   Gaussian-Gamma hyper-distribution. Each parameter is either a fixed
//!   effect (shared) or a random effect (drawn from the population).
//! - **Hyperparameter inversion**: one unit where the precision of each
//!   parameter block's prior is itself learned with a Gamma posterior.
//!
//! Each outer iteration refreshes the unit priors from the current
//! population (or hyperparameter) posterior, re-runs the warm-started unit
//! engine, applies a closed-form conjugate update, and adds analytic
//! correction terms to the engine free energies so that the total stays a
//! valid bound for convergence monitoring.

/// Shared type aliases and logging re-exports
pub mod common;

/// Fixed vs random effect classification
pub mod effects;

/// Parameter blocks (observation, evolution, initial condition)
pub mod blocks;

/// Population-level prior and posterior records
pub mod population;

/// Configuration schema for both outer loops
pub mod options;

/// Default priors and hyperpriors
pub mod defaults;

/// Unit inversion engine interface and its data records
pub mod engine;

/// Exact linear-Gaussian unit engine
pub mod linear_gaussian;

/// Population/hyperparameter to unit prior propagation
pub mod prior_propagation;

/// Conjugate update of the population statistics
pub mod population_update;

/// Conjugate update of block precision hyperparameters
pub mod hyper_update;

/// Free energy with hierarchical correction terms
pub mod free_energy;

/// Outer-loop stopping rule and free-energy history
pub mod convergence;

/// Per-iteration progress callbacks
pub mod observer;

/// Group (mixed-effects) outer loop
pub mod group_inversion;

/// Single-unit hyperparameter outer loop
pub mod hyper_inversion;

/// Synthetic data from the linear-Gaussian model
pub mod simulate;

pub use blocks::{BlockDescriptor, BlockMap, BlockRegistry, BlockTag};
pub use convergence::{ConvergenceMonitor, ConvergenceStatus};
pub use engine::{
    Diagnostics, DimsSpec, FitMetrics, InversionOptions, ModelDims, UnitData, UnitFit,
    UnitInversionEngine, UnitPriors,
};
pub use group_inversion::{GroupInversion, GroupResult};
pub use hyper_inversion::{HyperInversion, HyperResult};
pub use linear_gaussian::LinearGaussianEngine;
pub use observer::{IterationObserver, LogObserver, NullObserver, ProgressObserver};
pub use options::{GroupOptions, HyperOptions};
pub use population::{PopulationBlock, PopulationPrior};
