use crate::cli_io::*;

use lentil::common::DVec;
use lentil::effects::FIXED_EFFECT;
use lentil::simulate::{simulate_linear_gaussian, SimArgs, SimulatedData};
use lentil::*;

use clap::Parser;
use log::info;
use serde::Serialize;

#[derive(Parser, Debug, Clone)]
pub struct GroupArgs {
    /// number of simulated units (subjects)
    #[arg(long, short = 'u', default_value_t = 8)]
    n_units: usize,

    /// number of time samples per unit
    #[arg(long, default_value_t = 20)]
    n_t: usize,

    /// number of observation parameters
    #[arg(long, default_value_t = 1)]
    n_phi: usize,

    /// number of evolution parameters
    #[arg(long, default_value_t = 2)]
    n_theta: usize,

    /// evolution parameters shared by all units (comma-separated indices)
    #[arg(long, value_delimiter(','))]
    fixed_theta: Vec<usize>,

    /// standard deviation of unit effects around the population mean
    #[arg(long, default_value_t = 0.5)]
    between_sd: f64,

    /// observation noise standard deviation
    #[arg(long, default_value_t = 0.5)]
    noise_sd: f64,

    /// options in a JSON file (see `GroupOptions`); flags below override it
    #[arg(long, short = 'c')]
    config: Option<Box<str>>,

    /// convergence tolerance on the free energy
    #[arg(long)]
    tol_fun: Option<f64>,

    /// maximum number of outer iterations
    #[arg(long)]
    max_iter: Option<usize>,

    /// invert units one after another
    #[arg(long, default_value_t = false)]
    sequential: bool,

    /// random seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// output file header; writes `{out}.json`
    #[arg(long, short, required = true)]
    out: Box<str>,

    /// show a progress bar
    #[arg(long, default_value_t = false)]
    progress: bool,

    /// verbosity
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Serialize)]
struct GroupOutput<'a> {
    truth: &'a BlockMap<DVec>,
    result: &'a GroupResult,
}

/// Simulate units and run the mixed-effects inversion
pub fn run_group(args: GroupArgs) -> anyhow::Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let mut options: GroupOptions = read_json_options(args.config.as_deref())?;
    if let Some(tol_fun) = args.tol_fun {
        options.tol_fun = tol_fun;
    }
    if let Some(max_iter) = args.max_iter {
        options.max_iter = max_iter;
    }
    if args.sequential {
        options.parallel = false;
    }
    options.display_win = args.progress;
    options.verbose = options.verbose || args.verbose;
    options.validate()?;

    let sim: SimulatedData = simulate_linear_gaussian(&SimArgs {
        n_units: args.n_units,
        n_t: args.n_t,
        n_phi: args.n_phi,
        n_theta: args.n_theta,
        between_sd: args.between_sd,
        noise_sd: args.noise_sd,
        rseed: args.seed,
    })?;

    let mut priors = BlockMap::new();
    if args.n_theta > 0 {
        let mut theta = PopulationPrior::standard(args.n_theta);
        for &j in args.fixed_theta.iter() {
            anyhow::ensure!(j < args.n_theta, "fixed index {} out of range", j);
            theta.shape[j] = FIXED_EFFECT.0;
            theta.rate[j] = FIXED_EFFECT.1;
        }
        priors.insert(BlockTag::Evolution, theta);
    }

    let engine = LinearGaussianEngine::new(sim.designs.clone())?;
    let dims = DimsSpec::new(args.n_phi, args.n_theta, 0);

    let mut observer: Box<dyn IterationObserver> = if args.progress {
        Box::new(ProgressObserver::new(options.max_iter, true))
    } else {
        Box::new(LogObserver::default())
    };

    let result = GroupInversion::new(&engine, options).run(
        &sim.units,
        &dims,
        Some(priors),
        observer.as_mut(),
    )?;

    for (tag, block) in result.population.iter() {
        info!(
            "{}: population mean {:?} (true {:?})",
            tag,
            block.posterior.mean.as_slice(),
            sim.population_mean.get(tag).map(|m| m.as_slice())
        );
    }
    info!(
        "mean R2 = {:.4}, {} iteration(s), {:.3}s",
        result.within_fit.r2, result.iterations, result.elapsed_secs
    );

    let file = write_json(
        &GroupOutput {
            truth: &sim.population_mean,
            result: &result,
        },
        &args.out,
    )?;
    info!("wrote {}", file);
    Ok(())
}
