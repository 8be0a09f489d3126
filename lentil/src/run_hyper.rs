use crate::cli_io::*;

use lentil::common::DVec;
use lentil::simulate::{simulate_linear_gaussian, SimArgs};
use lentil::*;

use clap::Parser;
use log::info;
use serde::Serialize;

#[derive(Parser, Debug, Clone)]
pub struct HyperArgs {
    /// number of time samples
    #[arg(long, default_value_t = 40)]
    n_t: usize,

    /// number of observation parameters
    #[arg(long, default_value_t = 1)]
    n_phi: usize,

    /// number of evolution parameters
    #[arg(long, default_value_t = 3)]
    n_theta: usize,

    /// observation noise standard deviation
    #[arg(long, default_value_t = 0.5)]
    noise_sd: f64,

    /// hyperparameter a0 in Gamma(a0,b0) of every block precision
    #[arg(long, default_value_t = 1.0)]
    a0: f64,

    /// hyperparameter b0 in Gamma(a0,b0) of every block precision
    #[arg(long, default_value_t = 1.0)]
    b0: f64,

    /// options in a JSON file (see `HyperOptions`); flags below override it
    #[arg(long, short = 'c')]
    config: Option<Box<str>>,

    /// convergence tolerance on the free energy
    #[arg(long)]
    tol_fun: Option<f64>,

    /// maximum number of outer iterations
    #[arg(long)]
    max_iter: Option<usize>,

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
struct HyperOutput<'a> {
    truth: &'a BlockMap<DVec>,
    result: &'a HyperResult,
}

/// Simulate one unit and run the hyperparameter inversion
pub fn run_hyper(args: HyperArgs) -> anyhow::Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let mut options: HyperOptions = read_json_options(args.config.as_deref())?;
    if let Some(tol_fun) = args.tol_fun {
        options.tol_fun = tol_fun;
    }
    if args.max_iter.is_some() {
        options.max_iter = args.max_iter;
    }
    options.display_win = args.progress;
    options.verbose = options.verbose || args.verbose;
    options.validate()?;

    let mut sim = simulate_linear_gaussian(&SimArgs {
        n_units: 1,
        n_t: args.n_t,
        n_phi: args.n_phi,
        n_theta: args.n_theta,
        between_sd: 0.0,
        noise_sd: args.noise_sd,
        rseed: args.seed,
    })?;
    let data = sim
        .units
        .pop()
        .ok_or(anyhow::anyhow!("no simulated unit"))?;

    let engine = LinearGaussianEngine::new(sim.designs.clone())?;
    let dims = DimsSpec::new(args.n_phi, args.n_theta, 0);

    let hyperpriors: BlockMap<(f64, f64)> = BlockTag::ALL
        .into_iter()
        .map(|tag| (tag, (args.a0, args.b0)))
        .collect();

    let max_iter = options.max_iter.unwrap_or(engine.default_max_iter());
    let mut observer: Box<dyn IterationObserver> = if args.progress {
        Box::new(ProgressObserver::new(max_iter, true))
    } else {
        Box::new(LogObserver::default())
    };

    let result = HyperInversion::new(&engine, options).run(
        &data,
        &dims,
        None,
        Some(hyperpriors),
        observer.as_mut(),
    )?;

    for (tag, block) in result.hyper.iter() {
        info!(
            "{}: prior precision Gamma({:.2}, {:.3}), mean {:.4}",
            tag,
            block.shape(),
            block.rate(),
            block.shape() / block.rate()
        );
    }
    info!(
        "R2 = {:.4}, {} iteration(s), {:.3}s",
        result.fit.diagnostics.fit.r2, result.iterations, result.elapsed_secs
    );

    let file = write_json(
        &HyperOutput {
            truth: &sim.population_mean,
            result: &result,
        },
        &args.out,
    )?;
    info!("wrote {}", file);
    Ok(())
}
