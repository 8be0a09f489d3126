mod cli_io;
mod run_group;
mod run_hyper;

use crate::run_group::*;
use crate::run_hyper::*;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Mixed-effects inversion of simulated linear-Gaussian units
    Group(GroupArgs),

    /// Hyperparameter inversion of one simulated linear-Gaussian unit
    Hyper(HyperArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Group(args) => {
            run_group(args.clone())?;
        }
        Commands::Hyper(args) => {
            run_hyper(args.clone())?;
        }
    }

    Ok(())
}
