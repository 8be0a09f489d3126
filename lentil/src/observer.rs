use crate::common::*;
use crate::convergence::ConvergenceStatus;

use indicatif::{ProgressBar, ProgressDrawTarget};

/// Receives the free energy after every outer iteration.
///
/// Iteration 0 is the baseline. Observers cannot change the course of the
/// inversion.
pub trait IterationObserver {
    fn on_iteration(&mut self, iteration: usize, free_energy: f64, status: ConvergenceStatus);

    fn on_finish(&mut self, _status: ConvergenceStatus, _iterations: usize) {}
}

pub struct NullObserver;

impl IterationObserver for NullObserver {
    fn on_iteration(&mut self, _iteration: usize, _free_energy: f64, _status: ConvergenceStatus) {}
}

/// One `info!` line per iteration
#[derive(Default)]
pub struct LogObserver {
    last: Option<f64>,
}

impl IterationObserver for LogObserver {
    fn on_iteration(&mut self, iteration: usize, free_energy: f64, status: ConvergenceStatus) {
        match self.last {
            Some(prev) => info!(
                "[{}] F = {:.4}, dF = {:.4} ({})",
                iteration,
                free_energy,
                free_energy - prev,
                status
            ),
            None => info!("[{}] F = {:.4} ({})", iteration, free_energy, status),
        }
        self.last = Some(free_energy);
    }

    fn on_finish(&mut self, status: ConvergenceStatus, iterations: usize) {
        info!("{} after {} iteration(s)", status, iterations);
    }
}

/// A progress bar over the outer iterations, hidden unless `show`
pub struct ProgressObserver {
    pb: ProgressBar,
}

impl ProgressObserver {
    pub fn new(max_iter: usize, show: bool) -> Self {
        let pb = ProgressBar::new(max_iter as u64);
        if !show {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }
        Self { pb }
    }
}

impl IterationObserver for ProgressObserver {
    fn on_iteration(&mut self, iteration: usize, free_energy: f64, _status: ConvergenceStatus) {
        self.pb.set_message(format!("F = {:.4}", free_energy));
        if iteration > 0 {
            self.pb.inc(1);
        }
    }

    fn on_finish(&mut self, _status: ConvergenceStatus, _iterations: usize) {
        self.pb.finish_and_clear();
    }
}
