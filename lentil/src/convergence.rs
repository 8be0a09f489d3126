use crate::common::*;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tolerated decrease of the free energy before a warning
const DECREASE_WARN_TOL: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceStatus {
    Init,
    Iterating,
    Converged,
    MaxIterReached,
}

impl ConvergenceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConvergenceStatus::Converged | ConvergenceStatus::MaxIterReached
        )
    }
}

impl fmt::Display for ConvergenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConvergenceStatus::Init => "init",
            ConvergenceStatus::Iterating => "iterating",
            ConvergenceStatus::Converged => "converged",
            ConvergenceStatus::MaxIterReached => "max_iter_reached",
        };
        write!(f, "{}", s)
    }
}

/// Free-energy history and the stopping rule of an outer loop.
///
/// Entry 0 is the baseline; each later entry is one outer iteration.
/// Stops when `|F(it) - F(it - 1)| <= tol` or `it >= max_iter`.
#[derive(Debug, Clone)]
pub struct ConvergenceMonitor {
    tol: f64,
    max_iter: usize,
    history: Vec<f64>,
    status: ConvergenceStatus,
}

impl ConvergenceMonitor {
    pub fn new(tol: f64, max_iter: usize) -> Self {
        Self {
            tol,
            max_iter,
            history: vec![],
            status: ConvergenceStatus::Init,
        }
    }

    /// Record the baseline F(0)
    pub fn start(&mut self, baseline: f64) -> ConvergenceStatus {
        debug_assert!(self.history.is_empty());
        self.history.push(baseline);
        self.status = if self.max_iter == 0 {
            ConvergenceStatus::MaxIterReached
        } else {
            ConvergenceStatus::Iterating
        };
        self.status
    }

    /// Record F(it) of the iteration just finished
    pub fn push(&mut self, free_energy: f64) -> ConvergenceStatus {
        debug_assert!(!self.history.is_empty());
        let prev = self.history.last().copied().unwrap_or(f64::NEG_INFINITY);
        self.history.push(free_energy);

        let delta = free_energy - prev;
        if delta < -DECREASE_WARN_TOL {
            warn!(
                "free energy decreased at iteration {}: {:.6} -> {:.6}",
                self.iterations(),
                prev,
                free_energy
            );
        }

        self.status = if delta.abs() <= self.tol {
            ConvergenceStatus::Converged
        } else if self.iterations() >= self.max_iter {
            ConvergenceStatus::MaxIterReached
        } else {
            ConvergenceStatus::Iterating
        };
        self.status
    }

    pub fn status(&self) -> ConvergenceStatus {
        self.status
    }

    /// Outer iterations after the baseline
    pub fn iterations(&self) -> usize {
        self.history.len().saturating_sub(1)
    }

    pub fn max_iter(&self) -> usize {
        self.max_iter
    }

    pub fn history(&self) -> &[f64] {
        &self.history
    }

    pub fn last(&self) -> Option<f64> {
        self.history.last().copied()
    }

    pub fn into_history(self) -> Vec<f64> {
        self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converged() {
        let mut mon = ConvergenceMonitor::new(0.1, 10);
        assert_eq!(mon.status(), ConvergenceStatus::Init);
        assert_eq!(mon.start(-100.0), ConvergenceStatus::Iterating);
        assert_eq!(mon.push(-50.0), ConvergenceStatus::Iterating);
        assert_eq!(mon.push(-49.95), ConvergenceStatus::Converged);
        assert_eq!(mon.iterations(), 2);
        assert_eq!(mon.history(), &[-100.0, -50.0, -49.95]);
        assert!(mon.status().is_terminal());
    }

    #[test]
    fn test_max_iter() {
        let mut mon = ConvergenceMonitor::new(1e-3, 2);
        mon.start(0.0);
        assert_eq!(mon.push(1.0), ConvergenceStatus::Iterating);
        assert_eq!(mon.push(2.0), ConvergenceStatus::MaxIterReached);

        // the tolerance wins when both hold
        let mut mon = ConvergenceMonitor::new(1e-3, 1);
        mon.start(0.0);
        assert_eq!(mon.push(0.0), ConvergenceStatus::Converged);
    }

    #[test]
    fn test_zero_max_iter_stops_after_baseline() {
        let mut mon = ConvergenceMonitor::new(1e-3, 0);
        assert_eq!(mon.start(-3.0), ConvergenceStatus::MaxIterReached);
        assert_eq!(mon.iterations(), 0);
        assert_eq!(mon.into_history(), vec![-3.0]);
    }

    #[test]
    fn test_decrease_is_not_convergence() {
        let mut mon = ConvergenceMonitor::new(0.01, 5);
        mon.start(0.0);
        assert_eq!(mon.push(-1.0), ConvergenceStatus::Iterating);
        assert_eq!(mon.last(), Some(-1.0));
    }
}
