//! Configuration options for the local SQP refinement.

use serde::{Deserialize, Serialize};

/// Configuration options for [`SqpOptimizer`](super::SqpOptimizer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqpConfig {
    /// Maximum number of accepted iterates. Default: 100
    pub max_iterations: usize,

    /// Tolerance for change in objective value, relative to `max(|f|, 1)`. Default: 1e-8
    pub ftol: f64,

    /// Tolerance for the max-norm of the projected gradient. Default: 1e-6
    pub gtol: f64,

    /// Tolerance for the largest parameter change. Default: 1e-10
    pub xtol: f64,

    /// Relative forward-difference step. Default: 1e-6
    pub fd_step: f64,

    /// Maximum number of backtracking steps per line search. Backtracking also stops
    /// once the trial step falls below `xtol`. Default: 40
    pub max_line_search: usize,

    /// Sufficient-decrease constant of the Armijo condition. Default: 1e-4
    pub armijo: f64,

    /// Step shrink factor during backtracking. Default: 0.5
    pub backtrack: f64,
}

impl Default for SqpConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            ftol: 1e-8,
            gtol: 1e-6,
            xtol: 1e-10,
            fd_step: 1e-6,
            max_line_search: 40,
            armijo: 1e-4,
            backtrack: 0.5,
        }
    }
}

impl SqpConfig {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_ftol(mut self, ftol: f64) -> Self {
        self.ftol = ftol;
        self
    }

    pub fn with_gtol(mut self, gtol: f64) -> Self {
        self.gtol = gtol;
        self
    }

    pub fn with_xtol(mut self, xtol: f64) -> Self {
        self.xtol = xtol;
        self
    }

    pub fn with_fd_step(mut self, fd_step: f64) -> Self {
        self.fd_step = fd_step;
        self
    }
}
