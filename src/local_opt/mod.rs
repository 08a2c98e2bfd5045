//! Local refinement with bounded sequential quadratic programming.
//!
//! The local stage starts from the global optimum and polishes it with a
//! quasi-Newton method. Gradients come from forward finite differences, so each
//! iteration costs roughly `n + 2` objective evaluations. For the circuit fit the
//! objective is wrapped in [`LogScaled`](crate::objective::LogScaled) so the search
//! runs over `log10` parameter values, where component values spanning many decades
//! are equally well conditioned.

mod algorithm;
mod config;
mod convergence;
mod finite_difference;
mod qp;

pub use algorithm::{damped_bfgs_update, projected_gradient_norm, LocalOptResult, SqpOptimizer};
pub use config::SqpConfig;
pub use convergence::{ConvergenceCriteria, ConvergenceStatus};
pub use finite_difference::{forward_gradient, GradientEstimate};
pub use qp::solve_box_qp;
