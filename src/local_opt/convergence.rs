//! Convergence criteria for the local optimizer.
//!
//! This module defines the criteria used to determine when the SQP iteration has
//! converged to a solution.

use ndarray::Array1;

/// Possible convergence states for the local optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    /// The algorithm is still running.
    Running,

    /// The algorithm has converged due to a small parameter change.
    ParameterConvergence,

    /// The algorithm has converged due to a small function value change.
    FunctionValueConvergence,

    /// The algorithm has converged due to a small projected gradient.
    GradientConvergence,

    /// The algorithm has terminated due to reaching the maximum number of iterations.
    MaxIterationsReached,

    /// No step along the search direction decreased the objective enough.
    LineSearchFailure,

    /// The algorithm has terminated due to a numerical error.
    NumericalError,

    /// The start point scored the failure penalty, so no model could be built.
    StartPointFailed,
}

impl ConvergenceStatus {
    /// Returns true if the optimization has terminated (either converged or failed).
    pub fn is_terminated(&self) -> bool {
        !matches!(self, ConvergenceStatus::Running)
    }

    /// Returns true if the optimization has converged.
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            ConvergenceStatus::ParameterConvergence
                | ConvergenceStatus::FunctionValueConvergence
                | ConvergenceStatus::GradientConvergence
        )
    }

    /// Returns a description of the convergence status.
    pub fn description(&self) -> &'static str {
        match self {
            ConvergenceStatus::Running => "Optimization is still running",
            ConvergenceStatus::ParameterConvergence => "Converged: small parameter change",
            ConvergenceStatus::FunctionValueConvergence => "Converged: small function value change",
            ConvergenceStatus::GradientConvergence => "Converged: small projected gradient",
            ConvergenceStatus::MaxIterationsReached => "Terminated: maximum iterations reached",
            ConvergenceStatus::LineSearchFailure => "Terminated: line search found no decrease",
            ConvergenceStatus::NumericalError => "Terminated: numerical error",
            ConvergenceStatus::StartPointFailed => "Terminated: start point could not be evaluated",
        }
    }
}

/// Criteria for determining when the local optimizer has converged.
#[derive(Debug, Clone)]
pub struct ConvergenceCriteria {
    /// Tolerance for change in parameter values.
    pub xtol: f64,

    /// Tolerance for change in function value.
    pub ftol: f64,

    /// Tolerance for projected gradient max-norm.
    pub gtol: f64,

    /// Maximum number of iterations.
    pub max_iterations: usize,
}

impl ConvergenceCriteria {
    /// Creates a new set of convergence criteria with the given tolerances.
    pub fn new(xtol: f64, ftol: f64, gtol: f64, max_iterations: usize) -> Self {
        Self {
            xtol,
            ftol,
            gtol,
            max_iterations,
        }
    }

    /// Whether a step of max-norm `step` is below the parameter tolerance.
    pub fn is_negligible_step(&self, step: f64) -> bool {
        step < self.xtol
    }

    /// Checks whether the optimization has converged after an accepted step.
    ///
    /// # Arguments
    ///
    /// * `params` - The previous parameter values
    /// * `new_params` - The accepted parameter values
    /// * `cost` - The previous function value
    /// * `new_cost` - The accepted function value
    /// * `gradient_norm` - Max-norm of the projected gradient at `new_params`
    /// * `iterations` - The number of iterations so far
    ///
    /// # Returns
    ///
    /// * The convergence status
    pub fn check(
        &self,
        params: &Array1<f64>,
        new_params: &Array1<f64>,
        cost: f64,
        new_cost: f64,
        gradient_norm: f64,
        iterations: usize,
    ) -> ConvergenceStatus {
        if !new_cost.is_finite() || !gradient_norm.is_finite() {
            return ConvergenceStatus::NumericalError;
        }

        if gradient_norm < self.gtol {
            return ConvergenceStatus::GradientConvergence;
        }

        let param_change = new_params
            .iter()
            .zip(params.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        if self.is_negligible_step(param_change) {
            return ConvergenceStatus::ParameterConvergence;
        }

        let scale = cost.abs().max(new_cost.abs()).max(1.0);
        if (cost - new_cost).abs() <= self.ftol * scale {
            return ConvergenceStatus::FunctionValueConvergence;
        }

        if iterations >= self.max_iterations {
            return ConvergenceStatus::MaxIterationsReached;
        }

        ConvergenceStatus::Running
    }
}
