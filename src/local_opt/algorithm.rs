//! Bounded sequential quadratic programming.
//!
//! Each iteration builds a quadratic model of the objective from a
//! finite-difference gradient and a BFGS Hessian approximation, solves the
//! box-constrained subproblem for a step, and backtracks along it until the
//! Armijo condition holds. The Hessian update uses Powell damping so the
//! approximation stays positive definite even where the curvature condition fails.

use ndarray::{Array1, Array2};
use std::fmt;
use tracing::{debug, info, warn};

use super::config::SqpConfig;
use super::convergence::{ConvergenceCriteria, ConvergenceStatus};
use super::finite_difference::forward_gradient;
use super::qp::solve_box_qp;
use crate::curve::SimulatedCurve;
use crate::error::{FitError, Result};
use crate::objective::{EvalKey, Evaluation, Objective, Stage};
use crate::observer::{IterationEvent, IterationObserver};

/// Result of a local optimization.
#[derive(Debug, Clone)]
pub struct LocalOptResult {
    /// Final parameters, in the optimizer's own units
    pub params: Array1<f64>,

    /// Objective value at `params`
    pub cost: f64,

    /// Number of accepted iterates
    pub iterations: usize,

    /// Number of fresh (non-cached) objective evaluations
    pub func_evals: usize,

    pub status: ConvergenceStatus,

    /// Whether a convergence criterion was met
    pub success: bool,

    pub message: String,

    /// Curve simulated at `params`
    pub curve: Option<SimulatedCurve>,

    /// Objective value at the start point and after every accepted iterate
    pub history: Vec<f64>,
}

impl fmt::Display for LocalOptResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Local Optimization Result:")?;
        writeln!(f, "  Success: {}", self.success)?;
        writeln!(f, "  Cost: {:.6e}", self.cost)?;
        writeln!(f, "  Iterations: {}", self.iterations)?;
        writeln!(f, "  Function evaluations: {}", self.func_evals)?;
        writeln!(f, "  Message: {}", self.message)?;
        writeln!(f, "  Parameters: {:?}", self.params)?;
        Ok(())
    }
}

/// Bounded SQP optimizer with BFGS updates.
#[derive(Debug, Clone, Default)]
pub struct SqpOptimizer {
    pub config: SqpConfig,
}

/// Mutable state of one run.
struct State {
    x: Array1<f64>,
    f: f64,
    gradient: Array1<f64>,
    curve: Option<SimulatedCurve>,
    func_evals: usize,
}

impl SqpOptimizer {
    pub fn new(config: SqpConfig) -> Self {
        Self { config }
    }

    /// Minimise `objective` from `x0` inside `bounds`.
    ///
    /// The start point is clipped into the bounds and reported to `observer` as
    /// iteration 0. Each accepted iterate is evaluated once more (normally a cache hit)
    /// to obtain its curve, then reported before the next gradient is computed.
    ///
    /// Non-convergence is not an error: the last accepted iterate is returned with
    /// `success == false`.
    ///
    /// # Arguments
    ///
    /// * `objective` - The objective to minimise
    /// * `x0` - Start point
    /// * `bounds` - Lower and upper bounds for each parameter
    /// * `observer` - Notified once per accepted iterate
    pub fn minimize<O, W>(
        &self,
        objective: &mut O,
        x0: &Array1<f64>,
        bounds: &[(f64, f64)],
        observer: &mut W,
    ) -> Result<LocalOptResult>
    where
        O: Objective,
        W: IterationObserver,
    {
        let n = objective.parameter_count();
        if x0.len() != n || bounds.len() != n {
            return Err(FitError::DimensionMismatch(format!(
                "Expected {} parameters and bounds, got {} and {}",
                n,
                x0.len(),
                bounds.len()
            )));
        }
        if bounds.iter().any(|(lo, hi)| !lo.is_finite() || !hi.is_finite() || lo >= hi) {
            return Err(FitError::InvalidInput(
                "local bounds must be finite with lower < upper".to_string(),
            ));
        }

        let lower: Array1<f64> = bounds.iter().map(|b| b.0).collect();
        let upper: Array1<f64> = bounds.iter().map(|b| b.1).collect();
        let clip = |x: &Array1<f64>| -> Array1<f64> {
            x.iter()
                .zip(bounds)
                .map(|(&v, (lo, hi))| v.clamp(*lo, *hi))
                .collect()
        };

        let criteria = ConvergenceCriteria::new(
            self.config.xtol,
            self.config.ftol,
            self.config.gtol,
            self.config.max_iterations,
        );

        let x = clip(x0);
        let start = objective.evaluate(&x, EvalKey::new(Stage::Local, 0, 0))?;
        let start_failure = start.failure.clone();
        let mut state = State {
            f: start.error,
            curve: start.curve,
            gradient: Array1::zeros(n),
            func_evals: usize::from(!start.cached),
            x,
        };
        notify(observer, 0, &state)?;

        if let Some(failure) = start_failure {
            warn!(%failure, cost = state.f, "start point of local refinement failed to evaluate");
            let status = ConvergenceStatus::StartPointFailed;
            return Ok(LocalOptResult {
                cost: state.f,
                iterations: 0,
                func_evals: state.func_evals,
                success: false,
                message: format!("{} ({})", status.description(), failure),
                status,
                curve: state.curve,
                history: vec![state.f],
                params: state.x,
            });
        }

        let estimate =
            forward_gradient(objective, &state.x, state.f, bounds, self.config.fd_step, 0)?;
        state.gradient = estimate.gradient;
        state.func_evals += estimate.evaluations;

        let mut history = vec![state.f];
        let mut hessian = Array2::<f64>::eye(n);
        let mut iteration = 0;
        let line_search_offset = 1 + 2 * n;

        let mut status =
            if projected_gradient_norm(&state.x, &state.gradient, bounds) < self.config.gtol {
                ConvergenceStatus::GradientConvergence
            } else if self.config.max_iterations == 0 {
                ConvergenceStatus::MaxIterationsReached
            } else if !state.f.is_finite() {
                ConvergenceStatus::NumericalError
            } else {
                ConvergenceStatus::Running
            };

        while !status.is_terminated() {
            iteration += 1;

            let mut direction = self.search_direction(&hessian, &state, &lower, &upper);
            let mut slope = state.gradient.dot(&direction);
            if !(slope < 0.0) {
                // Stale curvature; restart from steepest descent
                hessian = Array2::eye(n);
                direction = self.search_direction(&hessian, &state, &lower, &upper);
                slope = state.gradient.dot(&direction);
                if !(slope < 0.0) {
                    status = ConvergenceStatus::GradientConvergence;
                    break;
                }
            }

            // Backtracking line search, abandoned once the step is below xtol
            let step_norm = direction.iter().fold(0.0, |m: f64, d| m.max(d.abs()));
            let mut alpha = 1.0;
            let mut accepted: Option<(Array1<f64>, f64)> = None;
            let mut negligible = false;
            for k in 0..self.config.max_line_search {
                if criteria.is_negligible_step(alpha * step_norm) {
                    negligible = true;
                    break;
                }
                let candidate = clip(&(&state.x + &(&direction * alpha)));
                let key = EvalKey::new(Stage::Local, iteration, line_search_offset + k);
                let evaluation = objective.evaluate(&candidate, key)?;
                state.func_evals += usize::from(!evaluation.cached);

                if evaluation.error <= state.f + self.config.armijo * alpha * slope {
                    accepted = Some((candidate, evaluation.error));
                    break;
                }
                alpha *= self.config.backtrack;
            }

            let Some((x_new, _)) = accepted else {
                if negligible {
                    debug!(iteration, cost = state.f, "no decrease above the step tolerance");
                    status = ConvergenceStatus::ParameterConvergence;
                } else {
                    warn!(iteration, cost = state.f, "line search failed");
                    status = ConvergenceStatus::LineSearchFailure;
                }
                break;
            };

            // Re-evaluate at the accepted iterate to get its error and curve
            let evaluation: Evaluation =
                objective.evaluate(&x_new, EvalKey::new(Stage::Local, iteration, 0))?;
            state.func_evals += usize::from(!evaluation.cached);

            let estimate = forward_gradient(
                objective,
                &x_new,
                evaluation.error,
                bounds,
                self.config.fd_step,
                iteration,
            )?;
            state.func_evals += estimate.evaluations;

            let s = &x_new - &state.x;
            let y = &estimate.gradient - &state.gradient;
            damped_bfgs_update(&mut hessian, &s, &y);

            let pg_norm = projected_gradient_norm(&x_new, &estimate.gradient, bounds);
            status = criteria.check(
                &state.x,
                &x_new,
                state.f,
                evaluation.error,
                pg_norm,
                iteration,
            );

            state.x = x_new;
            state.f = evaluation.error;
            state.curve = evaluation.curve;
            state.gradient = estimate.gradient;
            history.push(state.f);

            info!(iteration, cost = state.f, projected_gradient = pg_norm, "accepted iterate");
            notify(observer, iteration, &state)?;
        }

        debug!(?status, iterations = iteration, func_evals = state.func_evals, "local refinement finished");

        // history holds the start point plus one entry per accepted step
        let iterations = history.len() - 1;

        Ok(LocalOptResult {
            params: state.x,
            cost: state.f,
            iterations,
            func_evals: state.func_evals,
            success: status.is_converged(),
            message: status.description().to_string(),
            status,
            curve: state.curve,
            history,
        })
    }

    /// QP step for the current model, falling back to projected steepest descent
    /// if the subproblem cannot be solved.
    fn search_direction(
        &self,
        hessian: &Array2<f64>,
        state: &State,
        lower: &Array1<f64>,
        upper: &Array1<f64>,
    ) -> Array1<f64> {
        let step_lower = lower - &state.x;
        let step_upper = upper - &state.x;
        match solve_box_qp(hessian, &state.gradient, &step_lower, &step_upper) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "QP subproblem failed, using steepest descent");
                state
                    .gradient
                    .iter()
                    .zip(step_lower.iter().zip(step_upper.iter()))
                    .map(|(g, (lo, hi))| (-g).clamp(*lo, *hi))
                    .collect()
            }
        }
    }
}

/// Max-norm of the gradient with components pointing out of active bounds removed.
pub fn projected_gradient_norm(x: &Array1<f64>, gradient: &Array1<f64>, bounds: &[(f64, f64)]) -> f64 {
    x.iter()
        .zip(gradient.iter())
        .zip(bounds)
        .map(|((&xi, &gi), (lo, hi))| {
            if (xi <= *lo && gi > 0.0) || (xi >= *hi && gi < 0.0) {
                0.0
            } else {
                gi.abs()
            }
        })
        .fold(0.0, f64::max)
}

/// BFGS update with Powell damping.
///
/// `B ← B − (Bs)(Bs)ᵀ / sᵀBs + r rᵀ / sᵀr`, where `r = θy + (1 − θ)Bs` and θ is
/// chosen so that `sᵀr ≥ 0.2 sᵀBs`.
pub fn damped_bfgs_update(hessian: &mut Array2<f64>, s: &Array1<f64>, y: &Array1<f64>) {
    let bs = hessian.dot(s);
    let sbs = s.dot(&bs);
    let sy = s.dot(y);
    if !(sbs > f64::EPSILON) || !sy.is_finite() {
        return;
    }

    let theta = if sy >= 0.2 * sbs {
        1.0
    } else {
        0.8 * sbs / (sbs - sy)
    };
    let r = y * theta + &bs * (1.0 - theta);
    let sr = s.dot(&r);
    if !(sr > f64::EPSILON) {
        return;
    }

    let n = s.len();
    for i in 0..n {
        for j in 0..n {
            hessian[[i, j]] += r[i] * r[j] / sr - bs[i] * bs[j] / sbs;
        }
    }
}

fn notify<W: IterationObserver>(observer: &mut W, index: usize, state: &State) -> Result<()> {
    observer.on_iteration(&IterationEvent {
        stage: Stage::Local,
        index,
        error: state.f,
        params: &state.x,
        curve: state.curve.as_ref(),
    })
}
