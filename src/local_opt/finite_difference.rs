//! Finite difference gradients of an [`Objective`].
//!
//! Every probe is a full objective evaluation (for the fitting objective, one
//! simulator run), so only forward differences are used: `n` extra evaluations per
//! gradient instead of `2n`.

use ndarray::Array1;
use tracing::warn;

use crate::error::Result;
use crate::objective::{EvalKey, Objective, Stage};

/// Gradient together with the number of fresh evaluations it cost.
#[derive(Debug, Clone)]
pub struct GradientEstimate {
    pub gradient: Array1<f64>,
    pub evaluations: usize,
}

/// Compute the gradient of an objective using forward finite differences.
///
/// The step for component `j` is `epsilon * max(|x_j|, 1)`. A probe that would
/// leave the bounds is taken backwards instead. If a probe is penalised by the
/// objective, the opposite direction is tried; a component for which both fail is
/// set to zero.
///
/// # Arguments
///
/// * `objective` - The objective to differentiate
/// * `params` - The point at which to evaluate the gradient
/// * `f0` - Objective value at `params`
/// * `bounds` - Lower and upper bounds for each parameter
/// * `epsilon` - Relative step size
/// * `iteration` - Iteration index used for the probes' evaluation keys
///
/// # Returns
///
/// * The gradient vector and the evaluation count
pub fn forward_gradient<O: Objective>(
    objective: &mut O,
    params: &Array1<f64>,
    f0: f64,
    bounds: &[(f64, f64)],
    epsilon: f64,
    iteration: usize,
) -> Result<GradientEstimate> {
    let n_params = params.len();
    let mut gradient = Array1::zeros(n_params);
    let mut evaluations = 0;

    for j in 0..n_params {
        let (lower, upper) = bounds[j];
        let h = epsilon * params[j].abs().max(1.0);
        let forward_first = params[j] + h <= upper;
        let directions = if forward_first { [h, -h] } else { [-h, h] };

        let mut component = None;
        for (attempt, &step) in directions.iter().enumerate() {
            let x = params[j] + step;
            if x < lower || x > upper {
                continue;
            }

            let mut probe = params.clone();
            probe[j] = x;
            let key = EvalKey::new(Stage::Local, iteration, 1 + j * 2 + attempt);
            let evaluation = objective.evaluate(&probe, key)?;
            if !evaluation.cached {
                evaluations += 1;
            }
            if !evaluation.is_failure() {
                component = Some((evaluation.error - f0) / step);
                break;
            }
        }

        gradient[j] = component.unwrap_or_else(|| {
            warn!(component = j, iteration, "no usable finite-difference probe, using zero");
            0.0
        });
    }

    Ok(GradientEstimate {
        gradient,
        evaluations,
    })
}
