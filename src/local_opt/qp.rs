//! Box-constrained quadratic subproblem.
//!
//! Solves
//!
//! ```text
//! minimise   gᵀd + ½ dᵀBd
//! subject to lower ≤ d ≤ upper
//! ```
//!
//! for a symmetric positive definite `B` with a primal active-set method. Free
//! variables are solved for with a Cholesky factorisation (nalgebra); a variable is
//! fixed when a step would cross its bound and released when its multiplier has the
//! wrong sign. `d = 0` must be feasible, which holds whenever the current iterate
//! lies inside the bounds.

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2};

use crate::error::{FitError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activity {
    Free,
    AtLower,
    AtUpper,
}

/// Solve the box-constrained QP.
///
/// # Arguments
///
/// * `hessian` - Symmetric positive definite `n × n` matrix `B`
/// * `gradient` - Linear term `g`
/// * `lower` - Lower step bounds (each ≤ 0)
/// * `upper` - Upper step bounds (each ≥ 0)
///
/// # Errors
///
/// `FitError::LinearAlgebra` if a reduced Hessian is not positive definite.
pub fn solve_box_qp(
    hessian: &Array2<f64>,
    gradient: &Array1<f64>,
    lower: &Array1<f64>,
    upper: &Array1<f64>,
) -> Result<Array1<f64>> {
    let n = gradient.len();
    if hessian.dim() != (n, n) || lower.len() != n || upper.len() != n {
        return Err(FitError::DimensionMismatch(format!(
            "QP with {} variables got a {:?} Hessian and bounds of length {}/{}",
            n,
            hessian.shape(),
            lower.len(),
            upper.len()
        )));
    }

    let mut d = Array1::<f64>::zeros(n);
    let mut activity = vec![Activity::Free; n];
    let max_iterations = 10 * n + 10;

    for _ in 0..max_iterations {
        let target = solve_free(hessian, gradient, &d, &activity)?;

        // Largest fraction of the way to the target that stays feasible
        let mut alpha = 1.0;
        let mut blocking = None;
        for i in 0..n {
            if activity[i] != Activity::Free {
                continue;
            }
            let delta = target[i] - d[i];
            if delta < 0.0 && target[i] < lower[i] {
                let a = (lower[i] - d[i]) / delta;
                if a < alpha {
                    alpha = a;
                    blocking = Some((i, Activity::AtLower));
                }
            } else if delta > 0.0 && target[i] > upper[i] {
                let a = (upper[i] - d[i]) / delta;
                if a < alpha {
                    alpha = a;
                    blocking = Some((i, Activity::AtUpper));
                }
            }
        }

        if let Some((i, bound)) = blocking {
            let alpha = alpha.max(0.0);
            for j in 0..n {
                if activity[j] == Activity::Free {
                    d[j] += alpha * (target[j] - d[j]);
                }
            }
            activity[i] = bound;
            d[i] = if bound == Activity::AtLower { lower[i] } else { upper[i] };
            continue;
        }

        d = target;

        // Multipliers of the active bounds: the model gradient must push into them
        let model_grad = gradient + &hessian.dot(&d);
        let mut worst: Option<(usize, f64)> = None;
        for i in 0..n {
            let violation = match activity[i] {
                Activity::AtLower if model_grad[i] < 0.0 => -model_grad[i],
                Activity::AtUpper if model_grad[i] > 0.0 => model_grad[i],
                _ => continue,
            };
            if worst.map_or(true, |(_, w)| violation > w) {
                worst = Some((i, violation));
            }
        }

        match worst {
            Some((i, _)) => activity[i] = Activity::Free,
            None => return Ok(d),
        }
    }

    Ok(d)
}

/// Minimiser of the model over the free variables with the others held fixed.
fn solve_free(
    hessian: &Array2<f64>,
    gradient: &Array1<f64>,
    d: &Array1<f64>,
    activity: &[Activity],
) -> Result<Array1<f64>> {
    let free: Vec<usize> = (0..activity.len())
        .filter(|&i| activity[i] == Activity::Free)
        .collect();
    let mut target = d.clone();
    if free.is_empty() {
        return Ok(target);
    }

    let k = free.len();
    let reduced = DMatrix::from_fn(k, k, |r, c| hessian[[free[r], free[c]]]);
    let rhs = DVector::from_fn(k, |r, _| {
        let i = free[r];
        let fixed: f64 = (0..activity.len())
            .filter(|&j| activity[j] != Activity::Free)
            .map(|j| hessian[[i, j]] * d[j])
            .sum();
        -(gradient[i] + fixed)
    });

    let solution = reduced
        .cholesky()
        .ok_or_else(|| FitError::LinearAlgebra("reduced Hessian is not positive definite".to_string()))?
        .solve(&rhs);

    for (r, &i) in free.iter().enumerate() {
        target[i] = solution[r];
    }
    Ok(target)
}
