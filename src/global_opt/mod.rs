//! Global optimization over bounded linear parameter space.
//!
//! The global stage searches the full box given by the parameter bounds with a
//! population-based, derivative-free method. Its best point seeds the local
//! refinement stage. Every generation is reported through an
//! [`IterationObserver`](crate::observer::IterationObserver) so the history store can
//! record it as it happens.

use ndarray::Array1;
use rand::seq::SliceRandom;
use rand::Rng;
use std::fmt;

use crate::curve::SimulatedCurve;
use crate::error::{FitError, Result};
use crate::objective::Objective;
use crate::observer::IterationObserver;

mod differential_evolution;
mod parallel;

pub use differential_evolution::{DEStrategy, DeConfig, DifferentialEvolution, Initialization};
pub use parallel::{evaluate_population_parallel, PopulationEvaluator};

/// Trait for global optimization methods.
pub trait GlobalOptimizer {
    /// Run the optimization and return the best solution found.
    ///
    /// # Arguments
    ///
    /// * `objective` - The objective to minimise, over linear parameter values
    /// * `bounds` - Lower and upper bounds for each parameter
    /// * `observer` - Notified once per generation with the best point so far
    ///
    /// # Returns
    ///
    /// * The best solution found and its cost
    fn optimize<O, W>(
        &self,
        objective: &mut O,
        bounds: &[(f64, f64)],
        observer: &mut W,
    ) -> Result<GlobalOptResult>
    where
        O: Objective + Send,
        W: IterationObserver;
}

/// Why a global search stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Population spread fell below the tolerance
    Converged,

    /// Best cost did not improve for the configured number of generations
    Stalled,

    /// Generation limit reached
    MaxGenerations,
}

impl Termination {
    /// Whether the search stopped on its own criterion rather than the limit.
    pub fn is_success(&self) -> bool {
        !matches!(self, Termination::MaxGenerations)
    }
}

/// Result of a global optimization.
#[derive(Debug, Clone)]
pub struct GlobalOptResult {
    /// The best parameters found
    pub params: Array1<f64>,

    /// The best cost found
    pub cost: f64,

    /// The number of generations evolved after the initial population
    pub iterations: usize,

    /// The number of objective evaluations
    pub func_evals: usize,

    /// Whether the optimization converged
    pub success: bool,

    pub termination: Termination,

    /// A message describing the result
    pub message: String,

    /// Curve simulated at `params`
    pub curve: Option<SimulatedCurve>,

    /// Best cost after each generation, starting with the initial population
    pub history: Vec<f64>,
}

impl fmt::Display for GlobalOptResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Global Optimization Result:")?;
        writeln!(f, "  Success: {}", self.success)?;
        writeln!(f, "  Cost: {:.6e}", self.cost)?;
        writeln!(f, "  Generations: {}", self.iterations)?;
        writeln!(f, "  Function evaluations: {}", self.func_evals)?;
        writeln!(f, "  Message: {}", self.message)?;
        writeln!(f, "  Parameters: {:?}", self.params)?;
        Ok(())
    }
}

/// Check that bounds are usable for sampling.
fn validate_bounds(bounds: &[(f64, f64)], n_params: usize) -> Result<()> {
    if n_params != bounds.len() {
        return Err(FitError::DimensionMismatch(format!(
            "Expected {} bounds for parameters, got {}",
            n_params,
            bounds.len()
        )));
    }
    for (i, (min, max)) in bounds.iter().enumerate() {
        if !min.is_finite() || !max.is_finite() || min >= max {
            return Err(FitError::InvalidInput(format!(
                "bounds #{} must be finite with lower < upper, got ({}, {})",
                i, min, max
            )));
        }
    }
    Ok(())
}

/// Generate a random point within the given bounds.
///
/// # Arguments
///
/// * `bounds` - Lower and upper bounds for each parameter
/// * `rng` - Random number generator
///
/// # Returns
///
/// * A random point within the bounds
fn random_point(bounds: &[(f64, f64)], rng: &mut impl Rng) -> Array1<f64> {
    bounds
        .iter()
        .map(|(min, max)| rng.gen_range(*min..*max))
        .collect()
}

/// Latin hypercube sample of `pop_size` points.
///
/// Each dimension is split into `pop_size` equal strata and every stratum receives
/// exactly one point; strata are paired across dimensions by independent shuffles.
fn latin_hypercube(bounds: &[(f64, f64)], pop_size: usize, rng: &mut impl Rng) -> Vec<Array1<f64>> {
    let segment = 1.0 / pop_size as f64;
    let mut population = vec![Array1::zeros(bounds.len()); pop_size];

    for (j, (min, max)) in bounds.iter().enumerate() {
        let mut strata: Vec<usize> = (0..pop_size).collect();
        strata.shuffle(rng);
        for (point, stratum) in population.iter_mut().zip(strata) {
            let u = (stratum as f64 + rng.gen::<f64>()) * segment;
            point[j] = min + u * (max - min);
        }
    }

    population
}

/// Clip a point to the given bounds.
///
/// # Arguments
///
/// * `point` - The point to clip
/// * `bounds` - Lower and upper bounds for each parameter
///
/// # Returns
///
/// * The clipped point
fn clip_to_bounds(point: &Array1<f64>, bounds: &[(f64, f64)]) -> Array1<f64> {
    point
        .iter()
        .zip(bounds.iter())
        .map(|(&v, (min, max))| v.clamp(*min, *max))
        .collect()
}

/// Mean and standard deviation of population costs.
fn population_spread(costs: &[f64]) -> (f64, f64) {
    let n = costs.len() as f64;
    let mean = costs.iter().sum::<f64>() / n;
    let var = costs.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}
