//! Differential Evolution algorithm for global optimization.
//!
//! This module implements the Differential Evolution algorithm, a population-based
//! stochastic function minimizer that is particularly effective for global optimization.
//!
//! Trial vectors for a whole generation are produced first, from a single seeded
//! random stream, and only then evaluated. Evaluation order therefore cannot affect
//! the search, and serial and parallel runs with the same seed take identical paths.

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::curve::SimulatedCurve;
use crate::error::Result;
use crate::global_opt::parallel::PopulationEvaluator;
use crate::global_opt::{
    clip_to_bounds, latin_hypercube, population_spread, random_point, validate_bounds,
    GlobalOptResult, GlobalOptimizer, Termination,
};
use crate::objective::{Evaluation, Objective, Stage};
use crate::observer::{IterationEvent, IterationObserver};

/// Strategies for creating candidate solutions in Differential Evolution.
///
/// All strategies use binomial crossover with the target vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DEStrategy {
    /// DE/rand/1: x_r1 + F * (x_r2 - x_r3)
    Rand1,

    /// DE/rand/2: x_r1 + F * (x_r2 - x_r3) + F * (x_r4 - x_r5)
    Rand2,

    /// DE/best/1: x_best + F * (x_r1 - x_r2)
    #[default]
    Best1,

    /// DE/best/2: x_best + F * (x_r1 - x_r2) + F * (x_r3 - x_r4)
    Best2,

    /// DE/current-to-best/1: x_i + F * (x_best - x_i) + F * (x_r1 - x_r2)
    CurrentToBest1,
}

impl DEStrategy {
    /// Smallest population for which the strategy can draw its distinct members.
    pub fn min_population(&self) -> usize {
        match self {
            DEStrategy::Rand1 | DEStrategy::Best1 | DEStrategy::CurrentToBest1 => 4,
            DEStrategy::Rand2 | DEStrategy::Best2 => 6,
        }
    }
}

/// How the initial population is sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initialization {
    #[default]
    LatinHypercube,
    Random,
}

/// Configuration for [`DifferentialEvolution`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeConfig {
    /// Population size multiplier (population size = multiplier * parameter count)
    pub pop_size_multiplier: usize,

    /// Maximum number of generations after the initial population
    pub max_generations: usize,

    /// Relative convergence tolerance on the population cost spread
    pub tol: f64,

    /// Absolute convergence tolerance on the population cost spread
    pub atol: f64,

    /// Differential weight (F) range; a fresh value is drawn each generation.
    /// Equal ends give a constant weight.
    pub mutation: (f64, f64),

    /// Crossover probability (CR) in range [0, 1]
    pub recombination: f64,

    /// Strategy for creating candidate solutions
    pub strategy: DEStrategy,

    pub init: Initialization,

    /// Random seed
    pub seed: u64,

    /// Evaluate each generation on a thread pool
    pub parallel: bool,

    /// Thread count for parallel evaluation; rayon's default when `None`
    pub workers: Option<usize>,

    /// Stop after this many generations without improvement of the best cost
    pub max_stall_generations: Option<usize>,
}

impl Default for DeConfig {
    fn default() -> Self {
        Self {
            pop_size_multiplier: 15,
            max_generations: 1000,
            tol: 0.01,
            atol: 0.0,
            mutation: (0.5, 1.0),
            recombination: 0.7,
            strategy: DEStrategy::Best1,
            init: Initialization::LatinHypercube,
            seed: 42,
            parallel: false,
            workers: None,
            max_stall_generations: None,
        }
    }
}

/// Differential Evolution algorithm for global optimization.
///
/// Differential Evolution is a population-based stochastic function minimizer
/// that is effective for global optimization. It uses vector differences to
/// perturb the population.
#[derive(Debug, Clone, Default)]
pub struct DifferentialEvolution {
    pub config: DeConfig,
}

impl DifferentialEvolution {
    /// Create a new DifferentialEvolution optimizer with default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an optimizer from a configuration.
    pub fn with_config(config: DeConfig) -> Self {
        Self { config }
    }

    /// Set the population size multiplier.
    pub fn with_population_multiplier(mut self, multiplier: usize) -> Self {
        self.config.pop_size_multiplier = multiplier;
        self
    }

    /// Set the maximum number of generations.
    pub fn with_max_generations(mut self, generations: usize) -> Self {
        self.config.max_generations = generations;
        self
    }

    /// Set the relative and absolute convergence tolerances.
    pub fn with_tolerance(mut self, tol: f64, atol: f64) -> Self {
        self.config.tol = tol;
        self.config.atol = atol;
        self
    }

    /// Set the differential weight (F) range.
    ///
    /// # Arguments
    ///
    /// * `min` - Lower end of the dithering range
    /// * `max` - Upper end; pass `min` for a constant weight
    pub fn with_mutation(mut self, min: f64, max: f64) -> Self {
        self.config.mutation = (min, max);
        self
    }

    /// Set the crossover probability (CR).
    pub fn with_recombination(mut self, prob: f64) -> Self {
        self.config.recombination = prob;
        self
    }

    pub fn with_strategy(mut self, strategy: DEStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn with_initialization(mut self, init: Initialization) -> Self {
        self.config.init = init;
        self
    }

    /// Set the random seed for reproducibility.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Enable parallel evaluation, optionally with a fixed number of workers.
    pub fn with_parallel(mut self, workers: Option<usize>) -> Self {
        self.config.parallel = true;
        self.config.workers = workers;
        self
    }

    /// Stop after `generations` generations without improvement.
    pub fn with_max_stall(mut self, generations: usize) -> Self {
        self.config.max_stall_generations = Some(generations);
        self
    }

    /// Population size for `n_params` parameters.
    pub fn population_size(&self, n_params: usize) -> usize {
        (self.config.pop_size_multiplier * n_params).max(self.config.strategy.min_population())
    }

    /// Draw this generation's differential weight.
    fn draw_weight(&self, rng: &mut impl Rng) -> f64 {
        let (min, max) = self.config.mutation;
        if max > min {
            rng.gen_range(min..max)
        } else {
            min
        }
    }

    /// Create a trial vector using the configured strategy.
    ///
    /// # Arguments
    ///
    /// * `target_idx` - Index of the target vector
    /// * `best_idx` - Index of the best member of the population
    /// * `population` - Current population
    /// * `weight` - Differential weight for this generation
    /// * `bounds` - Parameter bounds
    /// * `rng` - Random number generator
    ///
    /// # Returns
    ///
    /// * A new trial vector
    fn create_trial_vector(
        &self,
        target_idx: usize,
        best_idx: usize,
        population: &[Array1<f64>],
        weight: f64,
        bounds: &[(f64, f64)],
        rng: &mut impl Rng,
    ) -> Array1<f64> {
        let n_params = population[target_idx].len();
        let n_pop = population.len();

        let mut pick = |exclude_best: bool, count: usize| -> Vec<usize> {
            let mut available: Vec<usize> = (0..n_pop)
                .filter(|&i| i != target_idx && !(exclude_best && i == best_idx))
                .collect();
            available.shuffle(rng);
            available.truncate(count);
            available
        };

        let diff = |a: usize, b: usize| &population[a] - &population[b];

        let mut trial = match self.config.strategy {
            DEStrategy::Rand1 => {
                let r = pick(false, 3);
                &population[r[0]] + &(diff(r[1], r[2]) * weight)
            }
            DEStrategy::Rand2 => {
                let r = pick(false, 5);
                &population[r[0]] + &((diff(r[1], r[2]) + diff(r[3], r[4])) * weight)
            }
            DEStrategy::Best1 => {
                let r = pick(true, 2);
                &population[best_idx] + &(diff(r[0], r[1]) * weight)
            }
            DEStrategy::Best2 => {
                let r = pick(true, 4);
                &population[best_idx] + &((diff(r[0], r[1]) + diff(r[2], r[3])) * weight)
            }
            DEStrategy::CurrentToBest1 => {
                let r = pick(true, 2);
                &population[target_idx]
                    + &((diff(best_idx, target_idx) + diff(r[0], r[1])) * weight)
            }
        };

        // Binomial crossover; j_rand guarantees at least one mutated component
        let target = &population[target_idx];
        let j_rand = rng.gen_range(0..n_params);
        for j in 0..n_params {
            if j != j_rand && rng.gen::<f64>() >= self.config.recombination {
                trial[j] = target[j];
            }
        }

        clip_to_bounds(&trial, bounds)
    }

    fn converged(&self, costs: &[f64]) -> bool {
        let (mean, std) = population_spread(costs);
        std <= self.config.atol + self.config.tol * mean.abs()
    }
}

/// Index of the lowest cost.
fn argmin(costs: &[f64]) -> usize {
    costs
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
        .map_or(0, |(i, _)| i)
}

impl GlobalOptimizer for DifferentialEvolution {
    fn optimize<O, W>(
        &self,
        objective: &mut O,
        bounds: &[(f64, f64)],
        observer: &mut W,
    ) -> Result<GlobalOptResult>
    where
        O: Objective + Send,
        W: IterationObserver,
    {
        let n_params = objective.parameter_count();
        validate_bounds(bounds, n_params)?;

        let evaluator = if self.config.parallel {
            PopulationEvaluator::parallel(self.config.workers)?
        } else {
            PopulationEvaluator::serial()
        };

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let pop_size = self.population_size(n_params);

        // Create initial population
        let mut population = match self.config.init {
            Initialization::LatinHypercube => latin_hypercube(bounds, pop_size, &mut rng),
            Initialization::Random => (0..pop_size).map(|_| random_point(bounds, &mut rng)).collect(),
        };

        info!(
            population = pop_size,
            strategy = ?self.config.strategy,
            parallel = evaluator.is_parallel(),
            "starting differential evolution"
        );

        // Evaluate initial population (generation 0)
        let initial = evaluator.evaluate(objective, &population, 0)?;
        let mut func_evals = initial.len();
        let mut costs: Vec<f64> = initial.iter().map(|e| e.error).collect();

        let best_idx = argmin(&costs);
        let mut best_params = population[best_idx].clone();
        let mut best_cost = costs[best_idx];
        let mut best_curve: Option<SimulatedCurve> = initial
            .into_iter()
            .nth(best_idx)
            .and_then(|e: Evaluation| e.curve);

        let mut history = vec![best_cost];
        notify(observer, 0, best_cost, &best_params, best_curve.as_ref())?;

        let mut generation = 0;
        let mut stall = 0;
        let mut termination = Termination::MaxGenerations;

        while generation < self.config.max_generations {
            if self.converged(&costs) {
                termination = Termination::Converged;
                break;
            }
            if let Some(limit) = self.config.max_stall_generations {
                if stall >= limit {
                    termination = Termination::Stalled;
                    break;
                }
            }

            generation += 1;

            // Generate all trials before evaluating any of them
            let weight = self.draw_weight(&mut rng);
            let best_idx = argmin(&costs);
            let trials: Vec<Array1<f64>> = (0..pop_size)
                .map(|i| self.create_trial_vector(i, best_idx, &population, weight, bounds, &mut rng))
                .collect();

            let evaluations = evaluator.evaluate(objective, &trials, generation)?;
            func_evals += evaluations.len();

            let mut improved = false;
            for (i, (trial, evaluation)) in trials.into_iter().zip(evaluations).enumerate() {
                if evaluation.error <= costs[i] {
                    if evaluation.error < best_cost {
                        best_cost = evaluation.error;
                        best_params = trial.clone();
                        best_curve = evaluation.curve;
                        improved = true;
                    }
                    population[i] = trial;
                    costs[i] = evaluation.error;
                }
            }

            stall = if improved { 0 } else { stall + 1 };
            history.push(best_cost);

            let (mean, std) = population_spread(&costs);
            info!(generation, best = best_cost, mean, std, "generation complete");
            notify(observer, generation, best_cost, &best_params, best_curve.as_ref())?;
        }

        // The limit may be reached exactly when the population converges
        if termination == Termination::MaxGenerations && self.converged(&costs) {
            termination = Termination::Converged;
        }

        let message = match termination {
            Termination::Converged => format!(
                "Population converged after {} generations (best cost {:.6e})",
                generation, best_cost
            ),
            Termination::Stalled => format!(
                "Stopped after {} generations without improvement",
                stall
            ),
            Termination::MaxGenerations => format!(
                "Reached maximum number of generations: {}",
                self.config.max_generations
            ),
        };
        debug!(func_evals, "{}", message);

        Ok(GlobalOptResult {
            params: best_params,
            cost: best_cost,
            iterations: generation,
            func_evals,
            success: termination.is_success(),
            termination,
            message,
            curve: best_curve,
            history,
        })
    }
}

fn notify<W: IterationObserver>(
    observer: &mut W,
    index: usize,
    error: f64,
    params: &Array1<f64>,
    curve: Option<&SimulatedCurve>,
) -> Result<()> {
    observer.on_iteration(&IterationEvent {
        stage: Stage::Global,
        index,
        error,
        params,
        curve,
    })
}
