//! Population evaluation, serial or on a rayon pool.
//!
//! In parallel mode the population is split into contiguous chunks and each chunk
//! is evaluated by its own forked objective, so no evaluator (and no single-slot
//! cache) is shared between threads. Results come back in population order and the
//! forks' counters are merged into the coordinating objective afterwards.

use ndarray::Array1;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{FitError, Result};
use crate::objective::{EvalKey, Evaluation, Objective, Stage};

/// Evaluate every point of a generation in parallel.
///
/// # Arguments
///
/// * `objective` - Coordinating objective; forks are made from it
/// * `population` - Points to evaluate
/// * `generation` - Generation index, used for evaluation keys
///
/// # Returns
///
/// * One evaluation per point, in population order
pub fn evaluate_population_parallel<O: Objective + Send>(
    objective: &mut O,
    population: &[Array1<f64>],
    generation: usize,
) -> Result<Vec<Evaluation>> {
    if population.is_empty() {
        return Ok(Vec::new());
    }

    let threads = rayon::current_num_threads().max(1);
    let chunk_size = population.len().div_ceil(threads);
    let n_chunks = population.len().div_ceil(chunk_size);
    let mut workers: Vec<O> = (0..n_chunks).map(|_| objective.fork()).collect();

    let chunks: Vec<Vec<Evaluation>> = workers
        .par_iter_mut()
        .zip(population.par_chunks(chunk_size))
        .enumerate()
        .map(|(c, (worker, points))| {
            points
                .iter()
                .enumerate()
                .map(|(j, point)| {
                    let key = EvalKey::new(Stage::Global, generation, c * chunk_size + j);
                    worker.evaluate(point, key)
                })
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<Vec<_>>>()?;

    for worker in &workers {
        objective.merge_stats(&worker.stats());
    }

    Ok(chunks.into_iter().flatten().collect())
}

/// Evaluate every point of a generation one after another.
pub fn evaluate_population_serial<O: Objective>(
    objective: &mut O,
    population: &[Array1<f64>],
    generation: usize,
) -> Result<Vec<Evaluation>> {
    population
        .iter()
        .enumerate()
        .map(|(i, point)| objective.evaluate(point, EvalKey::new(Stage::Global, generation, i)))
        .collect()
}

/// Chooses how a population is evaluated.
pub struct PopulationEvaluator {
    parallel: bool,
    pool: Option<ThreadPool>,
}

impl PopulationEvaluator {
    /// Serial evaluation.
    pub fn serial() -> Self {
        Self {
            parallel: false,
            pool: None,
        }
    }

    /// Parallel evaluation on rayon's global pool, or on a dedicated pool of
    /// `workers` threads.
    pub fn parallel(workers: Option<usize>) -> Result<Self> {
        let pool = match workers {
            Some(n) => Some(
                ThreadPoolBuilder::new()
                    .num_threads(n.max(1))
                    .thread_name(|i| format!("spicefit-worker-{}", i))
                    .build()
                    .map_err(|e| FitError::OptimizationFailure(format!("thread pool: {}", e)))?,
            ),
            None => None,
        };
        Ok(Self {
            parallel: true,
            pool,
        })
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// Evaluate a population in order.
    pub fn evaluate<O: Objective + Send>(
        &self,
        objective: &mut O,
        population: &[Array1<f64>],
        generation: usize,
    ) -> Result<Vec<Evaluation>> {
        if !self.parallel {
            return evaluate_population_serial(objective, population, generation);
        }
        match &self.pool {
            Some(pool) => {
                pool.install(|| evaluate_population_parallel(objective, population, generation))
            }
            None => evaluate_population_parallel(objective, population, generation),
        }
    }
}
