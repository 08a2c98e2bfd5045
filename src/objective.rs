//! Objective evaluation.
//!
//! An [`Objective`] maps a parameter vector to a scalar fit error. The production
//! implementation, [`ObjectiveEvaluator`], runs the full pipeline for each
//! candidate:
//!
//! 1. render the netlist template with the candidate values
//! 2. run the simulator on the rendered netlist
//! 3. parse the simulator output
//! 4. resample the simulated magnitude onto the baseline axis
//! 5. score the log-magnitude RMSE against the baseline
//!
//! Failures in steps 1 to 4 never escape as errors: the candidate is scored with a
//! fixed penalty and the optimiser carries on. Only conditions that no retry can fix
//! (missing simulator binary, unwritable work directory) are returned as `Err`.
//!
//! Each evaluator keeps a single-slot cache of the last vector it evaluated, so an
//! optimiser re-querying the point it just accepted does not re-run the simulator.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::curve::{resample_magnitude, BaselineDataset, SimulatedCurve};
use crate::error::{FitError, Result};
use crate::netlist::NetlistTemplate;
use crate::output;
use crate::parameters::ParameterSpace;
use crate::simulator::{SimulationError, Simulator};

/// Error value assigned to candidates whose evaluation failed.
pub const DEFAULT_PENALTY: f64 = 1e10;

/// Optimisation stage an evaluation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Global,
    Local,
    Final,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Global => "global",
            Stage::Local => "local",
            Stage::Final => "final",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one evaluation within a run.
///
/// The key determines the rendered netlist's file name, so concurrent evaluations
/// must use distinct keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EvalKey {
    pub stage: Stage,

    /// Generation (global) or iteration (local) index
    pub iteration: usize,

    /// Position within the iteration: population member, finite-difference probe
    /// or line-search trial
    pub probe: usize,
}

impl EvalKey {
    pub fn new(stage: Stage, iteration: usize, probe: usize) -> Self {
        Self {
            stage,
            iteration,
            probe,
        }
    }

    /// Netlist file name for this key within run `run_id`.
    pub fn file_name(&self, run_id: &str) -> String {
        format!(
            "{}_{}_{}_{}.cir",
            run_id, self.stage, self.iteration, self.probe
        )
    }
}

/// Why a candidate was scored with the penalty.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalFailure {
    /// Netlist rendering failed, e.g. a placeholder without a value
    Template(String),

    /// Recoverable simulator failure
    Simulation(SimulationError),

    /// No usable data in the simulator output
    Parse,

    /// The resampled magnitude was zero, negative or not finite somewhere
    InvalidMagnitude,
}

impl fmt::Display for EvalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalFailure::Template(msg) => write!(f, "template: {}", msg),
            EvalFailure::Simulation(err) => write!(f, "simulation: {}", err),
            EvalFailure::Parse => write!(f, "unparsable simulator output"),
            EvalFailure::InvalidMagnitude => write!(f, "resampled magnitude not positive"),
        }
    }
}

/// Result of evaluating one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Log-magnitude RMSE, or the penalty if `failure` is set
    pub error: f64,

    /// The simulated curve, when one was obtained
    pub curve: Option<SimulatedCurve>,

    pub failure: Option<EvalFailure>,

    /// Whether the value came from the single-slot cache
    pub cached: bool,
}

impl Evaluation {
    /// A successful evaluation.
    pub fn scored(error: f64, curve: Option<SimulatedCurve>) -> Self {
        Self {
            error,
            curve,
            failure: None,
            cached: false,
        }
    }

    /// A failed evaluation scored with `penalty`.
    pub fn penalized(penalty: f64, failure: EvalFailure, curve: Option<SimulatedCurve>) -> Self {
        Self {
            error: penalty,
            curve,
            failure: Some(failure),
            cached: false,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

/// Evaluation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalStats {
    /// Full pipeline runs (cache misses)
    pub evaluations: usize,
    pub cache_hits: usize,
    pub template_failures: usize,
    pub simulation_failures: usize,
    pub timeouts: usize,
    pub parse_failures: usize,
    pub magnitude_failures: usize,
}

impl EvalStats {
    /// Add another set of counters into this one.
    pub fn merge(&mut self, other: &EvalStats) {
        self.evaluations += other.evaluations;
        self.cache_hits += other.cache_hits;
        self.template_failures += other.template_failures;
        self.simulation_failures += other.simulation_failures;
        self.timeouts += other.timeouts;
        self.parse_failures += other.parse_failures;
        self.magnitude_failures += other.magnitude_failures;
    }

    /// Total number of penalised evaluations.
    pub fn failures(&self) -> usize {
        self.template_failures
            + self.simulation_failures
            + self.parse_failures
            + self.magnitude_failures
    }

    fn record(&mut self, failure: &EvalFailure) {
        match failure {
            EvalFailure::Template(_) => self.template_failures += 1,
            EvalFailure::Simulation(err) => {
                self.simulation_failures += 1;
                if matches!(err, SimulationError::Timeout { .. }) {
                    self.timeouts += 1;
                }
            }
            EvalFailure::Parse => self.parse_failures += 1,
            EvalFailure::InvalidMagnitude => self.magnitude_failures += 1,
        }
    }
}

/// A scalar objective over a fixed-length parameter vector.
pub trait Objective {
    /// Length of the vectors `evaluate` accepts.
    fn parameter_count(&self) -> usize;

    /// Score one candidate.
    ///
    /// # Errors
    ///
    /// Only for conditions that must stop the run. Recoverable failures are reported
    /// through [`Evaluation::failure`] with the penalty as error.
    fn evaluate(&mut self, params: &Array1<f64>, key: EvalKey) -> Result<Evaluation>;

    /// An independent instance sharing the read-only configuration, with an empty
    /// cache and zeroed counters. Used to give each parallel worker its own evaluator.
    fn fork(&self) -> Self
    where
        Self: Sized;

    /// Counters accumulated by this instance.
    fn stats(&self) -> EvalStats {
        EvalStats::default()
    }

    /// Fold counters from a forked instance back into this one.
    fn merge_stats(&mut self, _stats: &EvalStats) {}
}

/// Settings for [`ObjectiveEvaluator`].
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatorSettings {
    /// Prefix of every rendered netlist file name
    pub run_id: String,

    /// Directory receiving rendered netlists
    pub work_dir: PathBuf,

    /// Per-simulation timeout
    pub timeout: Duration,

    pub penalty: f64,

    /// Leave rendered netlists on disk after evaluation
    pub keep_netlists: bool,

    /// Mantissa digits when writing values into the netlist
    pub value_precision: usize,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            run_id: "run".to_string(),
            work_dir: std::env::temp_dir(),
            timeout: Duration::from_secs(30),
            penalty: DEFAULT_PENALTY,
            keep_netlists: false,
            value_precision: 12,
        }
    }
}

struct Shared {
    template: NetlistTemplate,
    baseline: BaselineDataset,
    simulator: Box<dyn Simulator>,
    space: ParameterSpace,
    settings: EvaluatorSettings,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    params: Array1<f64>,
    evaluation: Evaluation,
}

/// Simulation-in-the-loop objective: template → simulator → parser → RMSE.
pub struct ObjectiveEvaluator {
    shared: Arc<Shared>,
    cache: Option<CacheEntry>,
    stats: EvalStats,
}

impl ObjectiveEvaluator {
    /// Create an evaluator, making sure the work directory exists.
    ///
    /// # Arguments
    ///
    /// * `template` - Netlist template whose placeholders are parameter names
    /// * `baseline` - Measured curve to fit
    /// * `simulator` - Simulator backend
    /// * `space` - Fitted parameters; vectors passed to `evaluate` follow its order
    /// * `settings` - Naming, timeout and penalty settings
    pub fn new(
        template: NetlistTemplate,
        baseline: BaselineDataset,
        simulator: Box<dyn Simulator>,
        space: ParameterSpace,
        settings: EvaluatorSettings,
    ) -> Result<Self> {
        std::fs::create_dir_all(&settings.work_dir)?;
        Ok(Self {
            shared: Arc::new(Shared {
                template,
                baseline,
                simulator,
                space,
                settings,
            }),
            cache: None,
            stats: EvalStats::default(),
        })
    }

    pub fn space(&self) -> &ParameterSpace {
        &self.shared.space
    }

    pub fn baseline(&self) -> &BaselineDataset {
        &self.shared.baseline
    }

    pub fn template(&self) -> &NetlistTemplate {
        &self.shared.template
    }

    pub fn settings(&self) -> &EvaluatorSettings {
        &self.shared.settings
    }

    /// Vector held in the single-slot cache, if any.
    pub fn cached_params(&self) -> Option<&Array1<f64>> {
        self.cache.as_ref().map(|entry| &entry.params)
    }

    /// Score a simulated curve against the baseline.
    pub fn score(&self, curve: &SimulatedCurve) -> std::result::Result<f64, EvalFailure> {
        let baseline = &self.shared.baseline;
        let resampled =
            resample_magnitude(curve, baseline.frequencies()).ok_or(EvalFailure::InvalidMagnitude)?;
        log_magnitude_rmse(&resampled, baseline.log_magnitudes()).ok_or(EvalFailure::InvalidMagnitude)
    }

    /// Render, simulate and parse one candidate.
    ///
    /// The outer `Result` carries fatal errors, the inner one recoverable failures.
    fn simulate(
        &self,
        params: &Array1<f64>,
        key: EvalKey,
    ) -> Result<std::result::Result<SimulatedCurve, EvalFailure>> {
        let shared = &self.shared;
        let settings = &shared.settings;

        let named = shared.space.named(params);
        let netlist = match shared.template.render_values(&named, settings.value_precision) {
            Ok(text) => text,
            Err(e) => {
                warn!(stage = %key.stage, iteration = key.iteration, probe = key.probe, error = %e, "netlist rendering failed");
                return Ok(Err(EvalFailure::Template(e.to_string())));
            }
        };

        let path = settings.work_dir.join(key.file_name(&settings.run_id));
        std::fs::write(&path, netlist)?;

        let result = shared.simulator.run(&path, settings.timeout);

        if !settings.keep_netlists {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "could not remove netlist");
            }
        }

        let raw = match result {
            Ok(raw) => raw,
            Err(e) if e.is_fatal() => return Err(FitError::Simulation(e)),
            Err(e) => {
                if e.is_critical() {
                    error!(
                        simulator = shared.simulator.name(),
                        netlist = %path.display(),
                        error = %e,
                        "simulator adapter fault"
                    );
                } else {
                    warn!(stage = %key.stage, iteration = key.iteration, probe = key.probe, error = %e, "simulation failed");
                }
                return Ok(Err(EvalFailure::Simulation(e)));
            }
        };

        match output::parse_detailed(&raw) {
            Some(parsed) => Ok(Ok(parsed.curve)),
            None => {
                warn!(stage = %key.stage, iteration = key.iteration, probe = key.probe, "no data in simulator output");
                Ok(Err(EvalFailure::Parse))
            }
        }
    }
}

impl fmt::Debug for ObjectiveEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectiveEvaluator")
            .field("parameters", &self.shared.space.names())
            .field("simulator", &self.shared.simulator.name())
            .field("settings", &self.shared.settings)
            .field("stats", &self.stats)
            .finish()
    }
}

impl Objective for ObjectiveEvaluator {
    fn parameter_count(&self) -> usize {
        self.shared.space.len()
    }

    fn evaluate(&mut self, params: &Array1<f64>, key: EvalKey) -> Result<Evaluation> {
        if params.len() != self.parameter_count() {
            return Err(FitError::DimensionMismatch(format!(
                "Expected {} parameters, got {}",
                self.parameter_count(),
                params.len()
            )));
        }

        if let Some(entry) = &self.cache {
            if entry.params == *params {
                self.stats.cache_hits += 1;
                let mut evaluation = entry.evaluation.clone();
                evaluation.cached = true;
                return Ok(evaluation);
            }
        }

        self.stats.evaluations += 1;
        let penalty = self.shared.settings.penalty;

        let evaluation = match self.simulate(params, key)? {
            Ok(curve) => match self.score(&curve) {
                Ok(error) => Evaluation::scored(error, Some(curve)),
                Err(failure) => Evaluation::penalized(penalty, failure, Some(curve)),
            },
            Err(failure) => Evaluation::penalized(penalty, failure, None),
        };

        if let Some(failure) = &evaluation.failure {
            self.stats.record(failure);
        }
        debug!(
            stage = %key.stage,
            iteration = key.iteration,
            probe = key.probe,
            error = evaluation.error,
            failed = evaluation.is_failure(),
            "evaluated candidate"
        );

        self.cache = Some(CacheEntry {
            params: params.clone(),
            evaluation: evaluation.clone(),
        });
        Ok(evaluation)
    }

    fn fork(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            cache: None,
            stats: EvalStats::default(),
        }
    }

    fn stats(&self) -> EvalStats {
        self.stats.clone()
    }

    fn merge_stats(&mut self, stats: &EvalStats) {
        self.stats.merge(stats);
    }
}

/// Adapter presenting an objective over log10 parameters.
///
/// Vectors passed to `evaluate` are converted with `10^x` before reaching the inner
/// objective.
#[derive(Debug)]
pub struct LogScaled<O> {
    inner: O,
}

impl<O: Objective> LogScaled<O> {
    pub fn new(inner: O) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &O {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut O {
        &mut self.inner
    }

    pub fn into_inner(self) -> O {
        self.inner
    }
}

impl<O: Objective> Objective for LogScaled<O> {
    fn parameter_count(&self) -> usize {
        self.inner.parameter_count()
    }

    fn evaluate(&mut self, params: &Array1<f64>, key: EvalKey) -> Result<Evaluation> {
        let linear = params.mapv(|v| 10f64.powf(v));
        self.inner.evaluate(&linear, key)
    }

    fn fork(&self) -> Self {
        Self {
            inner: self.inner.fork(),
        }
    }

    fn stats(&self) -> EvalStats {
        self.inner.stats()
    }

    fn merge_stats(&mut self, stats: &EvalStats) {
        self.inner.merge_stats(stats);
    }
}

/// Objective backed by a plain function, for analytic problems without a simulator.
#[derive(Debug, Clone)]
pub struct FnObjective<F> {
    f: F,
    n: usize,
    stats: EvalStats,
}

impl<F> FnObjective<F>
where
    F: Fn(&Array1<f64>) -> f64 + Clone,
{
    pub fn new(n: usize, f: F) -> Self {
        Self {
            f,
            n,
            stats: EvalStats::default(),
        }
    }
}

impl<F> Objective for FnObjective<F>
where
    F: Fn(&Array1<f64>) -> f64 + Clone,
{
    fn parameter_count(&self) -> usize {
        self.n
    }

    fn evaluate(&mut self, params: &Array1<f64>, _key: EvalKey) -> Result<Evaluation> {
        if params.len() != self.n {
            return Err(FitError::DimensionMismatch(format!(
                "Expected {} parameters, got {}",
                self.n,
                params.len()
            )));
        }
        self.stats.evaluations += 1;
        Ok(Evaluation::scored((self.f)(params), None))
    }

    fn fork(&self) -> Self {
        Self::new(self.n, self.f.clone())
    }

    fn stats(&self) -> EvalStats {
        self.stats.clone()
    }

    fn merge_stats(&mut self, stats: &EvalStats) {
        self.stats.merge(stats);
    }
}

/// Root-mean-square difference of base-10 log magnitudes.
///
/// # Arguments
///
/// * `simulated` - Simulated magnitudes on the baseline axis (linear units)
/// * `measured_log` - `log10` of the measured magnitudes
///
/// # Returns
///
/// `None` if the lengths differ, the input is empty, or a simulated magnitude is not
/// a positive finite number.
pub fn log_magnitude_rmse(simulated: &Array1<f64>, measured_log: &Array1<f64>) -> Option<f64> {
    if simulated.len() != measured_log.len() || simulated.is_empty() {
        return None;
    }
    if simulated.iter().any(|m| !m.is_finite() || *m <= 0.0) {
        return None;
    }

    let sum_sq: f64 = simulated
        .iter()
        .zip(measured_log.iter())
        .map(|(s, m)| (s.log10() - m).powi(2))
        .sum();
    Some((sum_sq / simulated.len() as f64).sqrt())
}
