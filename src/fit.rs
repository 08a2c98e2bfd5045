//! Two-stage fitting run.
//!
//! [`FitSession`] ties everything together: it validates the inputs, runs the
//! global differential-evolution stage in linear parameter space, refines the best
//! point with bounded SQP in log10 space, and writes a history store per stage plus
//! a JSON summary.
//!
//! Output files, all prefixed with the run id:
//!
//! | file | contents |
//! |---|---|
//! | `<run>_global_history.csv` | one row per generation |
//! | `<run>_global_curves.npz` | best curve of each generation |
//! | `<run>_local_history.csv` | one row per accepted iterate |
//! | `<run>_local_curves.npz` | curve of each iterate and the `final` curve |
//! | `<run>_summary.json` | [`FitReport`] |

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::FitConfig;
use crate::curve::{BaselineDataset, SimulatedCurve};
use crate::error::{FitError, Result};
use crate::global_opt::{DifferentialEvolution, GlobalOptResult, GlobalOptimizer};
use crate::history::{HistoryStore, FINAL_KEY};
use crate::local_opt::{LocalOptResult, SqpOptimizer};
use crate::netlist::NetlistTemplate;
use crate::objective::{EvalKey, EvalStats, LogScaled, Objective, ObjectiveEvaluator, Stage};
use crate::observer::LogToLinear;
use crate::parameters::ParameterSpace;
use crate::simulator::{NgspiceRunner, Simulator};

/// A fitted parameter with the bounds it was searched in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedParameter {
    pub name: String,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Files written by a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunArtifacts {
    pub global_history: PathBuf,
    pub global_curves: PathBuf,
    pub local_history: PathBuf,
    pub local_curves: PathBuf,
    pub summary: PathBuf,
}

/// Outcome of a fitting run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub run_id: String,

    /// Final parameters in linear units, in configuration order
    pub parameters: Vec<FittedParameter>,

    /// Best error after the global stage
    pub global_error: f64,

    /// Generations evolved after the initial population
    pub global_generations: usize,

    pub global_termination: String,

    /// Error after local refinement
    pub local_error: f64,

    pub local_iterations: usize,

    pub local_status: String,

    /// Whether the local stage met a convergence criterion
    pub local_success: bool,

    /// Error of the reported parameters
    pub final_error: f64,

    pub stats: EvalStats,

    pub artifacts: RunArtifacts,
}

impl FitReport {
    /// Final parameter values in configuration order.
    pub fn values(&self) -> Array1<f64> {
        self.parameters.iter().map(|p| p.value).collect()
    }

    /// Value of the named parameter.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.parameters.iter().find(|p| p.name == name).map(|p| p.value)
    }
}

/// A prepared fitting run.
pub struct FitSession {
    config: FitConfig,
    template: NetlistTemplate,
    baseline: BaselineDataset,
    space: ParameterSpace,
    simulator: Box<dyn Simulator>,
}

impl std::fmt::Debug for FitSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FitSession")
            .field("run_id", &self.config.run_id)
            .field("parameters", &self.space.names())
            .field("simulator", &self.simulator.name())
            .finish()
    }
}

impl FitSession {
    /// Prepare a run using ngspice as configured in `config.simulator`.
    ///
    /// Fails if the executable cannot be found, see [`FitSession::new`] for the
    /// remaining checks.
    pub fn from_config(config: FitConfig) -> Result<Self> {
        let runner = NgspiceRunner::new(config.simulator.clone())?;
        Self::new(config, Box::new(runner))
    }

    /// Prepare a run, loading the template and baseline named in `config`.
    ///
    /// # Errors
    ///
    /// * `FitError::Config` for invalid settings or a template placeholder that is
    ///   not a fitted parameter
    /// * `FitError::Template` if the template is missing or malformed
    /// * `FitError::InvalidInput` / `FitError::Io` for an unusable baseline
    pub fn new(config: FitConfig, simulator: Box<dyn Simulator>) -> Result<Self> {
        config.validate()?;
        let template = NetlistTemplate::load(&config.template)?;
        let baseline = BaselineDataset::from_table(&config.baseline, &config.mode)?;
        Self::with_inputs(config, template, baseline, simulator)
    }

    /// Prepare a run from already loaded inputs.
    pub fn with_inputs(
        config: FitConfig,
        template: NetlistTemplate,
        baseline: BaselineDataset,
        simulator: Box<dyn Simulator>,
    ) -> Result<Self> {
        config.validate()?;
        let space = config.parameter_space()?;

        let unknown: Vec<&str> = template
            .placeholders()
            .iter()
            .filter(|name| space.index_of(name.as_str()).is_none())
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(FitError::Config(format!(
                "template placeholders without a fitted parameter: {}",
                unknown.join(", ")
            )));
        }
        for name in space.names() {
            if !template.placeholders().contains(name) {
                warn!(parameter = %name, "parameter does not appear in the template");
            }
        }

        Ok(Self {
            config,
            template,
            baseline,
            space,
            simulator,
        })
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    pub fn space(&self) -> &ParameterSpace {
        &self.space
    }

    /// Run both stages and write every artefact.
    ///
    /// A fatal error stops the run; the history rows written up to that point stay
    /// on disk and the curves collected so far are still archived.
    pub fn run(self) -> Result<FitReport> {
        let FitSession {
            config,
            template,
            baseline,
            space,
            simulator,
        } = self;

        let run_id = config.run_id.clone();
        let output_dir = config.output_dir.clone();
        fs::create_dir_all(&output_dir)?;

        info!(
            run_id = %run_id,
            parameters = space.len(),
            points = baseline.len(),
            simulator = simulator.name(),
            "starting fit"
        );

        let mut evaluator = ObjectiveEvaluator::new(
            template,
            baseline,
            simulator,
            space.clone(),
            config.evaluator_settings(),
        )?;

        // Global stage, linear units
        let mut global_store =
            HistoryStore::open(&output_dir, &format!("{}_global", run_id), space.names())?;
        let global_history = global_store.history_path().to_path_buf();
        let optimizer = DifferentialEvolution::with_config(config.global.clone());
        let outcome = optimizer.optimize(&mut evaluator, &space.linear_bounds(), &mut global_store);
        let global_curves = global_store.finalize()?;
        let global: GlobalOptResult = outcome?;
        info!(
            cost = global.cost,
            generations = global.iterations,
            termination = ?global.termination,
            "global stage finished"
        );

        // Local stage, log10 units
        let mut local_store =
            HistoryStore::open(&output_dir, &format!("{}_local", run_id), space.names())?;
        let local_history = local_store.history_path().to_path_buf();
        let mut log_objective = LogScaled::new(evaluator);
        let x0 = space.to_log10(&global.params);
        let outcome = SqpOptimizer::new(config.local.clone()).minimize(
            &mut log_objective,
            &x0,
            &space.log10_bounds(),
            &mut LogToLinear::new(&mut local_store),
        );
        let local: LocalOptResult = match outcome {
            Ok(local) => local,
            Err(e) => {
                local_store.finalize()?;
                return Err(e);
            }
        };
        if !local.success {
            warn!(status = local.status.description(), "local refinement did not converge");
        }
        let mut evaluator = log_objective.into_inner();

        // Keep whichever stage ended lower
        let (params, mut final_error, mut final_curve) = if local.cost <= global.cost {
            (space.clip(&space.from_log10(&local.params)), local.cost, local.curve.clone())
        } else {
            warn!(
                local = local.cost,
                global = global.cost,
                "local refinement ended above the global optimum, keeping global result"
            );
            (global.params.clone(), global.cost, global.curve.clone())
        };

        let evaluation = evaluator.evaluate(&params, EvalKey::new(Stage::Final, 0, 0))?;
        if !evaluation.is_failure() {
            final_error = evaluation.error;
            final_curve = evaluation.curve.or(final_curve);
        }
        if let Some(curve) = final_curve {
            local_store.store_curve(FINAL_KEY, curve)?;
        }
        let local_curves = local_store.finalize()?;

        let stats = evaluator.stats();
        let parameters = space
            .named(&params)
            .into_iter()
            .zip(space.bounds())
            .map(|((name, value), b)| FittedParameter {
                name,
                value,
                lower: b.lower,
                upper: b.upper,
            })
            .collect();

        let report = FitReport {
            run_id: run_id.clone(),
            parameters,
            global_error: global.cost,
            global_generations: global.iterations,
            global_termination: global.message.clone(),
            local_error: local.cost,
            local_iterations: local.iterations,
            local_status: local.message.clone(),
            local_success: local.success,
            final_error,
            stats,
            artifacts: RunArtifacts {
                global_history,
                global_curves,
                local_history,
                local_curves,
                summary: output_dir.join(format!("{}_summary.json", run_id)),
            },
        };
        write_summary(&report)?;

        info!(
            run_id = %run_id,
            error = report.final_error,
            evaluations = report.stats.evaluations,
            failures = report.stats.failures(),
            "fit finished"
        );
        Ok(report)
    }
}

fn write_summary(report: &FitReport) -> Result<()> {
    let writer = BufWriter::new(File::create(&report.artifacts.summary)?);
    serde_json::to_writer_pretty(writer, report)?;
    Ok(())
}

/// Read a summary written by [`FitSession::run`].
pub fn read_summary(path: impl AsRef<std::path::Path>) -> Result<FitReport> {
    let text = fs::read_to_string(path.as_ref())?;
    Ok(serde_json::from_str(&text)?)
}

/// Final curve of a run, from its local-stage archive.
pub fn final_curve(report: &FitReport) -> Result<Option<SimulatedCurve>> {
    let archive = crate::history::CurveArchive::load(&report.artifacts.local_curves)?;
    Ok(archive.get(FINAL_KEY).cloned())
}
