//! Run configuration.
//!
//! A [`FitConfig`] describes one fitting run: where the template and baseline live,
//! which parameters are fitted within which bounds, how the simulator is invoked and
//! how both optimisation stages are tuned. It is read from JSON; every field except
//! `template`, `baseline` and `parameters` has a default.
//!
//! ```rust
//! use spicefit_rs::config::FitConfig;
//!
//! let config = FitConfig::from_json(r#"{
//!     "template": "rlc.cir",
//!     "baseline": "measured.csv",
//!     "parameters": [
//!         {"name": "R1", "lower": 0.1, "upper": 100.0},
//!         {"name": "L1", "lower": 1e-9, "upper": 1e-5}
//!     ],
//!     "global": {"max_generations": 50}
//! }"#).unwrap();
//!
//! assert_eq!(config.mode, "CM");
//! assert_eq!(config.global.max_generations, 50);
//! assert_eq!(config.local.max_iterations, 100);
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{FitError, Result};
use crate::global_opt::DeConfig;
use crate::local_opt::SqpConfig;
use crate::objective::{EvaluatorSettings, DEFAULT_PENALTY};
use crate::parameters::{ParameterSpace, ParameterSpec};
use crate::simulator::NgspiceConfig;

/// Configuration of a complete fitting run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitConfig {
    #[serde(default)]
    pub simulator: NgspiceConfig,

    /// Netlist template file
    pub template: PathBuf,

    /// Measured impedance table
    pub baseline: PathBuf,

    /// Measurement mode; selects the `Z_<mode>` column of the baseline table
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Directory for rendered netlists
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Directory for history, curve archives and the run summary
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Prefix of every file the run writes
    #[serde(default = "default_run_id")]
    pub run_id: String,

    /// Fitted parameters, in optimiser order
    pub parameters: Vec<ParameterSpec>,

    #[serde(default)]
    pub global: DeConfig,

    #[serde(default)]
    pub local: SqpConfig,

    /// Error assigned to failed evaluations
    #[serde(default = "default_penalty")]
    pub penalty: f64,

    /// Keep rendered netlists on disk for inspection
    #[serde(default)]
    pub keep_netlists: bool,

    /// Mantissa digits of values written into the netlist
    #[serde(default = "default_value_precision")]
    pub value_precision: usize,
}

fn default_mode() -> String {
    "CM".to_string()
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_run_id() -> String {
    "fit".to_string()
}

fn default_penalty() -> f64 {
    DEFAULT_PENALTY
}

fn default_value_precision() -> usize {
    12
}

impl FitConfig {
    /// A configuration with defaults for everything but the inputs.
    pub fn new(
        template: impl Into<PathBuf>,
        baseline: impl Into<PathBuf>,
        parameters: Vec<ParameterSpec>,
    ) -> Self {
        Self {
            simulator: NgspiceConfig::default(),
            template: template.into(),
            baseline: baseline.into(),
            mode: default_mode(),
            work_dir: default_work_dir(),
            output_dir: default_output_dir(),
            run_id: default_run_id(),
            parameters,
            global: DeConfig::default(),
            local: SqpConfig::default(),
            penalty: default_penalty(),
            keep_netlists: false,
            value_precision: default_value_precision(),
        }
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON configuration file.
    ///
    /// Relative paths inside the file are kept as written, i.e. relative to the
    /// process working directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    /// Write the configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    pub fn with_dirs(mut self, work_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self.output_dir = output_dir.into();
        self
    }

    pub fn with_global(mut self, global: DeConfig) -> Self {
        self.global = global;
        self
    }

    pub fn with_local(mut self, local: SqpConfig) -> Self {
        self.local = local;
        self
    }

    /// Check the values serde cannot check.
    pub fn validate(&self) -> Result<()> {
        if self.run_id.is_empty()
            || self
                .run_id
                .chars()
                .any(|c| c == '/' || c == '\\' || c.is_whitespace())
        {
            return Err(FitError::Config(format!(
                "run id '{}' must be a non-empty file name prefix",
                self.run_id
            )));
        }
        if self.mode.trim().is_empty() {
            return Err(FitError::Config("mode must not be empty".to_string()));
        }
        if !(self.penalty.is_finite() && self.penalty > 0.0) {
            return Err(FitError::Config(format!(
                "penalty must be positive and finite, got {}",
                self.penalty
            )));
        }
        if !(1..=17).contains(&self.value_precision) {
            return Err(FitError::Config(format!(
                "value precision must be between 1 and 17 digits, got {}",
                self.value_precision
            )));
        }
        if !(self.simulator.timeout_secs.is_finite() && self.simulator.timeout_secs > 0.0) {
            return Err(FitError::Config(format!(
                "simulator timeout must be positive, got {}",
                self.simulator.timeout_secs
            )));
        }

        let (f_lo, f_hi) = self.global.mutation;
        if !(0.0..=2.0).contains(&f_lo) || !(0.0..=2.0).contains(&f_hi) || f_lo > f_hi {
            return Err(FitError::Config(format!(
                "mutation range ({}, {}) must satisfy 0 <= min <= max <= 2",
                f_lo, f_hi
            )));
        }
        if !(0.0..=1.0).contains(&self.global.recombination) {
            return Err(FitError::Config(format!(
                "recombination must lie in [0, 1], got {}",
                self.global.recombination
            )));
        }
        if self.global.pop_size_multiplier == 0 {
            return Err(FitError::Config(
                "population multiplier must be at least 1".to_string(),
            ));
        }
        if self.global.workers == Some(0) {
            return Err(FitError::Config("worker count must be at least 1".to_string()));
        }
        if !(self.local.fd_step > 0.0) || !(self.local.backtrack > 0.0 && self.local.backtrack < 1.0) {
            return Err(FitError::Config(
                "local fd_step must be positive and backtrack in (0, 1)".to_string(),
            ));
        }

        self.parameter_space().map(|_| ())
    }

    /// The fitted parameters as a validated [`ParameterSpace`].
    pub fn parameter_space(&self) -> Result<ParameterSpace> {
        ParameterSpace::new(&self.parameters)
    }

    /// Settings for the objective evaluator of this run.
    pub fn evaluator_settings(&self) -> EvaluatorSettings {
        EvaluatorSettings {
            run_id: self.run_id.clone(),
            work_dir: self.work_dir.clone(),
            timeout: self.simulator.timeout(),
            penalty: self.penalty,
            keep_netlists: self.keep_netlists,
            value_precision: self.value_precision,
        }
    }
}
