//! # Simulator Execution
//!
//! The fitting loop treats the circuit simulator as an unreliable external process.
//! [`Simulator`] is the seam between the objective and that process: given a netlist
//! file it either returns the raw textual result or a classified [`SimulationError`].
//!
//! [`NgspiceRunner`] is the production implementation. Tests substitute in-process
//! doubles that implement the same trait.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

pub mod ngspice;

pub use ngspice::{NgspiceConfig, NgspiceRunner};

/// Outcome classification for one simulator invocation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    /// The simulator binary could not be located. Fatal for the whole run.
    #[error("simulator executable not found: {}", path.display())]
    ExecutableNotFound { path: PathBuf },

    /// The rendered netlist does not exist. Fatal for the whole run.
    #[error("netlist not found: {}", path.display())]
    NetlistNotFound { path: PathBuf },

    #[error("simulation timed out after {seconds:.1} s")]
    Timeout { seconds: f64 },

    /// The simulator wrote to its diagnostic stream.
    #[error("simulator reported diagnostics: {message}")]
    Diagnostics { message: String },

    #[error("simulator produced no output")]
    EmptyOutput,

    #[error("failed to start simulator: {0}")]
    Spawn(String),

    /// Fault inside the adapter itself (temp files, process handling).
    #[error("internal simulator adapter fault: {0}")]
    Internal(String),
}

impl SimulationError {
    /// Whether the error must abort the run rather than be scored as a penalty.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SimulationError::ExecutableNotFound { .. } | SimulationError::NetlistNotFound { .. }
        )
    }

    /// Whether the error is an adapter fault that should be logged as critical.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            SimulationError::Spawn(_) | SimulationError::Internal(_)
        )
    }
}

/// An external circuit simulator.
///
/// Implementations must be shareable across worker threads; any per-call state
/// (output files, child processes) lives inside `run`.
pub trait Simulator: Send + Sync {
    /// Simulate the netlist at `netlist`, waiting at most `timeout`.
    ///
    /// # Returns
    ///
    /// The raw result text on success. Simulator-side failures are reported as
    /// `Err`, never by panicking.
    fn run(&self, netlist: &Path, timeout: Duration) -> Result<String, SimulationError>;

    /// Short human-readable name used in log messages.
    fn name(&self) -> &str {
        "simulator"
    }
}
