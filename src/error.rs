use thiserror::Error;

use crate::netlist::TemplateError;
use crate::parameters::BoundsError;
use crate::simulator::SimulationError;

/// Error types for the spicefit-rs library.
///
/// Only conditions that must stop a fitting run are surfaced through this type.
/// Per-evaluation failures (timeouts, simulator diagnostics, unparsable output)
/// are folded into the objective value instead, see [`crate::objective`].
#[derive(Error, Debug)]
pub enum FitError {
    /// Error indicating a mismatch in vector dimensions.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Invalid or inconsistent run configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Netlist template could not be loaded or rendered.
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    /// Simulator failure that cannot be recovered by retrying.
    #[error("Simulation error: {0}")]
    Simulation(#[from] SimulationError),

    /// Error for boundary constraint violations.
    #[error("Bounds error: {0}")]
    Bounds(#[from] BoundsError),

    /// Invalid input data, e.g. a malformed baseline table.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Failure while writing or reading the optimisation history.
    #[error("History error: {0}")]
    History(String),

    /// Error indicating optimization failed.
    #[error("Optimization failed: {0}")]
    OptimizationFailure(String),

    /// Linear algebra error.
    #[error("Linear algebra error: {0}")]
    LinearAlgebra(String),

    /// I/O error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Compressed archive error.
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

/// Result type alias for spicefit-rs operations.
pub type Result<T> = std::result::Result<T, FitError>;
