//! # spicefit-rs
//!
//! `spicefit-rs` fits lumped-element circuit parameters (resistances, inductances,
//! capacitances) to a measured impedance curve by running an external SPICE
//! simulator inside a two-stage optimisation loop.
//!
//! The library provides:
//! - Netlist templates with `$name` / `${name}` placeholders
//! - An ngspice runner with a hard per-call timeout and failure containment
//! - A parser for tabular simulator output in the two layouts ngspice prints
//! - A log-magnitude RMSE objective with a single-slot cache and a fixed penalty for
//!   failed evaluations
//! - Differential evolution in linear parameter space, serial or on a thread pool
//! - Bounded SQP refinement in log10 parameter space
//! - An append-only CSV history plus a compressed archive of simulated curves
//!
//! ## Basic Usage
//!
//! ```no_run
//! use spicefit_rs::config::FitConfig;
//! use spicefit_rs::fit::FitSession;
//!
//! let config = FitConfig::load("fit.json")?;
//! let report = FitSession::from_config(config)?.run()?;
//! for p in &report.parameters {
//!     println!("{} = {:.4e}", p.name, p.value);
//! }
//! # Ok::<(), spicefit_rs::FitError>(())
//! ```

// Public modules
pub mod error;

// Inputs
pub mod curve;
pub mod netlist;
pub mod parameters;

// Simulator pipeline
pub mod objective;
pub mod output;
pub mod simulator;

// Optimisation
pub mod global_opt;
pub mod local_opt;
pub mod observer;

// Persistence and orchestration
pub mod config;
pub mod fit;
pub mod history;

// Re-exports for convenience
pub use config::FitConfig;
pub use curve::{BaselineDataset, SimulatedCurve};
pub use error::{FitError, Result};
pub use fit::{FitReport, FitSession};
pub use global_opt::{DifferentialEvolution, GlobalOptimizer};
pub use history::{CurveArchive, HistoryStore};
pub use local_opt::SqpOptimizer;
pub use netlist::NetlistTemplate;
pub use objective::{Objective, ObjectiveEvaluator};
pub use observer::IterationObserver;
pub use parameters::{ParameterSpace, ParameterSpec};
pub use simulator::{NgspiceRunner, Simulator};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
