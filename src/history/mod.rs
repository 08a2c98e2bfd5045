//! History/checkpoint store.
//!
//! Each optimisation stage owns one [`HistoryStore`]. It writes two artefacts into
//! the output directory:
//!
//! - `<run_id>_history.csv`: header `iteration,error,<param_1>,...,<param_n>` and one
//!   row per generation or accepted iterate, flushed as soon as it is appended so an
//!   interrupted run keeps every completed iteration;
//! - `<run_id>_curves.npz`: the simulated curve of each recorded iteration, keyed
//!   `iter_NNNN`, plus an optional `final` entry. Written once by
//!   [`HistoryStore::finalize`].
//!
//! Only the coordinating thread writes to a store; parallel workers never see it.

mod archive;
mod store;

pub use archive::{iteration_key, CurveArchive, FINAL_KEY};
pub use store::{read_history, HistoryRecord, HistoryStore, HistoryTable};
