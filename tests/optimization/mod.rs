//! Tests for the global and local optimisation stages on the simulator objective.

mod global_stage;
mod local_stage;
