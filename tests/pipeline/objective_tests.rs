//! Tests for the simulation-in-the-loop objective.

use crate::test_helpers::{measurement_axis, FakeSpice, SeriesRlc, SERIES_RLC, TRUE_C, TRUE_L, TRUE_R};
use ndarray::{array, Array1};
use spicefit_rs::curve::BaselineDataset;
use spicefit_rs::error::FitError;
use spicefit_rs::netlist::NetlistTemplate;
use spicefit_rs::objective::{
    EvalFailure, EvalKey, EvaluatorSettings, LogScaled, Objective, ObjectiveEvaluator, Stage,
    DEFAULT_PENALTY,
};
use spicefit_rs::parameters::{ParameterSpace, ParameterSpec};
use spicefit_rs::simulator::{SimulationError, Simulator};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn space() -> ParameterSpace {
    ParameterSpace::new(&[
        ParameterSpec::new("R1", 1.0, 100.0),
        ParameterSpec::new("L1", 1e-7, 1e-5),
        ParameterSpec::new("C1", 1e-10, 1e-8),
    ])
    .unwrap()
}

fn baseline() -> BaselineDataset {
    let axis = measurement_axis();
    let magnitudes = SeriesRlc::reference().magnitudes(&axis);
    BaselineDataset::new(axis, magnitudes).unwrap()
}

fn settings(work_dir: &Path) -> EvaluatorSettings {
    EvaluatorSettings {
        run_id: "unit".to_string(),
        work_dir: work_dir.to_path_buf(),
        ..EvaluatorSettings::default()
    }
}

fn evaluator(work_dir: &Path, template: &str, simulator: Box<dyn Simulator>) -> ObjectiveEvaluator {
    ObjectiveEvaluator::new(
        NetlistTemplate::parse(template).unwrap(),
        baseline(),
        simulator,
        space(),
        settings(work_dir),
    )
    .unwrap()
}

fn truth() -> Array1<f64> {
    array![TRUE_R, TRUE_L, TRUE_C]
}

fn key(probe: usize) -> EvalKey {
    EvalKey::new(Stage::Global, 0, probe)
}

#[test]
fn test_true_parameters_score_near_zero() {
    let dir = tempfile::tempdir().unwrap();
    let mut objective = evaluator(dir.path(), SERIES_RLC, Box::new(FakeSpice::series_rlc()));

    let evaluation = objective.evaluate(&truth(), key(0)).unwrap();
    assert!(!evaluation.is_failure());
    assert!(evaluation.error < 1e-10, "error {}", evaluation.error);
    assert_eq!(evaluation.curve.as_ref().map(|c| c.len()), Some(41));

    let worse = objective
        .evaluate(&array![TRUE_R * 2.0, TRUE_L, TRUE_C], key(1))
        .unwrap();
    assert!(worse.error > 0.01);
}

#[test]
fn test_single_slot_cache() {
    let dir = tempfile::tempdir().unwrap();
    let mut objective = evaluator(dir.path(), SERIES_RLC, Box::new(FakeSpice::series_rlc()));
    let other = array![20.0, 2e-6, 2e-9];

    let first = objective.evaluate(&truth(), key(0)).unwrap();
    let second = objective.evaluate(&truth(), key(1)).unwrap();
    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(first.error, second.error);

    // Only the last vector is remembered
    objective.evaluate(&other, key(2)).unwrap();
    let again = objective.evaluate(&truth(), key(3)).unwrap();
    assert!(!again.cached);

    let stats = objective.stats();
    assert_eq!(stats.evaluations, 3);
    assert_eq!(stats.cache_hits, 1);
}

#[test]
fn test_missing_placeholder_scores_penalty() {
    let dir = tempfile::tempdir().unwrap();
    let template = format!("{}* extra ${{RLOAD}}\n", SERIES_RLC);
    let simulator = FakeSpice::series_rlc();
    let mut objective = evaluator(dir.path(), &template, Box::new(simulator));

    let evaluation = objective.evaluate(&truth(), key(0)).unwrap();
    assert_eq!(evaluation.error, DEFAULT_PENALTY);
    assert!(matches!(evaluation.failure, Some(EvalFailure::Template(ref m)) if m.contains("RLOAD")));
    assert_eq!(objective.stats().template_failures, 1);
}

#[test]
fn test_simulator_diagnostics_score_penalty() {
    let dir = tempfile::tempdir().unwrap();
    let simulator = FakeSpice::series_rlc().failing_above_r(50.0);
    let mut objective = evaluator(dir.path(), SERIES_RLC, Box::new(simulator));

    let evaluation = objective.evaluate(&array![80.0, TRUE_L, TRUE_C], key(0)).unwrap();
    assert_eq!(evaluation.error, DEFAULT_PENALTY);
    assert!(matches!(
        evaluation.failure,
        Some(EvalFailure::Simulation(SimulationError::Diagnostics { .. }))
    ));

    // The evaluator keeps working afterwards
    let evaluation = objective.evaluate(&truth(), key(1)).unwrap();
    assert!(!evaluation.is_failure());
    assert_eq!(objective.stats().simulation_failures, 1);
}

struct TimingOut;

impl Simulator for TimingOut {
    fn run(&self, _netlist: &Path, timeout: Duration) -> Result<String, SimulationError> {
        Err(SimulationError::Timeout {
            seconds: timeout.as_secs_f64(),
        })
    }
}

struct MissingBinary;

impl Simulator for MissingBinary {
    fn run(&self, _netlist: &Path, _timeout: Duration) -> Result<String, SimulationError> {
        Err(SimulationError::ExecutableNotFound {
            path: PathBuf::from("/nonexistent/ngspice"),
        })
    }
}

#[test]
fn test_timeout_is_recoverable() {
    let dir = tempfile::tempdir().unwrap();
    let mut objective = evaluator(dir.path(), SERIES_RLC, Box::new(TimingOut));
    let evaluation = objective.evaluate(&truth(), key(0)).unwrap();
    assert_eq!(evaluation.error, DEFAULT_PENALTY);
    assert_eq!(objective.stats().timeouts, 1);
}

#[test]
fn test_missing_executable_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut objective = evaluator(dir.path(), SERIES_RLC, Box::new(MissingBinary));
    let result = objective.evaluate(&truth(), key(0));
    assert!(matches!(
        result,
        Err(FitError::Simulation(SimulationError::ExecutableNotFound { .. }))
    ));
}

#[test]
fn test_netlists_are_removed_unless_kept() {
    let dir = tempfile::tempdir().unwrap();
    let mut objective = evaluator(dir.path(), SERIES_RLC, Box::new(FakeSpice::series_rlc()));
    objective.evaluate(&truth(), EvalKey::new(Stage::Local, 3, 7)).unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

    let mut kept = ObjectiveEvaluator::new(
        NetlistTemplate::parse(SERIES_RLC).unwrap(),
        baseline(),
        Box::new(FakeSpice::series_rlc()),
        space(),
        EvaluatorSettings {
            keep_netlists: true,
            ..settings(dir.path())
        },
    )
    .unwrap();
    kept.evaluate(&truth(), EvalKey::new(Stage::Local, 3, 7)).unwrap();
    assert!(dir.path().join("unit_local_3_7.cir").is_file());
}

#[test]
fn test_fork_has_fresh_cache_and_stats() {
    let dir = tempfile::tempdir().unwrap();
    let mut objective = evaluator(dir.path(), SERIES_RLC, Box::new(FakeSpice::series_rlc()));
    objective.evaluate(&truth(), key(0)).unwrap();

    let mut worker = objective.fork();
    assert_eq!(worker.stats().evaluations, 0);
    let evaluation = worker.evaluate(&truth(), key(1)).unwrap();
    assert!(!evaluation.cached);

    objective.merge_stats(&worker.stats());
    assert_eq!(objective.stats().evaluations, 2);
}

#[test]
fn test_log_scaled_matches_linear() {
    let dir = tempfile::tempdir().unwrap();
    let mut linear = evaluator(dir.path(), SERIES_RLC, Box::new(FakeSpice::series_rlc()));
    let point = array![20.0, 2e-6, 5e-10];
    let expected = linear.evaluate(&point, key(0)).unwrap().error;

    let mut scaled = LogScaled::new(linear.fork());
    let got = scaled.evaluate(&point.mapv(f64::log10), key(1)).unwrap().error;
    assert!((got - expected).abs() < 1e-9);
}
