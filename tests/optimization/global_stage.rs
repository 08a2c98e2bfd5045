//! Differential evolution driving the simulator objective.

use crate::test_helpers::{init_tracing, measurement_axis, FakeSpice, SeriesRlc, SERIES_RLC};
use spicefit_rs::curve::BaselineDataset;
use spicefit_rs::global_opt::{DifferentialEvolution, GlobalOptimizer};
use spicefit_rs::history::{read_history, CurveArchive, HistoryStore};
use spicefit_rs::netlist::NetlistTemplate;
use spicefit_rs::objective::{EvaluatorSettings, Objective, ObjectiveEvaluator};
use spicefit_rs::parameters::{ParameterSpace, ParameterSpec};
use std::path::Path;

fn space() -> ParameterSpace {
    ParameterSpace::new(&[
        ParameterSpec::new("R1", 1.0, 100.0),
        ParameterSpec::new("L1", 1e-7, 1e-5),
        ParameterSpec::new("C1", 1e-10, 1e-8),
    ])
    .unwrap()
}

fn evaluator(work_dir: &Path, simulator: FakeSpice) -> ObjectiveEvaluator {
    let axis = measurement_axis();
    let magnitudes = SeriesRlc::reference().magnitudes(&axis);
    ObjectiveEvaluator::new(
        NetlistTemplate::parse(SERIES_RLC).unwrap(),
        BaselineDataset::new(axis, magnitudes).unwrap(),
        Box::new(simulator),
        space(),
        EvaluatorSettings {
            run_id: "de".to_string(),
            work_dir: work_dir.to_path_buf(),
            ..EvaluatorSettings::default()
        },
    )
    .unwrap()
}

fn optimizer() -> DifferentialEvolution {
    DifferentialEvolution::new()
        .with_population_multiplier(8)
        .with_max_generations(25)
        .with_tolerance(0.0, 0.0)
        .with_seed(7)
}

#[test]
fn test_history_rows_match_generations() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut objective = evaluator(&dir.path().join("work"), FakeSpice::series_rlc());
    let mut store = HistoryStore::open(dir.path(), "de_global", space().names()).unwrap();

    let result = optimizer()
        .optimize(&mut objective, &space().linear_bounds(), &mut store)
        .unwrap();
    let history_path = store.history_path().to_path_buf();
    let archive_path = store.finalize().unwrap();

    let table = read_history(&history_path).unwrap();
    assert_eq!(table.names, vec!["R1", "L1", "C1"]);
    assert_eq!(table.records.len(), result.iterations + 1);
    assert_eq!(result.iterations, 25);
    assert!(table
        .records
        .iter()
        .enumerate()
        .all(|(i, r)| r.iteration == i));

    let errors = table.errors();
    assert!(errors.windows(2).all(|w| w[1] <= w[0]), "{:?}", errors);
    assert_eq!(*errors.last().unwrap(), result.cost);
    assert!(errors[errors.len() - 1] < errors[0]);

    // Parameters are recorded in linear units inside the bounds
    for record in &table.records {
        for (value, (lo, hi)) in record.params.iter().zip(space().linear_bounds()) {
            assert!(*value >= lo && *value <= hi);
        }
    }

    let archive = CurveArchive::load(&archive_path).unwrap();
    assert_eq!(archive.len(), table.records.len());
    assert!(archive.get("iter_0025").is_some());
}

#[test]
fn test_parallel_run_records_same_history() {
    let serial_dir = tempfile::tempdir().unwrap();
    let parallel_dir = tempfile::tempdir().unwrap();

    let run = |dir: &Path, optimizer: DifferentialEvolution| {
        let mut objective = evaluator(&dir.join("work"), FakeSpice::series_rlc());
        let mut store = HistoryStore::open(dir, "de", space().names()).unwrap();
        let result = optimizer
            .optimize(&mut objective, &space().linear_bounds(), &mut store)
            .unwrap();
        (result, read_history(store.history_path()).unwrap(), objective.stats())
    };

    let (serial, serial_table, serial_stats) = run(serial_dir.path(), optimizer());
    let (parallel, parallel_table, parallel_stats) =
        run(parallel_dir.path(), optimizer().with_parallel(Some(4)));

    assert_eq!(serial.params, parallel.params);
    assert_eq!(serial_table, parallel_table);
    assert_eq!(
        serial_stats.evaluations + serial_stats.cache_hits,
        parallel_stats.evaluations + parallel_stats.cache_hits
    );
}

#[test]
fn test_failures_do_not_stop_the_search() {
    let dir = tempfile::tempdir().unwrap();
    let mut objective = evaluator(dir.path(), FakeSpice::series_rlc().failing_above_r(50.0));
    let mut store = HistoryStore::open(dir.path(), "de_fail", space().names()).unwrap();

    let result = optimizer()
        .optimize(&mut objective, &space().linear_bounds(), &mut store)
        .unwrap();

    assert!(objective.stats().simulation_failures > 0);
    assert!(result.cost < 1.0);
    assert!(result.params[0] <= 50.0);
}
