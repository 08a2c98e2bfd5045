//! SQP refinement in log10 space on the simulator objective.

use crate::test_helpers::{
    measurement_axis, wideband_axis, wideband_circuit, wideband_parameters, FakeSpice, SeriesRlc,
    SERIES_RLC, TRUE_C, TRUE_L, TRUE_R,
};
use approx::assert_relative_eq;
use ndarray::array;
use spicefit_rs::curve::BaselineDataset;
use spicefit_rs::history::{read_history, HistoryStore};
use spicefit_rs::local_opt::{SqpConfig, SqpOptimizer};
use spicefit_rs::netlist::NetlistTemplate;
use spicefit_rs::objective::{EvaluatorSettings, LogScaled, Objective, ObjectiveEvaluator};
use spicefit_rs::observer::{LogToLinear, RecordingObserver};
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

fn log_objective(work_dir: &Path) -> LogScaled<ObjectiveEvaluator> {
    let axis = measurement_axis();
    let magnitudes = SeriesRlc::reference().magnitudes(&axis);
    LogScaled::new(
        ObjectiveEvaluator::new(
            NetlistTemplate::parse(SERIES_RLC).unwrap(),
            BaselineDataset::new(axis, magnitudes).unwrap(),
            Box::new(FakeSpice::series_rlc()),
            space(),
            EvaluatorSettings {
                run_id: "sqp".to_string(),
                work_dir: work_dir.to_path_buf(),
                ..EvaluatorSettings::default()
            },
        )
        .unwrap(),
    )
}

#[test]
fn test_refines_nearby_start() {
    let dir = tempfile::tempdir().unwrap();
    let mut objective = log_objective(dir.path());
    let start = space().to_log10(&array![14.0, 1.5e-6, 0.7e-9]);

    let mut observer = RecordingObserver::new();
    let result = SqpOptimizer::new(SqpConfig::default())
        .minimize(&mut objective, &start, &space().log10_bounds(), &mut observer)
        .unwrap();

    let fitted = space().from_log10(&result.params);
    assert_relative_eq!(fitted[0], TRUE_R, max_relative = 0.02);
    assert_relative_eq!(fitted[1], TRUE_L, max_relative = 0.02);
    assert_relative_eq!(fitted[2], TRUE_C, max_relative = 0.02);
    assert!(result.cost < 0.01, "cost {}", result.cost);
    assert!(result.success, "{}", result.message);

    let errors = observer.errors();
    assert!(errors.windows(2).all(|w| w[1] <= w[0]));
    assert!(observer.events.iter().all(|e| e.curve.is_some()));

    // Accepted iterates are re-queried right after being accepted
    assert!(objective.stats().cache_hits >= result.iterations);
}

#[test]
fn test_history_is_written_in_linear_units() {
    let dir = tempfile::tempdir().unwrap();
    let mut objective = log_objective(&dir.path().join("work"));
    let mut store = HistoryStore::open(dir.path(), "sqp_local", space().names()).unwrap();
    let start_linear = array![30.0, 3e-6, 3e-10];

    let result = SqpOptimizer::new(SqpConfig::default().with_max_iterations(5))
        .minimize(
            &mut objective,
            &space().to_log10(&start_linear),
            &space().log10_bounds(),
            &mut LogToLinear::new(&mut store),
        )
        .unwrap();

    let table = read_history(store.history_path()).unwrap();
    assert_eq!(table.records.len(), result.iterations + 1);
    assert_eq!(table.records[0].iteration, 0);
    for (recorded, expected) in table.records[0].params.iter().zip(start_linear.iter()) {
        assert_relative_eq!(*recorded, *expected, max_relative = 1e-12);
    }
    assert!(table.records.iter().all(|r| r.params[0] >= 1.0 && r.params[0] <= 100.0));
}

#[test]
fn test_wideband_refinement_converges_from_both_sides() {
    let space = ParameterSpace::new(&wideband_parameters()).unwrap();
    let truth = wideband_circuit();
    let axis = wideband_axis();

    for start in [array![70.0, 2.8e-6, 3.6e-12], array![35.0, 1.8e-6, 6e-12]] {
        let dir = tempfile::tempdir().unwrap();
        let mut objective = LogScaled::new(
            ObjectiveEvaluator::new(
                NetlistTemplate::parse(SERIES_RLC).unwrap(),
                BaselineDataset::new(axis.clone(), truth.magnitudes(&axis)).unwrap(),
                Box::new(FakeSpice::wideband()),
                space.clone(),
                EvaluatorSettings {
                    run_id: "wideband".to_string(),
                    work_dir: dir.path().to_path_buf(),
                    ..EvaluatorSettings::default()
                },
            )
            .unwrap(),
        );

        let result = SqpOptimizer::default()
            .minimize(
                &mut objective,
                &space.to_log10(&start),
                &space.log10_bounds(),
                &mut RecordingObserver::new(),
            )
            .unwrap();

        assert!(result.success, "start {:?}: {}", start, result.message);
        let fitted = space.from_log10(&result.params);
        assert_relative_eq!(fitted[0], truth.r, max_relative = 0.01);
        assert_relative_eq!(fitted[1], truth.l, max_relative = 0.01);
        assert_relative_eq!(fitted[2], truth.c, max_relative = 0.01);
    }
}
