//! Checkpoint behaviour of the history store.

use ndarray::array;
use spicefit_rs::curve::SimulatedCurve;
use spicefit_rs::error::FitError;
use spicefit_rs::history::{read_history, CurveArchive, HistoryRecord, HistoryStore, FINAL_KEY};
use spicefit_rs::objective::Stage;
use spicefit_rs::observer::{IterationEvent, IterationObserver};

fn names() -> Vec<String> {
    vec!["R1".to_string(), "C1".to_string()]
}

#[test]
fn test_rows_survive_an_abandoned_run() {
    let dir = tempfile::tempdir().unwrap();
    let history_path;
    let archive_path;
    {
        let mut store = HistoryStore::open(dir.path(), "crash", &names()).unwrap();
        history_path = store.history_path().to_path_buf();
        archive_path = store.archive_path().to_path_buf();
        for i in 0..4 {
            store
                .append(&HistoryRecord {
                    iteration: i,
                    error: 1.0 / (i + 1) as f64,
                    params: vec![10.0 + i as f64, 1e-9],
                })
                .unwrap();
        }
        // dropped without finalize
    }

    let table = read_history(&history_path).unwrap();
    assert_eq!(table.records.len(), 4);
    assert_eq!(table.records[3].params, vec![13.0, 1e-9]);
    assert!(!archive_path.exists());
}

#[test]
fn test_reopening_starts_a_fresh_history() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = HistoryStore::open(dir.path(), "run", &names()).unwrap();
    store
        .append(&HistoryRecord {
            iteration: 0,
            error: 0.5,
            params: vec![1.0, 2.0],
        })
        .unwrap();

    let store = HistoryStore::open(dir.path(), "run", &names()).unwrap();
    assert!(read_history(store.history_path()).unwrap().records.is_empty());
}

#[test]
fn test_final_curve_stored_next_to_iterations() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = HistoryStore::open(dir.path(), "run", &names()).unwrap();
    let curve = SimulatedCurve::from_points(&[(1e3, 5.0, -1.0), (1e4, 5.0, 2.0)]);
    let params = array![5.0, 1e-9];

    store
        .on_iteration(&IterationEvent {
            stage: Stage::Local,
            index: 0,
            error: 0.2,
            params: &params,
            curve: Some(&curve),
        })
        .unwrap();
    store.store_curve(FINAL_KEY, curve.clone()).unwrap();
    assert!(matches!(
        store.store_curve(FINAL_KEY, curve.clone()),
        Err(FitError::History(_))
    ));

    let archive = CurveArchive::load(&store.finalize().unwrap()).unwrap();
    assert_eq!(archive.keys().collect::<Vec<_>>(), vec!["final", "iter_0000"]);
    assert_eq!(archive.get(FINAL_KEY), Some(&curve));
}

#[test]
fn test_invalid_column_name_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let result = HistoryStore::open(dir.path(), "run", &["R,1".to_string()]);
    assert!(matches!(result, Err(FitError::History(_))));
}
