//! Complete two-stage fits against the fake simulator.

use crate::test_helpers::{
    baseline_table, init_tracing, measurement_axis, wideband_axis, wideband_circuit,
    wideband_parameters, FakeSpice, SeriesRlc, SERIES_RLC, TRUE_C, TRUE_L, TRUE_R,
};
use approx::assert_relative_eq;
use spicefit_rs::config::FitConfig;
use spicefit_rs::error::FitError;
use spicefit_rs::fit::{final_curve, read_summary, FitSession};
use spicefit_rs::global_opt::DeConfig;
use spicefit_rs::history::read_history;
use spicefit_rs::parameters::ParameterSpec;
use spicefit_rs::simulator::SimulationError;
use std::path::Path;

fn write_inputs(dir: &Path) -> FitConfig {
    let template = dir.join("rlc.cir");
    let baseline = dir.join("measured.csv");
    std::fs::write(&template, SERIES_RLC).unwrap();
    std::fs::write(
        &baseline,
        baseline_table(&SeriesRlc::reference(), &measurement_axis()),
    )
    .unwrap();

    FitConfig::new(
        template,
        baseline,
        vec![
            ParameterSpec::new("R1", 1.0, 100.0),
            ParameterSpec::new("L1", 1e-7, 1e-5),
            ParameterSpec::new("C1", 1e-10, 1e-8),
        ],
    )
    .with_run_id("rlc")
    .with_dirs(dir.join("work"), dir.join("results"))
    .with_global(DeConfig {
        max_generations: 150,
        ..DeConfig::default()
    })
}

#[test]
fn test_fit_recovers_series_rlc() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = write_inputs(dir.path());

    let report = FitSession::new(config, Box::new(FakeSpice::series_rlc()))
        .unwrap()
        .run()
        .unwrap();

    assert_relative_eq!(report.value("R1").unwrap(), TRUE_R, max_relative = 0.05);
    assert_relative_eq!(report.value("L1").unwrap(), TRUE_L, max_relative = 0.05);
    assert_relative_eq!(report.value("C1").unwrap(), TRUE_C, max_relative = 0.05);
    assert!(report.final_error < 0.05, "final error {}", report.final_error);
    assert!(report.local_error <= report.global_error);
    assert_eq!(report.stats.failures(), 0);

    // Every artefact is on disk and readable
    let global = read_history(&report.artifacts.global_history).unwrap();
    assert_eq!(global.records.len(), report.global_generations + 1);
    assert!(global.errors().windows(2).all(|w| w[1] <= w[0]));

    let local = read_history(&report.artifacts.local_history).unwrap();
    assert_eq!(local.records.len(), report.local_iterations + 1);
    assert_relative_eq!(
        local.records[0].params[0],
        global.records.last().unwrap().params[0],
        max_relative = 1e-9
    );

    let summary = read_summary(&report.artifacts.summary).unwrap();
    assert_eq!(summary, report);
    assert!(final_curve(&report).unwrap().is_some());

    // Rendered netlists are cleaned up
    assert_eq!(std::fs::read_dir(dir.path().join("work")).unwrap().count(), 0);
}

#[test]
fn test_wideband_fit_within_two_decade_bounds() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("rlc.cir");
    let baseline = dir.path().join("measured.csv");
    let truth = wideband_circuit();
    std::fs::write(&template, SERIES_RLC).unwrap();
    std::fs::write(&baseline, baseline_table(&truth, &wideband_axis())).unwrap();

    let config = FitConfig::new(template, baseline, wideband_parameters())
        .with_run_id("wideband")
        .with_dirs(dir.path().join("work"), dir.path().join("results"))
        .with_global(DeConfig {
            parallel: true,
            ..DeConfig::default()
        });

    let report = FitSession::new(config, Box::new(FakeSpice::wideband()))
        .unwrap()
        .run()
        .unwrap();

    assert_relative_eq!(report.value("R1").unwrap(), truth.r, max_relative = 0.05);
    assert_relative_eq!(report.value("L1").unwrap(), truth.l, max_relative = 0.05);
    assert_relative_eq!(report.value("C1").unwrap(), truth.c, max_relative = 0.05);
    assert!(report.final_error < 0.05, "final error {}", report.final_error);
    assert!(report.local_success, "local status: {}", report.local_status);
}

#[test]
fn test_fit_survives_simulator_failures() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_inputs(dir.path());
    let simulator = FakeSpice::series_rlc().failing_above_r(60.0);

    let report = FitSession::new(config, Box::new(simulator))
        .unwrap()
        .run()
        .unwrap();

    assert!(report.stats.simulation_failures > 0);
    assert!(report.final_error < 0.1);
    assert!(report.value("R1").unwrap() <= 60.0);
}

#[test]
fn test_unknown_placeholder_is_rejected_before_running() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_inputs(dir.path());
    std::fs::write(&config.template, format!("{}RS a b ${{RS}}\n", SERIES_RLC)).unwrap();

    let result = FitSession::new(config, Box::new(FakeSpice::series_rlc()));
    match result {
        Err(FitError::Config(message)) => assert!(message.contains("RS")),
        other => panic!("expected a configuration error, got {:?}", other),
    }
}

#[test]
fn test_missing_template_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = write_inputs(dir.path());
    config.template = dir.path().join("absent.cir");

    let result = FitSession::new(config, Box::new(FakeSpice::series_rlc()));
    assert!(matches!(result, Err(FitError::Template(_))));
}

#[test]
fn test_missing_simulator_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = write_inputs(dir.path());
    config.simulator.executable = dir.path().join("no-such-ngspice");

    let result = FitSession::from_config(config);
    assert!(matches!(
        result,
        Err(FitError::Simulation(SimulationError::ExecutableNotFound { .. }))
    ));
}

#[test]
fn test_baseline_without_mode_column_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_inputs(dir.path()).with_mode("XY");

    let result = FitSession::new(config, Box::new(FakeSpice::series_rlc()));
    assert!(matches!(result, Err(FitError::InvalidInput(_))));
}
