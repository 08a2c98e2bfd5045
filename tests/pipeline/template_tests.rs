//! Tests for netlist templates on realistic netlists.

use crate::test_helpers::SERIES_RLC;
use spicefit_rs::netlist::{format_value, NetlistTemplate, TemplateError};
use std::collections::HashMap;

fn rlc_values(r: f64, l: f64, c: f64) -> Vec<(String, f64)> {
    vec![
        ("R1".to_string(), r),
        ("L1".to_string(), l),
        ("C1".to_string(), c),
    ]
}

#[test]
fn test_placeholders_in_document_order() {
    let template = NetlistTemplate::parse(SERIES_RLC).unwrap();
    assert_eq!(template.placeholders(), &["R1", "L1", "C1"]);
}

#[test]
fn test_render_then_extract_recovers_values() {
    let template = NetlistTemplate::parse(SERIES_RLC).unwrap();
    let values = rlc_values(47.0, 2.2e-7, 3.3e-11);
    let rendered = template.render_values(&values, 12).unwrap();

    assert!(rendered.contains("R1 in n1 4.700000000000e1\n"));
    assert!(!rendered.contains('$'));

    let extracted = template.extract(&rendered).unwrap();
    for (name, value) in &values {
        assert_eq!(extracted[name], format_value(*value, 12));
        let parsed: f64 = extracted[name].parse().unwrap();
        assert!((parsed - value).abs() <= value.abs() * 1e-12);
    }
}

#[test]
fn test_missing_parameter_names_first_gap() {
    let template = NetlistTemplate::parse(SERIES_RLC).unwrap();
    let mut values = HashMap::new();
    values.insert("R1".to_string(), "10");
    values.insert("C1".to_string(), "1n");

    match template.render(&values) {
        Err(TemplateError::MissingParameter { name }) => assert_eq!(name, "L1"),
        other => panic!("expected a missing parameter, got {:?}", other),
    }
}

#[test]
fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rlc.cir");
    std::fs::write(&path, SERIES_RLC).unwrap();

    let template = NetlistTemplate::load(&path).unwrap();
    assert_eq!(template.source(), Some(path.as_path()));
    assert_eq!(
        template.segments(),
        NetlistTemplate::parse(SERIES_RLC).unwrap().segments()
    );
}

#[test]
fn test_escaped_dollar_survives_rendering() {
    let template = NetlistTemplate::parse(".param cost=$$5\nR1 a b $R1\n").unwrap();
    let rendered = template.render_values(&[("R1".to_string(), 1.0)], 3).unwrap();
    assert_eq!(rendered, ".param cost=$5\nR1 a b 1.000e0\n");
}
