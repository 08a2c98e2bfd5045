//! Tests for simulator output parsing on full ngspice-style listings.

use crate::test_helpers::{FakeSpice, SeriesRlc, SERIES_RLC};
use approx::assert_relative_eq;
use spicefit_rs::netlist::NetlistTemplate;
use spicefit_rs::output::{parse, parse_detailed, OutputFormat};
use spicefit_rs::simulator::Simulator;
use std::time::Duration;

/// Listing with a page break that repeats the column header mid-table.
const PAGED_LISTING: &str = "\
Note: No compatibility mode selected!

Circuit: * series rlc

Doing analysis at TEMP = 27.000000 and TNOM = 27.000000

No. of Data Rows : 5
                                    AC Analysis  Tue Oct 14 09:12:55  2025
--------------------------------------------------------------------------------
Index   frequency       v(in)/i(v1)
--------------------------------------------------------------------------------
0\t1.000000e+04\t1.000000e+01,\t-1.591487e+04
1\t1.000000e+05\t1.000000e+01,\t-1.590859e+03
2\t1.000000e+06\t1.000000e+01,\t-1.528717e+02

                                    AC Analysis  Tue Oct 14 09:12:55  2025
";

#[test]
fn test_indexed_listing_stops_at_page_break() {
    let parsed = parse_detailed(PAGED_LISTING).unwrap();
    assert_eq!(parsed.format, OutputFormat::Indexed);
    assert_eq!(parsed.curve.len(), 3);
    assert_eq!(parsed.skipped_rows, 0);
    assert_eq!(parsed.curve.real()[2], 10.0);
    assert_eq!(parsed.curve.imag()[1], -1.590859e3);
}

#[test]
fn test_repeated_header_is_not_a_malformed_row() {
    let raw = "\
Index   frequency       v(in)
0 1e4 1.0 2.0
Index   frequency       v(in)
-----------------------------
1 1e5 3.0 4.0
";
    let parsed = parse_detailed(raw).unwrap();
    assert_eq!(parsed.curve.len(), 2);
    assert_eq!(parsed.skipped_rows, 0);
    assert_eq!(parsed.curve.frequencies()[1], 1e5);
}

#[test]
fn test_fake_simulator_output_parses_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let template = NetlistTemplate::parse(SERIES_RLC).unwrap();
    let netlist = template
        .render_values(
            &[
                ("R1".to_string(), 10.0),
                ("L1".to_string(), 1e-6),
                ("C1".to_string(), 1e-9),
            ],
            12,
        )
        .unwrap();
    let path = dir.path().join("rlc.cir");
    std::fs::write(&path, netlist).unwrap();

    let raw = FakeSpice::series_rlc()
        .run(&path, Duration::from_secs(1))
        .unwrap();
    let parsed = parse_detailed(&raw).unwrap();
    assert_eq!(parsed.format, OutputFormat::Values);
    assert_eq!(parsed.curve.len(), 41);

    let model = SeriesRlc::reference();
    for (f, m) in parsed
        .curve
        .frequencies()
        .iter()
        .zip(parsed.curve.magnitudes().iter())
    {
        assert_relative_eq!(*m, model.magnitude(*f), max_relative = 1e-12);
    }
}

#[test]
fn test_diagnostic_only_output_has_no_curve() {
    let raw = "\
Error on line 3 :
  r1 in n1 nan
Error: bad value
";
    assert!(parse(raw).is_none());
}
