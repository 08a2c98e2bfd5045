//! Main test file for spicefit-rs
//!
//! This file organizes and includes all test modules for the library.

// Template, parser and objective tests
mod pipeline;

// Optimisation stage tests
mod optimization;

// Integration tests that test the library as a whole
mod integration;

/// Test helpers - common utilities for tests
pub mod test_helpers {
    use ndarray::Array1;
    use spicefit_rs::netlist::NetlistTemplate;
    use spicefit_rs::parameters::ParameterSpec;
    use spicefit_rs::simulator::{SimulationError, Simulator};
    use std::collections::HashMap;
    use std::f64::consts::PI;
    use std::path::Path;
    use std::time::Duration;

    /// Netlist of a series RLC driven by a 1 V AC source.
    pub const SERIES_RLC: &str = "\
* series RLC test fixture
V1 in 0 AC 1
R1 in n1 ${R1}
L1 n1 n2 ${L1}
C1 n2 0 ${C1}
.ac dec 10 1e4 1e8
.print ac v(in)/i(V1)
.end
";

    /// Reference values used to generate synthetic measurements.
    pub const TRUE_R: f64 = 10.0;
    pub const TRUE_L: f64 = 1.0e-6;
    pub const TRUE_C: f64 = 1.0e-9;

    /// Install a tracing subscriber for the current test, if none is set.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Analytic series RLC impedance.
    #[derive(Debug, Clone, Copy)]
    pub struct SeriesRlc {
        pub r: f64,
        pub l: f64,
        pub c: f64,
    }

    impl SeriesRlc {
        pub fn new(r: f64, l: f64, c: f64) -> Self {
            Self { r, l, c }
        }

        pub fn reference() -> Self {
            Self::new(TRUE_R, TRUE_L, TRUE_C)
        }

        /// Real and imaginary part of Z at `frequency` Hz.
        pub fn impedance(&self, frequency: f64) -> (f64, f64) {
            let omega = 2.0 * PI * frequency;
            (self.r, omega * self.l - 1.0 / (omega * self.c))
        }

        pub fn magnitude(&self, frequency: f64) -> f64 {
            let (re, im) = self.impedance(frequency);
            re.hypot(im)
        }

        pub fn magnitudes(&self, axis: &Array1<f64>) -> Array1<f64> {
            axis.mapv(|f| self.magnitude(f))
        }
    }

    /// `n` log-spaced frequencies from `start` to `stop`.
    pub fn log_axis(start: f64, stop: f64, n: usize) -> Array1<f64> {
        Array1::logspace(10.0, start.log10(), stop.log10(), n)
    }

    /// Frequency axis of the synthetic measurement.
    pub fn measurement_axis() -> Array1<f64> {
        log_axis(1e4, 1e8, 41)
    }

    /// Wideband measurement: 401 log-spaced points from 1 MHz to 3 GHz.
    pub fn wideband_axis() -> Array1<f64> {
        log_axis(1e6, 3e9, 401)
    }

    /// Circuit behind the wideband measurement.
    pub fn wideband_circuit() -> SeriesRlc {
        SeriesRlc::new(50.0, 2.2e-6, 4.7e-12)
    }

    /// Bounds two decades either side of the wideband circuit values.
    pub fn wideband_parameters() -> Vec<ParameterSpec> {
        let truth = wideband_circuit();
        [("R1", truth.r), ("L1", truth.l), ("C1", truth.c)]
            .into_iter()
            .map(|(name, value)| ParameterSpec::new(name, value / 100.0, value * 100.0))
            .collect()
    }

    /// Baseline table text in the measured-data layout.
    pub fn baseline_table(model: &SeriesRlc, axis: &Array1<f64>) -> String {
        let mut text = String::from("Frequency_Hz,Z_CM,Z_DM\n");
        for &f in axis.iter() {
            text.push_str(&format!("{:e},{:e},{:e}\n", f, model.magnitude(f), 1.0));
        }
        text
    }

    /// In-process stand-in for ngspice.
    ///
    /// Reads the rendered netlist, recovers the R/L/C values through the template and
    /// prints the series RLC impedance as a `Values:` block.
    pub struct FakeSpice {
        template: NetlistTemplate,
        axis: Array1<f64>,
        /// Fail with a diagnostic whenever `R1` exceeds this value
        fail_above_r: Option<f64>,
    }

    impl FakeSpice {
        pub fn new(template: NetlistTemplate, axis: Array1<f64>) -> Self {
            Self {
                template,
                axis,
                fail_above_r: None,
            }
        }

        pub fn series_rlc() -> Self {
            Self::new(
                NetlistTemplate::parse(SERIES_RLC).unwrap(),
                measurement_axis(),
            )
        }

        pub fn wideband() -> Self {
            Self::new(NetlistTemplate::parse(SERIES_RLC).unwrap(), wideband_axis())
        }

        pub fn failing_above_r(mut self, limit: f64) -> Self {
            self.fail_above_r = Some(limit);
            self
        }

        fn values(&self, netlist: &str) -> Result<HashMap<String, f64>, SimulationError> {
            let extracted = self.template.extract(netlist).ok_or_else(|| {
                SimulationError::Diagnostics {
                    message: "netlist does not match the fixture".to_string(),
                }
            })?;
            extracted
                .into_iter()
                .map(|(name, text)| {
                    text.trim()
                        .parse::<f64>()
                        .map(|v| (name.clone(), v))
                        .map_err(|_| SimulationError::Diagnostics {
                            message: format!("cannot read value of {}: {}", name, text),
                        })
                })
                .collect()
        }
    }

    impl Simulator for FakeSpice {
        fn run(&self, netlist: &Path, _timeout: Duration) -> Result<String, SimulationError> {
            let text = std::fs::read_to_string(netlist).map_err(|_| {
                SimulationError::NetlistNotFound {
                    path: netlist.to_path_buf(),
                }
            })?;
            let values = self.values(&text)?;
            let model = SeriesRlc::new(values["R1"], values["L1"], values["C1"]);

            if let Some(limit) = self.fail_above_r {
                if model.r > limit {
                    return Err(SimulationError::Diagnostics {
                        message: format!("Error: R1 = {} out of range", model.r),
                    });
                }
            }

            let mut out = String::from("Circuit: series rlc test fixture\n\nValues:\n");
            for &f in self.axis.iter() {
                let (re, im) = model.impedance(f);
                out.push_str(&format!("{:.15e}\t{:.15e},{:.15e}\n", f, re, im));
            }
            out.push_str("\nTotal analysis time (seconds) = 0.001\n");
            Ok(out)
        }

        fn name(&self) -> &str {
            "fake-spice"
        }
    }
}
