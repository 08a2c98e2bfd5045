//! Fit a series RLC model to a synthetic impedance measurement.
//!
//! By default the circuit is "simulated" in-process from the rendered netlist, so
//! the demo runs without ngspice. Pass `--ngspice` to run the real simulator
//! instead (it must be on `PATH`).
//!
//! ```text
//! RUST_LOG=info cargo run --example fit_series_rlc
//! ```

use ndarray::Array1;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use spicefit_rs::config::FitConfig;
use spicefit_rs::fit::FitSession;
use spicefit_rs::global_opt::DeConfig;
use spicefit_rs::netlist::NetlistTemplate;
use spicefit_rs::parameters::ParameterSpec;
use spicefit_rs::simulator::{SimulationError, Simulator};
use std::f64::consts::PI;
use std::path::Path;
use std::time::Duration;

const TEMPLATE: &str = "\
* series RLC
V1 in 0 AC 1
R1 in n1 ${R1}
L1 n1 n2 ${L1}
C1 n2 0 ${C1}
.control
ac dec 20 1e4 1e8
print v(in)/(-i(V1))
.endc
.end
";

fn series_rlc(r: f64, l: f64, c: f64, f: f64) -> (f64, f64) {
    let omega = 2.0 * PI * f;
    (r, omega * l - 1.0 / (omega * c))
}

/// Evaluates the series RLC impedance for the values found in the netlist.
struct AnalyticRlc {
    template: NetlistTemplate,
    axis: Array1<f64>,
}

impl Simulator for AnalyticRlc {
    fn run(&self, netlist: &Path, _timeout: Duration) -> Result<String, SimulationError> {
        let text = std::fs::read_to_string(netlist).map_err(|_| SimulationError::NetlistNotFound {
            path: netlist.to_path_buf(),
        })?;
        let values = self
            .template
            .extract(&text)
            .ok_or_else(|| SimulationError::Diagnostics {
                message: "unexpected netlist".to_string(),
            })?;
        let value = |name: &str| -> Result<f64, SimulationError> {
            values
                .get(name)
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| SimulationError::Diagnostics {
                    message: format!("missing value for {}", name),
                })
        };
        let (r, l, c) = (value("R1")?, value("L1")?, value("C1")?);

        let mut out = String::from("Index   frequency       v(in)\n");
        for (i, &f) in self.axis.iter().enumerate() {
            let (re, im) = series_rlc(r, l, c, f);
            out.push_str(&format!("{}\t{:e}\t{:e},\t{:e}\n", i, f, re, im));
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        "analytic-rlc"
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("Series RLC fit");
    println!("==============\n");

    let use_ngspice = std::env::args().any(|a| a == "--ngspice");
    let dir = tempfile::tempdir()?;

    // Synthetic measurement: R = 4.7 Ω, L = 220 nH, C = 2.2 nF with 2% noise
    let (r, l, c) = (4.7, 220e-9, 2.2e-9);
    let axis = Array1::logspace(10.0, 4.0, 8.0, 81);
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let mut table = String::from("Frequency_Hz,Z_CM\n");
    for &f in axis.iter() {
        let (re, im) = series_rlc(r, l, c, f);
        let noisy = re.hypot(im) * (1.0 + rng.gen_range(-0.02..0.02));
        table.push_str(&format!("{:e},{:e}\n", f, noisy));
    }

    let template_path = dir.path().join("series_rlc.cir");
    let baseline_path = dir.path().join("measured.csv");
    std::fs::write(&template_path, TEMPLATE)?;
    std::fs::write(&baseline_path, table)?;

    let config = FitConfig::new(
        &template_path,
        &baseline_path,
        vec![
            ParameterSpec::new("R1", 0.1, 100.0),
            ParameterSpec::new("L1", 1e-9, 1e-5),
            ParameterSpec::new("C1", 1e-12, 1e-7),
        ],
    )
    .with_run_id("demo")
    .with_dirs(dir.path().join("work"), dir.path().join("results"))
    .with_global(DeConfig {
        max_generations: 200,
        ..DeConfig::default()
    });

    let session = if use_ngspice {
        FitSession::from_config(config)?
    } else {
        let simulator = AnalyticRlc {
            template: NetlistTemplate::parse(TEMPLATE)?,
            axis: Array1::logspace(10.0, 4.0, 8.0, 161),
        };
        FitSession::new(config, Box::new(simulator))?
    };

    let report = session.run()?;

    println!("Global stage: error {:.4e} after {} generations", report.global_error, report.global_generations);
    println!("Local stage:  error {:.4e} after {} iterations ({})", report.local_error, report.local_iterations, report.local_status);
    println!();
    println!("{:<6} {:>14} {:>14}", "name", "fitted", "true");
    for (p, truth) in report.parameters.iter().zip([r, l, c]) {
        println!("{:<6} {:>14.4e} {:>14.4e}", p.name, p.value, truth);
    }
    println!();
    println!(
        "{} simulations, {} cache hits, {} failures",
        report.stats.evaluations,
        report.stats.cache_hits,
        report.stats.failures()
    );
    println!("Summary written to {}", report.artifacts.summary.display());

    Ok(())
}
