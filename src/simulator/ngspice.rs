//! ngspice process runner.
//!
//! Invokes ngspice in batch mode as a subprocess. The result is written by the
//! simulator to a temporary output file and its diagnostic stream is captured in a
//! second temporary file; both are removed when the call returns, on every path.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::{SimulationError, Simulator};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration for the ngspice runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NgspiceConfig {
    /// Path to the ngspice executable, or a bare name looked up on `PATH`.
    pub executable: PathBuf,

    /// Per-call timeout in seconds.
    pub timeout_secs: f64,

    /// Flag selecting batch mode.
    pub batch_flag: String,

    /// Flag preceding the output file path.
    pub output_flag: String,
}

impl Default for NgspiceConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("ngspice"),
            timeout_secs: 30.0,
            batch_flag: "-b".to_string(),
            output_flag: "-o".to_string(),
        }
    }
}

impl NgspiceConfig {
    /// The configured timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs.max(0.0))
    }
}

/// Runs netlists through an ngspice binary.
#[derive(Debug, Clone)]
pub struct NgspiceRunner {
    config: NgspiceConfig,
    executable: PathBuf,
}

impl NgspiceRunner {
    /// Create a runner, resolving the executable up front.
    ///
    /// # Errors
    ///
    /// `SimulationError::ExecutableNotFound` if the executable is neither an existing
    /// file nor found on `PATH`.
    pub fn new(config: NgspiceConfig) -> Result<Self, SimulationError> {
        let executable =
            resolve_executable(&config.executable).ok_or_else(|| {
                SimulationError::ExecutableNotFound {
                    path: config.executable.clone(),
                }
            })?;

        debug!(executable = %executable.display(), "resolved simulator executable");
        Ok(Self { config, executable })
    }

    /// The configuration this runner was built with.
    pub fn config(&self) -> &NgspiceConfig {
        &self.config
    }

    /// Absolute path of the executable that will be spawned.
    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

impl Simulator for NgspiceRunner {
    fn run(&self, netlist: &Path, timeout: Duration) -> Result<String, SimulationError> {
        // The binary may have been removed since construction
        if !self.executable.is_file() {
            return Err(SimulationError::ExecutableNotFound {
                path: self.executable.clone(),
            });
        }
        if !netlist.is_file() {
            return Err(SimulationError::NetlistNotFound {
                path: netlist.to_path_buf(),
            });
        }

        let output_file = temp_file(".out")?;
        let stderr_file = temp_file(".err")?;
        let stderr_handle = stderr_file
            .reopen()
            .map_err(|e| SimulationError::Internal(format!("stderr capture: {}", e)))?;

        let mut cmd = Command::new(&self.executable);
        cmd.arg(&self.config.batch_flag)
            .arg(&self.config.output_flag)
            .arg(output_file.path())
            .arg(netlist)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr_handle));

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SimulationError::ExecutableNotFound {
                    path: self.executable.clone(),
                }
            } else {
                SimulationError::Spawn(e.to_string())
            }
        })?;

        let status = wait_with_timeout(child, timeout)?;
        debug!(netlist = %netlist.display(), %status, "simulator exited");

        let diagnostics = read_lossy(stderr_file.path())?;
        if !diagnostics.trim().is_empty() {
            return Err(SimulationError::Diagnostics {
                message: summarize(&diagnostics),
            });
        }

        let output = read_lossy(output_file.path())?;
        if output.trim().is_empty() {
            if !status.success() {
                warn!(%status, "simulator exited unsuccessfully without diagnostics");
            }
            return Err(SimulationError::EmptyOutput);
        }

        Ok(output)
    }

    fn name(&self) -> &str {
        "ngspice"
    }
}

/// Look up an executable as given, or on `PATH` when it is a bare name.
pub fn resolve_executable(executable: &Path) -> Option<PathBuf> {
    if executable.components().count() > 1 || executable.is_absolute() {
        return executable.is_file().then(|| executable.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(executable))
        .find(|candidate| candidate.is_file())
}

fn temp_file(suffix: &str) -> Result<NamedTempFile, SimulationError> {
    tempfile::Builder::new()
        .prefix("spicefit_")
        .suffix(suffix)
        .tempfile()
        .map_err(|e| SimulationError::Internal(format!("temporary file: {}", e)))
}

fn read_lossy(path: &Path) -> Result<String, SimulationError> {
    let mut bytes = Vec::new();
    std::fs::File::open(path)
        .and_then(|mut f| f.read_to_end(&mut bytes))
        .map_err(|e| SimulationError::Internal(format!("reading {}: {}", path.display(), e)))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// First few diagnostic lines, enough to identify the failure in a log.
fn summarize(diagnostics: &str) -> String {
    let lines: Vec<&str> = diagnostics
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let mut message = lines.iter().take(5).copied().collect::<Vec<_>>().join("; ");
    if lines.len() > 5 {
        message.push_str(&format!(" (+{} more lines)", lines.len() - 5));
    }
    message
}

/// Wait for a child process, killing it once `timeout` has elapsed.
fn wait_with_timeout(mut child: Child, timeout: Duration) -> Result<ExitStatus, SimulationError> {
    let start = Instant::now();

    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    // Reap so the process does not linger as a zombie
                    let _ = child.wait();
                    return Err(SimulationError::Timeout {
                        seconds: timeout.as_secs_f64(),
                    });
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                let _ = child.kill();
                return Err(SimulationError::Internal(format!("waiting for simulator: {}", e)));
            }
        }
    }
}
