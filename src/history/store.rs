//! Append-only CSV history of optimiser iterations.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::archive::{iteration_key, CurveArchive};
use crate::curve::SimulatedCurve;
use crate::error::{FitError, Result};
use crate::observer::{IterationEvent, IterationObserver};

/// One logged iteration: index, error and the parameter vector in linear units.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub iteration: usize,
    pub error: f64,
    pub params: Vec<f64>,
}

/// Parsed contents of a history file.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryTable {
    /// Parameter column names, in order
    pub names: Vec<String>,
    pub records: Vec<HistoryRecord>,
}

impl HistoryTable {
    /// Errors in row order.
    pub fn errors(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.error).collect()
    }
}

/// History/checkpoint store for a single optimisation stage.
///
/// Records are appended to `<run_id>_history.csv` and flushed one at a time, so the
/// file always holds every completed iteration. Curves go to an in-memory
/// [`CurveArchive`] that [`HistoryStore::finalize`] writes to `<run_id>_curves.npz`.
#[derive(Debug)]
pub struct HistoryStore {
    history_path: PathBuf,
    archive_path: PathBuf,
    names: Vec<String>,
    archive: CurveArchive,
    rows: usize,
}

impl HistoryStore {
    /// Create the store, writing the CSV header `iteration,error,<names...>`.
    ///
    /// An existing history for the same `run_id` in `dir` is replaced.
    pub fn open(dir: impl AsRef<Path>, run_id: &str, names: &[String]) -> Result<Self> {
        let dir = dir.as_ref();
        if run_id.is_empty() {
            return Err(FitError::Config("run id must not be empty".to_string()));
        }
        if let Some(name) = names.iter().find(|n| n.contains(',') || n.contains('\n')) {
            return Err(FitError::History(format!(
                "parameter name '{}' cannot be used as a CSV column",
                name
            )));
        }
        fs::create_dir_all(dir)?;

        let history_path = dir.join(format!("{}_history.csv", run_id));
        let archive_path = dir.join(format!("{}_curves.npz", run_id));

        let mut writer = BufWriter::new(File::create(&history_path)?);
        let mut header = vec!["iteration".to_string(), "error".to_string()];
        header.extend(names.iter().cloned());
        writeln!(writer, "{}", header.join(","))?;
        writer.flush()?;

        debug!(path = %history_path.display(), "opened history");

        Ok(Self {
            history_path,
            archive_path,
            names: names.to_vec(),
            archive: CurveArchive::new(),
            rows: 0,
        })
    }

    pub fn history_path(&self) -> &Path {
        &self.history_path
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of records appended so far.
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn archive(&self) -> &CurveArchive {
        &self.archive
    }

    /// Append one record and flush it to disk.
    pub fn append(&mut self, record: &HistoryRecord) -> Result<()> {
        if record.params.len() != self.names.len() {
            return Err(FitError::DimensionMismatch(format!(
                "history has {} parameter columns, record has {}",
                self.names.len(),
                record.params.len()
            )));
        }

        let file = OpenOptions::new().append(true).open(&self.history_path)?;
        let mut writer = BufWriter::new(file);
        let mut fields = Vec::with_capacity(record.params.len() + 2);
        fields.push(record.iteration.to_string());
        fields.push(record.error.to_string());
        fields.extend(record.params.iter().map(|v| v.to_string()));
        writeln!(writer, "{}", fields.join(","))?;
        writer.flush()?;

        self.rows += 1;
        Ok(())
    }

    /// Store a curve in the archive under `key`.
    pub fn store_curve(&mut self, key: impl Into<String>, curve: SimulatedCurve) -> Result<()> {
        self.archive.insert(key, curve)
    }

    /// Persist the curve archive and close the store.
    ///
    /// # Returns
    ///
    /// * The path of the written archive
    pub fn finalize(self) -> Result<PathBuf> {
        self.archive.save(&self.archive_path)?;
        info!(
            rows = self.rows,
            curves = self.archive.len(),
            path = %self.archive_path.display(),
            "history finalized"
        );
        Ok(self.archive_path)
    }
}

impl IterationObserver for HistoryStore {
    fn on_iteration(&mut self, event: &IterationEvent<'_>) -> Result<()> {
        self.append(&HistoryRecord {
            iteration: event.index,
            error: event.error,
            params: event.params.to_vec(),
        })?;
        if let Some(curve) = event.curve {
            self.store_curve(iteration_key(event.index), curve.clone())?;
        }
        Ok(())
    }
}

/// Read a history file written by [`HistoryStore`].
pub fn read_history(path: impl AsRef<Path>) -> Result<HistoryTable> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines();

    let header = lines
        .next()
        .transpose()?
        .ok_or_else(|| FitError::History(format!("{} is empty", path.display())))?;
    let columns: Vec<&str> = header.trim_end().split(',').collect();
    if columns.len() < 2 || columns[0] != "iteration" || columns[1] != "error" {
        return Err(FitError::History(format!(
            "{} does not start with 'iteration,error'",
            path.display()
        )));
    }
    let names: Vec<String> = columns[2..].iter().map(|s| s.to_string()).collect();

    let mut records = Vec::new();
    for (number, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row = number + 2;
        let bad_row = || FitError::History(format!("{}:{}: malformed row", path.display(), row));

        let fields: Vec<&str> = line.trim_end().split(',').collect();
        if fields.len() != names.len() + 2 {
            return Err(bad_row());
        }
        let iteration = fields[0].parse::<usize>().map_err(|_| bad_row())?;
        let error = fields[1].parse::<f64>().map_err(|_| bad_row())?;
        let params = fields[2..]
            .iter()
            .map(|f| f.parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| bad_row())?;
        records.push(HistoryRecord {
            iteration,
            error,
            params,
        });
    }

    Ok(HistoryTable { names, records })
}
