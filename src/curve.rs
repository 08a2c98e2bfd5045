//! Frequency-domain curves.
//!
//! - [`SimulatedCurve`]: complex impedance samples returned by one simulator run
//! - [`BaselineDataset`]: the measured magnitude curve a run is fitted against
//!
//! Simulated curves are compared with the baseline after resampling their
//! magnitude onto the baseline frequency axis with [`resample_magnitude`].

use std::path::Path;

use ndarray::{Array1, Array2, ArrayView2};

use crate::error::{FitError, Result};

/// Name of the frequency column in baseline tables.
pub const FREQUENCY_COLUMN: &str = "Frequency_Hz";

/// Sequence of `(frequency, real, imag)` samples from one simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedCurve {
    frequencies: Array1<f64>,
    real: Array1<f64>,
    imag: Array1<f64>,
}

impl SimulatedCurve {
    /// Build a curve from separate component arrays.
    pub fn new(frequencies: Array1<f64>, real: Array1<f64>, imag: Array1<f64>) -> Result<Self> {
        if frequencies.len() != real.len() || frequencies.len() != imag.len() {
            return Err(FitError::DimensionMismatch(format!(
                "curve components have lengths {}, {} and {}",
                frequencies.len(),
                real.len(),
                imag.len()
            )));
        }
        Ok(Self {
            frequencies,
            real,
            imag,
        })
    }

    /// Build a curve from `(frequency, real, imag)` triples.
    pub fn from_points(points: &[(f64, f64, f64)]) -> Self {
        Self {
            frequencies: points.iter().map(|p| p.0).collect(),
            real: points.iter().map(|p| p.1).collect(),
            imag: points.iter().map(|p| p.2).collect(),
        }
    }

    /// Build a curve from an `n × 3` array as stored in the curve archive.
    pub fn from_array2(data: ArrayView2<f64>) -> Result<Self> {
        if data.ncols() != 3 {
            return Err(FitError::DimensionMismatch(format!(
                "curve array must have 3 columns, got {}",
                data.ncols()
            )));
        }
        Ok(Self {
            frequencies: data.column(0).to_owned(),
            real: data.column(1).to_owned(),
            imag: data.column(2).to_owned(),
        })
    }

    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    pub fn frequencies(&self) -> &Array1<f64> {
        &self.frequencies
    }

    pub fn real(&self) -> &Array1<f64> {
        &self.real
    }

    pub fn imag(&self) -> &Array1<f64> {
        &self.imag
    }

    /// Impedance magnitude `|Z| = sqrt(re² + im²)` per sample.
    pub fn magnitudes(&self) -> Array1<f64> {
        self.real
            .iter()
            .zip(self.imag.iter())
            .map(|(re, im)| re.hypot(*im))
            .collect()
    }

    /// The curve as an `n × 3` array of `(frequency, real, imag)` rows.
    pub fn to_array2(&self) -> Array2<f64> {
        let mut out = Array2::zeros((self.len(), 3));
        out.column_mut(0).assign(&self.frequencies);
        out.column_mut(1).assign(&self.real);
        out.column_mut(2).assign(&self.imag);
        out
    }
}

/// Measured impedance magnitude on a fixed, strictly increasing frequency axis.
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineDataset {
    frequencies: Array1<f64>,
    magnitudes: Array1<f64>,
    log_magnitudes: Array1<f64>,
}

impl BaselineDataset {
    /// Create a baseline from frequency/magnitude arrays.
    ///
    /// # Errors
    ///
    /// `FitError::InvalidInput` unless both arrays have the same length of at least
    /// two, frequencies are finite, positive and strictly increasing, and every
    /// magnitude is finite and positive.
    pub fn new(frequencies: Array1<f64>, magnitudes: Array1<f64>) -> Result<Self> {
        if frequencies.len() != magnitudes.len() {
            return Err(FitError::DimensionMismatch(format!(
                "baseline has {} frequencies but {} magnitudes",
                frequencies.len(),
                magnitudes.len()
            )));
        }
        if frequencies.len() < 2 {
            return Err(FitError::InvalidInput(
                "baseline needs at least two points".to_string(),
            ));
        }
        if let Some(i) = frequencies
            .iter()
            .position(|f| !f.is_finite() || *f <= 0.0)
        {
            return Err(FitError::InvalidInput(format!(
                "baseline frequency #{} is not a positive number: {}",
                i, frequencies[i]
            )));
        }
        if let Some(i) = frequencies
            .iter()
            .zip(frequencies.iter().skip(1))
            .position(|(a, b)| b <= a)
        {
            return Err(FitError::InvalidInput(format!(
                "baseline frequencies must be strictly increasing (at index {})",
                i + 1
            )));
        }
        if let Some(i) = magnitudes.iter().position(|m| !m.is_finite() || *m <= 0.0) {
            return Err(FitError::InvalidInput(format!(
                "baseline magnitude #{} is not a positive number: {}",
                i, magnitudes[i]
            )));
        }

        let log_magnitudes = magnitudes.mapv(f64::log10);
        Ok(Self {
            frequencies,
            magnitudes,
            log_magnitudes,
        })
    }

    /// Read a baseline table with a `Frequency_Hz` column and a `Z_<mode>` column.
    ///
    /// Fields may be separated by commas, tabs or runs of whitespace; the separator is
    /// taken from the header line. Lines starting with `#` and blank lines are ignored.
    pub fn from_table(path: impl AsRef<Path>, mode: &str) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::parse_table(&text, mode)
            .map_err(|e| FitError::InvalidInput(format!("{}: {}", path.display(), e)))
    }

    /// Parse baseline table text, see [`BaselineDataset::from_table`].
    pub fn parse_table(text: &str, mode: &str) -> Result<Self> {
        let mut lines = text
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty() && !l.trim_start().starts_with('#'));

        let (_, header) = lines
            .next()
            .ok_or_else(|| FitError::InvalidInput("baseline table is empty".to_string()))?;
        let separator = Separator::detect(header);
        let columns: Vec<String> = separator
            .split(header)
            .map(|c| c.trim_matches(|ch: char| ch == '"' || ch.is_whitespace()).to_string())
            .collect();

        let magnitude_column = format!("Z_{}", mode);
        let find = |name: &str| {
            columns.iter().position(|c| c == name).ok_or_else(|| {
                FitError::InvalidInput(format!(
                    "column '{}' not found (columns: {})",
                    name,
                    columns.join(", ")
                ))
            })
        };
        let freq_idx = find(FREQUENCY_COLUMN)?;
        let mag_idx = find(&magnitude_column)?;

        let mut frequencies = Vec::new();
        let mut magnitudes = Vec::new();
        for (line_no, line) in lines {
            let fields: Vec<&str> = separator.split(line).collect();
            let field = |idx: usize| -> Result<f64> {
                fields
                    .get(idx)
                    .and_then(|f| f.trim().parse::<f64>().ok())
                    .ok_or_else(|| {
                        FitError::InvalidInput(format!(
                            "line {}: cannot read column {}",
                            line_no + 1,
                            columns[idx]
                        ))
                    })
            };
            frequencies.push(field(freq_idx)?);
            magnitudes.push(field(mag_idx)?);
        }

        Self::new(Array1::from(frequencies), Array1::from(magnitudes))
    }

    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    pub fn frequencies(&self) -> &Array1<f64> {
        &self.frequencies
    }

    pub fn magnitudes(&self) -> &Array1<f64> {
        &self.magnitudes
    }

    /// `log10` of every magnitude, precomputed for the error metric.
    pub fn log_magnitudes(&self) -> &Array1<f64> {
        &self.log_magnitudes
    }
}

#[derive(Debug, Clone, Copy)]
enum Separator {
    Comma,
    Tab,
    Whitespace,
}

impl Separator {
    fn detect(header: &str) -> Self {
        if header.contains(',') {
            Separator::Comma
        } else if header.contains('\t') {
            Separator::Tab
        } else {
            Separator::Whitespace
        }
    }

    fn split<'a>(self, line: &'a str) -> Box<dyn Iterator<Item = &'a str> + 'a> {
        match self {
            Separator::Comma => Box::new(line.split(',')),
            Separator::Tab => Box::new(line.split('\t')),
            Separator::Whitespace => Box::new(line.split_whitespace()),
        }
    }
}

/// Linear interpolation on an ascending axis with linear extrapolation beyond
/// both ends.
///
/// # Arguments
///
/// * `xs` - Strictly increasing sample positions
/// * `ys` - Sample values, same length as `xs`
/// * `x` - Query position
///
/// Returns NaN when there are no samples or the two slices differ in length.
pub fn interpolate(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    if xs.len() != ys.len() {
        return f64::NAN;
    }
    match xs.len() {
        0 => f64::NAN,
        1 => ys[0],
        n => {
            // Segment [i-1, i] containing x, clamped to the first/last segment
            let i = xs.partition_point(|&v| v < x).clamp(1, n - 1);
            let (x0, x1) = (xs[i - 1], xs[i]);
            let (y0, y1) = (ys[i - 1], ys[i]);
            y0 + (y1 - y0) * (x - x0) / (x1 - x0)
        }
    }
}

/// Resample a curve's magnitude onto a target frequency axis.
///
/// Samples are sorted by frequency first; repeated frequencies keep their first
/// sample. Returns `None` for an empty curve or one with non-finite samples.
pub fn resample_magnitude(curve: &SimulatedCurve, axis: &Array1<f64>) -> Option<Array1<f64>> {
    if curve.is_empty() {
        return None;
    }

    let magnitudes = curve.magnitudes();
    let mut points: Vec<(f64, f64)> = curve
        .frequencies()
        .iter()
        .copied()
        .zip(magnitudes.iter().copied())
        .collect();
    if points.iter().any(|(f, m)| !f.is_finite() || !m.is_finite()) {
        return None;
    }
    points.sort_by(|a, b| a.0.total_cmp(&b.0));
    points.dedup_by(|next, prev| next.0 == prev.0);

    let xs: Vec<f64> = points.iter().map(|p| p.0).collect();
    let ys: Vec<f64> = points.iter().map(|p| p.1).collect();
    Some(axis.mapv(|f| interpolate(&xs, &ys, f)))
}
