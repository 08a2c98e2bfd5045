//! Simulator output parsing.
//!
//! ngspice prints AC results in different layouts depending on how the analysis
//! is requested. Two are recognised, detected from the first matching header line:
//!
//! - [`OutputFormat::Indexed`]: a header containing both `Index` and `frequency`,
//!   followed by rows of `index frequency real imag` separated by whitespace and/or
//!   commas.
//! - [`OutputFormat::Values`]: a header line reading `Values` (optionally `Values:`),
//!   followed by rows of `frequency real,imag`.
//!
//! Data ends at the first blank line or at a line mentioning "analysis time".
//! Malformed rows are skipped with a warning; they never abort parsing.

use std::fmt;

use tracing::warn;

use crate::curve::SimulatedCurve;

/// Layout of a simulator result block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// `Index frequency ...` table
    Indexed,

    /// `Values` block
    Values,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Indexed => write!(f, "indexed table"),
            OutputFormat::Values => write!(f, "values block"),
        }
    }
}

/// A parsed result block together with parsing diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOutput {
    /// Recovered samples in output order
    pub curve: SimulatedCurve,

    /// Number of data rows that could not be read
    pub skipped_rows: usize,

    /// Detected layout
    pub format: OutputFormat,
}

/// Parse raw simulator output into a curve.
///
/// Returns `None` when no header is present or no valid row follows it.
///
/// # Examples
///
/// ```
/// use spicefit_rs::output::parse;
///
/// let raw = "Values:\n1e6\t50.0,-3.2\n2e6\t50.0,-1.6\n\nTotal analysis time: 0.01\n";
/// let curve = parse(raw).unwrap();
/// assert_eq!(curve.len(), 2);
/// assert_eq!(curve.frequencies()[1], 2e6);
/// ```
pub fn parse(raw: &str) -> Option<SimulatedCurve> {
    parse_detailed(raw).map(|parsed| parsed.curve)
}

/// Parse raw simulator output, also reporting the detected format and skip count.
pub fn parse_detailed(raw: &str) -> Option<ParsedOutput> {
    let mut lines = raw.lines().enumerate();

    let format = lines.by_ref().find_map(|(_, line)| detect_header(line))?;

    let mut points = Vec::new();
    let mut skipped_rows = 0;

    for (line_no, line) in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() || is_trailer(trimmed) {
            break;
        }
        if is_decoration(trimmed, format) {
            continue;
        }

        let row = match format {
            OutputFormat::Indexed => parse_indexed_row(trimmed),
            OutputFormat::Values => parse_values_row(trimmed),
        };
        match row {
            Some(point) => points.push(point),
            None => {
                skipped_rows += 1;
                warn!(line = line_no + 1, %format, row = trimmed, "skipping malformed output row");
            }
        }
    }

    if points.is_empty() {
        return None;
    }

    Some(ParsedOutput {
        curve: SimulatedCurve::from_points(&points),
        skipped_rows,
        format,
    })
}

fn detect_header(line: &str) -> Option<OutputFormat> {
    if line.contains("Index") && line.contains("frequency") {
        return Some(OutputFormat::Indexed);
    }
    let trimmed = line.trim();
    let word = trimmed.strip_suffix(':').unwrap_or(trimmed).trim_end();
    (word == "Values").then_some(OutputFormat::Values)
}

fn is_trailer(line: &str) -> bool {
    line.to_ascii_lowercase().contains("analysis time")
}

/// Separator rules and repeated page headers, which carry no data.
fn is_decoration(line: &str, format: OutputFormat) -> bool {
    line.chars().all(|c| c == '-')
        || (format == OutputFormat::Indexed && detect_header(line) == Some(OutputFormat::Indexed))
}

fn parse_number(token: &str) -> Option<f64> {
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_indexed_row(line: &str) -> Option<(f64, f64, f64)> {
    let tokens: Vec<&str> = line
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.len() < 4 {
        return None;
    }
    // index column must be numeric too, it is otherwise ignored
    parse_number(tokens[0])?;
    Some((
        parse_number(tokens[1])?,
        parse_number(tokens[2])?,
        parse_number(tokens[3])?,
    ))
}

fn parse_values_row(line: &str) -> Option<(f64, f64, f64)> {
    let mut fields = line.split_whitespace();
    let frequency = parse_number(fields.next()?)?;
    let complex: String = fields.collect();
    let (re, im) = complex.split_once(',')?;
    Some((frequency, parse_number(re.trim())?, parse_number(im.trim())?))
}
