//! Netlist templates with named placeholders.
//!
//! Templates use shell-style placeholders: `${name}` or `$name`, where `name`
//! is an identifier (`[A-Za-z_][A-Za-z0-9_]*`). A literal dollar sign is written
//! as `$$`. Any other use of `$` is a syntax error reported when the template is
//! parsed, never at render time.
//!
//! Rendering is all-or-nothing: if a single placeholder has no value, no text is
//! produced.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till1, take_while, take_while1},
    character::complete::char,
    combinator::{map, recognize},
    sequence::{delimited, pair, preceded},
    IResult, Parser,
};
use thiserror::Error;

/// Errors raised while loading or rendering a netlist template.
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("template not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read template {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("template references parameter '{name}' which was not supplied")]
    MissingParameter { name: String },

    #[error("invalid placeholder at line {line}, column {column}")]
    Syntax { line: usize, column: usize },
}

/// A piece of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Text copied verbatim
    Literal(String),

    /// Substitution point bound to a parameter name
    Placeholder(String),
}

/// A parsed netlist template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetlistTemplate {
    source: Option<PathBuf>,
    segments: Vec<Segment>,
    placeholders: Vec<String>,
}

impl NetlistTemplate {
    /// Parse template text.
    pub fn parse(text: &str) -> Result<Self, TemplateError> {
        let mut segments: Vec<Segment> = Vec::new();
        let mut rest = text;

        while !rest.is_empty() {
            let (remaining, segment) = match segment(rest) {
                Ok(parsed) => parsed,
                Err(_) => {
                    let offset = text.len() - rest.len();
                    let (line, column) = line_column(text, offset);
                    return Err(TemplateError::Syntax { line, column });
                }
            };

            // Merge adjacent literals so extraction sees one delimiter per gap
            match (segments.last_mut(), segment) {
                (Some(Segment::Literal(prev)), Segment::Literal(next)) => prev.push_str(&next),
                (_, segment) => segments.push(segment),
            }
            rest = remaining;
        }

        let mut seen = HashSet::new();
        let placeholders = segments
            .iter()
            .filter_map(|s| match s {
                Segment::Placeholder(name) if seen.insert(name.clone()) => Some(name.clone()),
                _ => None,
            })
            .collect();

        Ok(Self {
            source: None,
            segments,
            placeholders,
        })
    }

    /// Load and parse a template file.
    ///
    /// # Errors
    ///
    /// * `TemplateError::NotFound` if the file does not exist
    /// * `TemplateError::Io` if it exists but cannot be read
    /// * `TemplateError::Syntax` if it contains a malformed placeholder
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                TemplateError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                TemplateError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let mut template = Self::parse(&text)?;
        template.source = Some(path.to_path_buf());
        Ok(template)
    }

    /// File the template was loaded from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Parsed segments in document order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Distinct placeholder names in order of first appearance.
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    /// Substitute every placeholder with its value.
    ///
    /// Fails with `MissingParameter` naming the first placeholder (in document
    /// order) that has no entry in `values`. Extra entries are ignored.
    pub fn render<V: AsRef<str>>(&self, values: &HashMap<String, V>) -> Result<String, TemplateError> {
        if let Some(missing) = self.placeholders.iter().find(|p| !values.contains_key(*p)) {
            return Err(TemplateError::MissingParameter {
                name: missing.clone(),
            });
        }

        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    // presence checked above
                    if let Some(value) = values.get(name) {
                        out.push_str(value.as_ref());
                    }
                }
            }
        }
        Ok(out)
    }

    /// Render numeric parameter values using scientific notation.
    ///
    /// # Arguments
    ///
    /// * `params` - Name/value pairs in linear units
    /// * `precision` - Digits after the decimal point of the mantissa
    pub fn render_values(
        &self,
        params: &[(String, f64)],
        precision: usize,
    ) -> Result<String, TemplateError> {
        let values: HashMap<String, String> = params
            .iter()
            .map(|(name, v)| (name.clone(), format_value(*v, precision)))
            .collect();
        self.render(&values)
    }

    /// Recover the substituted strings from a rendered netlist.
    ///
    /// Returns `None` if the text does not match the template's literal parts, if two
    /// placeholders are adjacent (the split would be ambiguous), or if a repeated
    /// placeholder was substituted with different text.
    pub fn extract(&self, rendered: &str) -> Option<HashMap<String, String>> {
        let mut values: HashMap<String, String> = HashMap::new();
        let mut rest = rendered;
        let mut segments = self.segments.iter().peekable();

        while let Some(segment) = segments.next() {
            match segment {
                Segment::Literal(text) => {
                    rest = rest.strip_prefix(text.as_str())?;
                }
                Segment::Placeholder(name) => {
                    let value = match segments.peek() {
                        None => {
                            let v = rest;
                            rest = "";
                            v
                        }
                        Some(Segment::Literal(next)) => {
                            let end = rest.find(next.as_str())?;
                            let v = &rest[..end];
                            rest = &rest[end..];
                            v
                        }
                        Some(Segment::Placeholder(_)) => return None,
                    };

                    match values.get(name) {
                        Some(existing) if existing != value => return None,
                        _ => {
                            values.insert(name.clone(), value.to_string());
                        }
                    }
                }
            }
        }

        if rest.is_empty() {
            Some(values)
        } else {
            None
        }
    }
}

impl FromStr for NetlistTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for NetlistTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => write!(f, "{}", text.replace('$', "$$"))?,
                Segment::Placeholder(name) => write!(f, "${{{}}}", name)?,
            }
        }
        Ok(())
    }
}

/// Render a template string in one call.
pub fn render<V: AsRef<str>>(
    template_text: &str,
    values: &HashMap<String, V>,
) -> Result<String, TemplateError> {
    NetlistTemplate::parse(template_text)?.render(values)
}

/// Format a parameter value the way it is written into a netlist.
pub fn format_value(value: f64, precision: usize) -> String {
    format!("{:.*e}", precision, value)
}

// Parser functions using nom

/// Parse an identifier (placeholder name)
fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))
    .parse(input)
}

/// Parse a run of text without any `$`
fn literal(input: &str) -> IResult<&str, Segment> {
    map(take_till1(|c: char| c == '$'), |text: &str| {
        Segment::Literal(text.to_string())
    })
    .parse(input)
}

/// Parse the `$$` escape
fn escaped_dollar(input: &str) -> IResult<&str, Segment> {
    map(tag("$$"), |_| Segment::Literal("$".to_string())).parse(input)
}

/// Parse `${name}`
fn braced_placeholder(input: &str) -> IResult<&str, Segment> {
    map(delimited(tag("${"), identifier, char('}')), |name: &str| {
        Segment::Placeholder(name.to_string())
    })
    .parse(input)
}

/// Parse `$name`
fn bare_placeholder(input: &str) -> IResult<&str, Segment> {
    map(preceded(char('$'), identifier), |name: &str| {
        Segment::Placeholder(name.to_string())
    })
    .parse(input)
}

fn segment(input: &str) -> IResult<&str, Segment> {
    alt((literal, escaped_dollar, braced_placeholder, bare_placeholder)).parse(input)
}

/// 1-based line and column of a byte offset.
fn line_column(text: &str, offset: usize) -> (usize, usize) {
    let before = &text[..offset];
    let line = before.matches('\n').count() + 1;
    let column = before
        .rfind('\n')
        .map_or(before.chars().count(), |nl| before[nl + 1..].chars().count())
        + 1;
    (line, column)
}
