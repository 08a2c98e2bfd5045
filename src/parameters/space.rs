//! Ordered set of fitted parameters.
//!
//! A [`ParameterSpace`] fixes the parameter names and their order for one fitting
//! run. Optimisers work on plain `Array1<f64>` vectors whose positions follow this
//! order; the space converts them to named values for netlist rendering and to and
//! from log10 units for the local refinement stage.

use std::collections::{HashMap, HashSet};

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use super::bounds::Bounds;
use crate::error::{FitError, Result};

/// One fitted parameter: a netlist placeholder name plus its admissible range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Placeholder name used in the netlist template, e.g. `R1`
    pub name: String,

    /// Lower linear bound
    pub lower: f64,

    /// Upper linear bound
    pub upper: f64,
}

impl ParameterSpec {
    /// Create a new parameter specification.
    pub fn new(name: impl Into<String>, lower: f64, upper: f64) -> Self {
        Self {
            name: name.into(),
            lower,
            upper,
        }
    }
}

/// Ordered parameter names with their bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpace {
    names: Vec<String>,
    bounds: Vec<Bounds>,
}

impl ParameterSpace {
    /// Build a space from parameter specifications, validating names and bounds.
    ///
    /// # Errors
    ///
    /// * `FitError::Config` if the list is empty, a name is empty or duplicated
    /// * `FitError::Bounds` if any bound pair is invalid
    pub fn new(specs: &[ParameterSpec]) -> Result<Self> {
        if specs.is_empty() {
            return Err(FitError::Config("no parameters to fit".to_string()));
        }

        let mut seen = HashSet::new();
        let mut names = Vec::with_capacity(specs.len());
        let mut bounds = Vec::with_capacity(specs.len());

        for spec in specs {
            if spec.name.trim().is_empty() {
                return Err(FitError::Config("parameter name must not be empty".to_string()));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(FitError::Config(format!(
                    "duplicate parameter name '{}'",
                    spec.name
                )));
            }
            names.push(spec.name.clone());
            bounds.push(Bounds::new(spec.lower, spec.upper)?);
        }

        Ok(Self { names, bounds })
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the space is empty (never true for a validated space).
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Parameter names in optimisation order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Linear bounds in optimisation order.
    pub fn bounds(&self) -> &[Bounds] {
        &self.bounds
    }

    /// Position of a parameter by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Linear bounds as `(lower, upper)` tuples, the form the global optimiser takes.
    pub fn linear_bounds(&self) -> Vec<(f64, f64)> {
        self.bounds.iter().map(Bounds::as_tuple).collect()
    }

    /// Bounds in log10 units, the form the local optimiser takes.
    pub fn log10_bounds(&self) -> Vec<(f64, f64)> {
        self.bounds.iter().map(Bounds::to_log10).collect()
    }

    /// Geometric centre of every bound pair.
    pub fn geometric_center(&self) -> Array1<f64> {
        self.bounds
            .iter()
            .map(|b| (b.lower * b.upper).sqrt())
            .collect()
    }

    /// Convert a linear vector to log10 units.
    pub fn to_log10(&self, linear: &Array1<f64>) -> Array1<f64> {
        linear.mapv(f64::log10)
    }

    /// Convert a log10 vector back to linear units.
    pub fn from_log10(&self, log: &Array1<f64>) -> Array1<f64> {
        log.mapv(|v| 10f64.powf(v))
    }

    /// Clamp a linear vector into the bounds.
    pub fn clip(&self, linear: &Array1<f64>) -> Array1<f64> {
        linear
            .iter()
            .zip(self.bounds.iter())
            .map(|(&v, b)| b.clamp(v))
            .collect()
    }

    /// Check that a linear vector has the right length and lies inside the bounds.
    pub fn check(&self, linear: &Array1<f64>) -> Result<()> {
        if linear.len() != self.len() {
            return Err(FitError::DimensionMismatch(format!(
                "Expected {} parameters, got {}",
                self.len(),
                linear.len()
            )));
        }
        for ((name, b), &v) in self.names.iter().zip(&self.bounds).zip(linear.iter()) {
            if !b.contains(v) {
                return Err(FitError::InvalidInput(format!(
                    "parameter '{}' = {} outside [{}, {}]",
                    name, v, b.lower, b.upper
                )));
            }
        }
        Ok(())
    }

    /// Pair every value of a linear vector with its parameter name.
    pub fn named(&self, linear: &Array1<f64>) -> Vec<(String, f64)> {
        self.names
            .iter()
            .cloned()
            .zip(linear.iter().copied())
            .collect()
    }

    /// Name → value lookup table for a linear vector.
    pub fn to_map(&self, linear: &Array1<f64>) -> HashMap<String, f64> {
        self.named(linear).into_iter().collect()
    }
}
