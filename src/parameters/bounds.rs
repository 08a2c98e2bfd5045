//! Parameter bounds implementation
//!
//! Bounds describe the physically admissible range of one lumped component.
//! Both limits are linear-space magnitudes, so they must be finite and strictly
//! positive; the log10 image of a bound is what the local optimiser works with.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when working with parameter bounds
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BoundsError {
    #[error("Invalid bounds: lower ({lower}) must be less than upper ({upper})")]
    InvalidBounds { lower: f64, upper: f64 },

    #[error("Bounds must be strictly positive, got [{lower}, {upper}]")]
    NonPositive { lower: f64, upper: f64 },

    #[error("Bounds must be finite, got [{lower}, {upper}]")]
    NonFinite { lower: f64, upper: f64 },
}

/// Inclusive `[lower, upper]` range for one parameter, in linear units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Smallest admissible value
    pub lower: f64,

    /// Largest admissible value
    pub upper: f64,
}

impl Bounds {
    /// Create a new bounds constraint.
    ///
    /// # Arguments
    ///
    /// * `lower` - Minimum allowed value for the parameter
    /// * `upper` - Maximum allowed value for the parameter
    ///
    /// # Returns
    ///
    /// A new `Bounds` object if `0 < lower < upper < ∞`, or an error otherwise
    ///
    /// # Examples
    ///
    /// ```
    /// use spicefit_rs::parameters::Bounds;
    ///
    /// let bounds = Bounds::new(1e-12, 1e-9).unwrap();
    /// assert!(bounds.contains(4.7e-12));
    /// assert!(Bounds::new(10.0, 1.0).is_err());
    /// ```
    pub fn new(lower: f64, upper: f64) -> Result<Self, BoundsError> {
        if !lower.is_finite() || !upper.is_finite() {
            return Err(BoundsError::NonFinite { lower, upper });
        }
        if lower <= 0.0 || upper <= 0.0 {
            return Err(BoundsError::NonPositive { lower, upper });
        }
        if lower >= upper {
            return Err(BoundsError::InvalidBounds { lower, upper });
        }

        Ok(Self { lower, upper })
    }

    /// Bounds spanning `decades` decades on either side of `center`.
    pub fn around(center: f64, decades: f64) -> Result<Self, BoundsError> {
        let factor = 10f64.powf(decades);
        Self::new(center / factor, center * factor)
    }

    /// Re-check the invariants, e.g. after deserialisation.
    pub fn validate(&self) -> Result<(), BoundsError> {
        Self::new(self.lower, self.upper).map(|_| ())
    }

    /// Check whether a value lies within the bounds (inclusive).
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }

    /// Clamp a value into the bounds.
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.lower, self.upper)
    }

    /// Width of the linear interval.
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    /// The same interval expressed in log10 units.
    pub fn to_log10(&self) -> (f64, f64) {
        (self.lower.log10(), self.upper.log10())
    }

    /// The interval as a `(lower, upper)` tuple.
    pub fn as_tuple(&self) -> (f64, f64) {
        (self.lower, self.upper)
    }
}
