//! # Parameter System
//!
//! Named, bounded circuit parameters (resistances, inductances, capacitances).
//!
//! - [`Bounds`]: a validated, strictly positive `[lower, upper]` range
//! - [`ParameterSpace`]: the ordered set of parameters fitted in one run, which
//!   maps optimiser vectors to names and converts between linear and log10 units
//!
//! ```rust
//! use spicefit_rs::parameters::{ParameterSpace, ParameterSpec};
//!
//! let space = ParameterSpace::new(&[
//!     ParameterSpec::new("R1", 0.5, 5000.0),
//!     ParameterSpec::new("C1", 4.7e-14, 4.7e-10),
//! ])
//! .unwrap();
//!
//! assert_eq!(space.names(), &["R1".to_string(), "C1".to_string()]);
//! assert_eq!(space.linear_bounds()[0], (0.5, 5000.0));
//! ```

pub mod bounds;
pub mod space;

pub use bounds::{Bounds, BoundsError};
pub use space::{ParameterSpace, ParameterSpec};
