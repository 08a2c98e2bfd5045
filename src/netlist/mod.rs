//! # Netlist Templating
//!
//! Turns a candidate parameter vector into simulator input. A template is a SPICE
//! netlist in which component values are replaced by `${name}` placeholders; one
//! rendered netlist is written per evaluation.
//!
//! ```rust
//! use std::collections::HashMap;
//! use spicefit_rs::netlist::NetlistTemplate;
//!
//! let template = NetlistTemplate::parse("R1 in out ${R1}\n").unwrap();
//! let mut values = HashMap::new();
//! values.insert("R1".to_string(), "50".to_string());
//! assert_eq!(template.render(&values).unwrap(), "R1 in out 50\n");
//! ```

pub mod template;

pub use template::{format_value, render, NetlistTemplate, Segment, TemplateError};
