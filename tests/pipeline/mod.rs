//! Tests for the per-evaluation pipeline: templates, output parsing, objective.

mod objective_tests;
mod output_parsing;
mod template_tests;
