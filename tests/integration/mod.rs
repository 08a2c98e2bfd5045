//! Integration tests that exercise persistence and complete fitting runs.

mod end_to_end;
mod history_tests;
