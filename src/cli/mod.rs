//! Command-line interface for content-forge.
//!
//! Provides commands for running assessment and question-generation task
//! files through the pipeline, and for inspecting rubrics.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
