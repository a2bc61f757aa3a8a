//! Command-line interface for esgf-dl.
//!
//! Provides commands to run the orchestrator and to manage the persistent
//! queues between runs.

mod commands;

pub use commands::{Cli, Commands, parse_cli, run_with_cli};
