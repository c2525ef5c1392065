//! Command-line interface for datapred-worker.
//!
//! Provides commands to run the queue listener, validate or execute a single
//! request, and inspect the request queue and configuration.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
