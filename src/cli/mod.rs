//! Command-line interface for cohort-forge.
//!
//! Provides commands for serving the job API, running single jobs, listing
//! agents and phases, and replaying stored mind-maps.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
