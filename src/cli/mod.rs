//! Command-line interface
//!
//! This module contains the CLI commands and argument parsing
//! for the ledger binary.

pub mod commands;

pub use commands::{normalize_args, report_usage, Command, Opt};
