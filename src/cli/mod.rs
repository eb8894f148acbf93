//! Command-line entry point: argument parsing and subcommand dispatch.
pub mod commands;

pub use commands::run;
