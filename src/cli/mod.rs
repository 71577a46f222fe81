//! CLI module for contract-agent - command-line interface and subcommands.
//!
//! Provides run execution, status and artefact inspection.

pub mod commands;

pub use commands::Cli;
