//! Run Manager module
//!
//! The caller-facing API: start, run, inspect and cancel runs.

mod run_manager;

pub use run_manager::{RunManager, RunOptions};
