//! contract-agent - contract and invoice compliance workflow
//!
//! Takes an extracted contract and invoice, reconciles their line items, and
//! produces a risk brief plus a translation of it. Every intermediate output
//! is persisted as an immutable artefact of the run.

pub mod config;
pub mod domain;
pub mod error;
pub mod extraction;
pub mod id;
pub mod llm;
pub mod manager;
pub mod prompt;
pub mod storage;
pub mod workflow;

pub use error::{AgentError, Result};
pub use manager::{RunManager, RunOptions};
