//! Error types for contract-agent
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

use crate::llm::LlmError;

/// All error types that can occur in the library
#[derive(Debug, Error)]
pub enum AgentError {
    /// Source document missing or unparseable; surfaced before any stage runs
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// A stage's required prior artefact is absent or malformed
    #[error("Stage input error in {stage}: {detail}")]
    StageInput { stage: String, detail: String },

    /// Model call failed for a stage after the retry budget was spent
    #[error("Stage {stage} failed after {attempts} attempt(s): {source}")]
    StageExecution {
        stage: String,
        attempts: u32,
        #[source]
        source: LlmError,
    },

    /// Model client error outside of a stage boundary
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Artefact could not be written (I/O failure or an existing artefact)
    #[error("Storage write error: {0}")]
    StorageWrite(String),

    /// Artefact could not be read back intact
    #[error("Storage read error: {0}")]
    StorageRead(String),

    /// Run or artefact not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Run was cancelled between stages
    #[error("Run cancelled: {0}")]
    Cancelled(String),

    /// Invalid state transition or operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl AgentError {
    /// True when a failure is worth retrying inside a stage boundary
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::Llm(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Result type alias for library operations
pub type Result<T> = std::result::Result<T, AgentError>;
