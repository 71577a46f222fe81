//! Run record and stage results
//!
//! A Run is one end-to-end execution of the workflow over one contract/invoice
//! pair. It moves `pending -> running -> completed`, or to `failed` on the first
//! unrecoverable stage failure. Both end states are terminal.

use serde::{Deserialize, Serialize};

use crate::domain::artefact::{ArtefactRef, ArtefactRole};
use crate::error::{AgentError, Result};
use crate::id::{generate_run_id, now_ms};

/// Status of a run's execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Created, inputs being prepared
    Pending,
    /// Stages executing
    Running,
    /// Every stage reported ok
    Completed,
    /// Stopped at a stage failure, extraction failure or cancellation
    Failed,
}

impl RunStatus {
    /// Returns true if the run is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Ok,
    Failed,
}

/// Why a run ended in `failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Extraction,
    StageInput,
    StageExecution,
    Storage,
    Cancelled,
    Internal,
}

impl From<&AgentError> for FailureReason {
    fn from(err: &AgentError) -> Self {
        match err {
            AgentError::Extraction(_) => FailureReason::Extraction,
            AgentError::StageInput { .. } => FailureReason::StageInput,
            AgentError::StageExecution { .. } | AgentError::Llm(_) => FailureReason::StageExecution,
            AgentError::StorageWrite(_) | AgentError::StorageRead(_) | AgentError::NotFound(_) | AgentError::Io(_) => {
                FailureReason::Storage
            }
            AgentError::Cancelled(_) => FailureReason::Cancelled,
            AgentError::InvalidState(_) | AgentError::Json(_) | AgentError::Yaml(_) => FailureReason::Internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub reason: FailureReason,
    /// Stage that was about to run or running when the run stopped
    pub stage: Option<String>,
    pub detail: String,
}

/// Outcome of one stage within a run; written once, never mutated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: String,
    pub inputs: Vec<ArtefactRole>,
    pub output: Option<ArtefactRef>,
    pub status: StageStatus,
    /// Model-call attempts spent, including the successful one
    pub attempts: u32,
    pub error: Option<String>,
    pub started_at: i64,
    pub finished_at: i64,
}

impl StageResult {
    pub fn ok(stage: &str, inputs: Vec<ArtefactRole>, output: ArtefactRef, attempts: u32, started_at: i64) -> Self {
        Self {
            stage: stage.to_string(),
            inputs,
            output: Some(output),
            status: StageStatus::Ok,
            attempts,
            error: None,
            started_at,
            finished_at: now_ms(),
        }
    }

    pub fn failed(stage: &str, inputs: Vec<ArtefactRole>, attempts: u32, error: &AgentError, started_at: i64) -> Self {
        Self {
            stage: stage.to_string(),
            inputs,
            output: None,
            status: StageStatus::Failed,
            attempts,
            error: Some(error.to_string()),
            started_at,
            finished_at: now_ms(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == StageStatus::Ok
    }
}

/// The run record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    pub stages: Vec<StageResult>,
    pub failure: Option<RunFailure>,
    /// Language code the translate stage targets
    pub target_language: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl Run {
    pub fn new(target_language: impl Into<String>) -> Self {
        Self::with_id(generate_run_id(), target_language)
    }

    pub fn with_id(id: impl Into<String>, target_language: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            status: RunStatus::Pending,
            stages: Vec::new(),
            failure: None,
            target_language: target_language.into(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// pending -> running
    pub fn start(&mut self) -> Result<()> {
        if self.status != RunStatus::Pending {
            return Err(AgentError::InvalidState(format!(
                "run {} cannot start from {}",
                self.id, self.status
            )));
        }
        self.status = RunStatus::Running;
        self.touch();
        Ok(())
    }

    /// Append a stage result. A stage may appear at most once per run.
    pub fn record_stage(&mut self, result: StageResult) -> Result<()> {
        if self.status != RunStatus::Running {
            return Err(AgentError::InvalidState(format!(
                "run {} is {}, cannot record stage {}",
                self.id, self.status, result.stage
            )));
        }
        if self.stage(&result.stage).is_some() {
            return Err(AgentError::InvalidState(format!(
                "stage {} already ran in run {}",
                result.stage, self.id
            )));
        }
        self.stages.push(result);
        self.touch();
        Ok(())
    }

    /// running -> completed
    pub fn complete(&mut self) -> Result<()> {
        if self.status != RunStatus::Running {
            return Err(AgentError::InvalidState(format!(
                "run {} cannot complete from {}",
                self.id, self.status
            )));
        }
        self.status = RunStatus::Completed;
        self.completed_at = Some(now_ms());
        self.touch();
        Ok(())
    }

    /// pending|running -> failed
    pub fn fail(&mut self, reason: FailureReason, stage: Option<&str>, detail: impl Into<String>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(AgentError::InvalidState(format!(
                "run {} already {}",
                self.id, self.status
            )));
        }
        self.status = RunStatus::Failed;
        self.failure = Some(RunFailure {
            reason,
            stage: stage.map(str::to_string),
            detail: detail.into(),
        });
        self.completed_at = Some(now_ms());
        self.touch();
        Ok(())
    }

    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == name)
    }

    pub fn is_cancelled(&self) -> bool {
        self.failure
            .as_ref()
            .map(|f| f.reason == FailureReason::Cancelled)
            .unwrap_or(false)
    }

    fn touch(&mut self) {
        self.updated_at = now_ms();
    }
}
