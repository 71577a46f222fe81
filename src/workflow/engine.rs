//! Workflow engine - runs the ordered stage list over one run.
//!
//! Per stage: check the cancellation flag, check every input artefact exists,
//! run the handler, persist its output, record the `StageResult`, save the run.
//! The first failure stops the run; everything persisted so far stays.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::{Config, WorkflowConfig};
use crate::domain::{FailureReason, Run, StageResult};
use crate::error::{AgentError, Result};
use crate::id::now_ms;
use crate::llm::LlmClient;
use crate::prompt::PromptRenderer;
use crate::storage::{ArtefactStore, RunStore};

use super::retry::RetryPolicy;
use super::stage::{StageContext, StageDescriptor};
use super::stages::default_stages;

/// Cooperative cancellation flag, checked between stages
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct WorkflowEngine {
    stages: Vec<StageDescriptor>,
    store: Arc<dyn ArtefactStore>,
    runs: Arc<RunStore>,
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptRenderer>,
    retry: RetryPolicy,
    settings: WorkflowConfig,
}

impl WorkflowEngine {
    pub fn new(config: &Config, store: Arc<dyn ArtefactStore>, runs: Arc<RunStore>, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            stages: default_stages(),
            store,
            runs,
            llm,
            prompts: Arc::new(PromptRenderer::new()),
            retry: RetryPolicy::from(&config.retry),
            settings: config.workflow.clone(),
        }
    }

    /// Replace the stage list
    pub fn with_stages(mut self, stages: Vec<StageDescriptor>) -> Self {
        self.stages = stages;
        self
    }

    pub fn with_prompts(mut self, prompts: PromptRenderer) -> Self {
        self.prompts = Arc::new(prompts);
        self
    }

    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    pub fn settings(&self) -> &WorkflowConfig {
        &self.settings
    }

    /// Execute every stage in order. The run must be `pending`.
    ///
    /// On return the run is `completed`, or `failed` and the error that
    /// stopped it is returned. The run is saved after every transition.
    pub async fn execute(&self, run: &mut Run, cancel: &CancelToken) -> Result<()> {
        run.start()?;
        self.runs.save(run)?;
        tracing::info!(run_id = %run.id, stages = self.stages.len(), "run started");

        for stage in &self.stages {
            if cancel.is_cancelled() {
                let err = AgentError::Cancelled(format!("cancelled before stage {}", stage.name));
                self.fail(run, Some(stage.name), &err)?;
                return Err(err);
            }

            let started_at = now_ms();
            match self.run_stage(stage, run).await {
                Ok(result) => {
                    tracing::info!(
                        run_id = %run.id,
                        stage = stage.name,
                        attempts = result.attempts,
                        "stage ok"
                    );
                    run.record_stage(result)?;
                    self.runs.save(run)?;
                }
                Err((err, attempts)) => {
                    tracing::error!(
                        run_id = %run.id,
                        stage = stage.name,
                        attempts,
                        error = %err,
                        "stage failed"
                    );
                    run.record_stage(StageResult::failed(
                        stage.name,
                        stage.inputs.clone(),
                        attempts,
                        &err,
                        started_at,
                    ))?;
                    self.fail(run, Some(stage.name), &err)?;
                    return Err(err);
                }
            }
        }

        run.complete()?;
        self.runs.save(run)?;
        tracing::info!(run_id = %run.id, "run completed");
        Ok(())
    }

    async fn run_stage(&self, stage: &StageDescriptor, run: &Run) -> std::result::Result<StageResult, (AgentError, u32)> {
        let started_at = now_ms();

        for input in &stage.inputs {
            match self.store.contains(&run.id, *input) {
                Ok(true) => {}
                Ok(false) => {
                    let err = AgentError::StageInput {
                        stage: stage.name.to_string(),
                        detail: format!("required artefact {} is missing", input),
                    };
                    return Err((err, 0));
                }
                Err(e) => return Err((e, 0)),
            }
        }

        let ctx = StageContext::new(
            stage.name,
            &run.id,
            &run.target_language,
            &self.settings,
            &self.prompts,
            self.store.as_ref(),
            self.llm.as_ref(),
            &self.retry,
        );

        let payload = match stage.handler.execute(&ctx).await {
            Ok(payload) => payload,
            Err(err) => {
                let attempts = match &err {
                    AgentError::StageExecution { attempts, .. } => *attempts,
                    _ => ctx.attempts(),
                };
                return Err((err, attempts));
            }
        };

        let output = self
            .store
            .put(&run.id, stage.output, &payload)
            .map_err(|e| (e, ctx.attempts()))?;

        Ok(StageResult::ok(
            stage.name,
            stage.inputs.clone(),
            output,
            ctx.attempts(),
            started_at,
        ))
    }

    fn fail(&self, run: &mut Run, stage: Option<&str>, err: &AgentError) -> Result<()> {
        run.fail(FailureReason::from(err), stage, err.to_string())?;
        self.runs.save(run)?;
        tracing::warn!(run_id = %run.id, reason = ?FailureReason::from(err), "run failed");
        Ok(())
    }
}
