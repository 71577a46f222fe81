//! Stage descriptors and the context a stage handler runs in

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use super::retry::RetryPolicy;
use crate::config::WorkflowConfig;
use crate::domain::{ArtefactFormat, ArtefactRole};
use crate::error::{AgentError, Result};
use crate::llm::{GenerateRequest, GenerateResponse, LlmClient, LlmError};
use crate::prompt::PromptRenderer;
use crate::storage::ArtefactStore;

/// Produces a stage's output payload from prior artefacts and the model.
///
/// Handlers never write to the store; the engine persists what they return.
#[async_trait]
pub trait StageHandler: Send + Sync {
    async fn execute(&self, ctx: &StageContext<'_>) -> Result<Vec<u8>>;
}

/// One entry of the ordered stage list
#[derive(Clone)]
pub struct StageDescriptor {
    pub name: &'static str,
    /// Artefacts that must exist before the handler runs
    pub inputs: Vec<ArtefactRole>,
    pub output: ArtefactRole,
    pub format: ArtefactFormat,
    pub handler: Arc<dyn StageHandler>,
}

impl StageDescriptor {
    pub fn new(
        name: &'static str,
        inputs: Vec<ArtefactRole>,
        output: ArtefactRole,
        handler: Arc<dyn StageHandler>,
    ) -> Self {
        Self {
            name,
            inputs,
            output,
            format: output.format(),
            handler,
        }
    }
}

impl std::fmt::Debug for StageDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageDescriptor")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("output", &self.output)
            .field("format", &self.format)
            .finish()
    }
}

/// What a handler sees while it runs: read access to the run's artefacts,
/// the model client (behind the retry policy) and the prompt templates.
pub struct StageContext<'a> {
    pub stage: &'a str,
    pub run_id: &'a str,
    pub target_language: &'a str,
    pub settings: &'a WorkflowConfig,
    pub prompts: &'a PromptRenderer,
    store: &'a dyn ArtefactStore,
    llm: &'a dyn LlmClient,
    retry: &'a RetryPolicy,
    attempts: AtomicU32,
}

impl<'a> StageContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stage: &'a str,
        run_id: &'a str,
        target_language: &'a str,
        settings: &'a WorkflowConfig,
        prompts: &'a PromptRenderer,
        store: &'a dyn ArtefactStore,
        llm: &'a dyn LlmClient,
        retry: &'a RetryPolicy,
    ) -> Self {
        Self {
            stage,
            run_id,
            target_language,
            settings,
            prompts,
            store,
            llm,
            retry,
            attempts: AtomicU32::new(0),
        }
    }

    /// Model-call attempts made so far in this stage
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Raw payload of a prior artefact
    pub fn read(&self, role: ArtefactRole) -> Result<Vec<u8>> {
        self.store.get(self.run_id, role).map_err(|e| match e {
            AgentError::NotFound(detail) => self.input_error(format!("missing {}: {}", role, detail)),
            other => other,
        })
    }

    pub fn read_text(&self, role: ArtefactRole) -> Result<String> {
        String::from_utf8(self.read(role)?).map_err(|_| self.input_error(format!("{} is not valid UTF-8", role)))
    }

    /// Parse a prior YAML artefact; a malformed payload is a stage input error
    pub fn read_yaml<T: DeserializeOwned>(&self, role: ArtefactRole) -> Result<T> {
        let text = self.read_text(role)?;
        serde_yaml::from_str(&text).map_err(|e| self.input_error(format!("malformed {}: {}", role, e)))
    }

    /// Render `<stage>.system` / `<stage>.user` for this stage
    pub fn render<T: serde::Serialize>(&self, context: &T) -> Result<(String, String)> {
        self.prompts.render_stage(self.stage, context)
    }

    /// Call the model under the retry policy. Exhaustion or a fatal error
    /// becomes `StageExecution` carrying the attempts spent in this stage.
    pub async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        let outcome = self
            .retry
            .run(self.stage, |_| {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                self.llm.generate(request.clone())
            })
            .await;

        match outcome {
            Ok((response, _)) => {
                tracing::debug!(
                    stage = self.stage,
                    run_id = self.run_id,
                    model = %response.model,
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    "model call succeeded"
                );
                Ok(response)
            }
            Err(exhausted) => Err(AgentError::StageExecution {
                stage: self.stage.to_string(),
                attempts: self.attempts(),
                source: exhausted.error,
            }),
        }
    }

    /// A model reply that failed validation. Not retried.
    pub fn invalid_response(&self, detail: impl Into<String>) -> AgentError {
        AgentError::StageExecution {
            stage: self.stage.to_string(),
            attempts: self.attempts(),
            source: LlmError::InvalidResponse(detail.into()),
        }
    }

    pub fn input_error(&self, detail: impl Into<String>) -> AgentError {
        AgentError::StageInput {
            stage: self.stage.to_string(),
            detail: detail.into(),
        }
    }
}
