//! Direct API-key backend
//!
//! Talks to an OpenAI-compatible `/chat/completions` endpoint with a bearer key.

use async_trait::async_trait;
use reqwest::Client;

use crate::config::LlmConfig;
use crate::error::{AgentError, Result};
use crate::llm::chat::{ChatDefaults, build_chat_body, parse_chat_response, send_chat};
use crate::llm::client::{LlmClient, LlmError};
use crate::llm::types::{GenerateRequest, GenerateResponse};

/// Direct API client
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
    defaults: ChatDefaults,
}

impl OpenAiClient {
    /// Create a client from configuration. A missing key is accepted here and
    /// reported as an auth error on the first call.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AgentError::InvalidState(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone().unwrap_or_default(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            defaults: ChatDefaults {
                temperature: config.temperature,
                max_tokens: config.max_tokens,
                timeout: config.timeout(),
            },
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn generate(&self, request: GenerateRequest) -> std::result::Result<GenerateResponse, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::Auth(
                "missing API credential (set LLM_API_KEY or OPENAI_API_KEY)".to_string(),
            ));
        }

        let body = build_chat_body(
            &request,
            Some(("model", self.model.as_str())),
            "max_completion_tokens",
            &self.defaults,
        );
        let timeout = request.timeout.unwrap_or(self.defaults.timeout);

        log::debug!("openai request label={} model={}", request.label, self.model);
        let builder = self
            .client
            .post(self.chat_url())
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(&body);

        let response = send_chat(builder, timeout).await?;
        parse_chat_response(&response, &request, &self.model)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_ready(&self) -> bool {
        !self.api_key.is_empty()
    }
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .finish()
    }
}
