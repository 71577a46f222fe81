//! Enterprise gateway backend
//!
//! Authenticates with OAuth2 client credentials and calls a deployment's
//! chat-completions endpoint. The access token is cached until shortly before
//! it expires; nothing else is kept between calls.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::config::{AiCoreConfig, LlmConfig};
use crate::error::{AgentError, Result};
use crate::llm::chat::{ChatDefaults, build_chat_body, parse_chat_response, send_chat};
use crate::llm::client::{LlmClient, LlmError};
use crate::llm::types::{GenerateRequest, GenerateResponse};

/// Refresh this long before the token's stated expiry
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Used when the token endpoint omits `expires_in`
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 600;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + TOKEN_EXPIRY_MARGIN < self.expires_at
    }
}

/// Gateway client
pub struct AiCoreClient {
    client: Client,
    config: AiCoreConfig,
    defaults: ChatDefaults,
    token: Mutex<Option<CachedToken>>,
}

impl AiCoreClient {
    pub fn new(llm: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(llm.timeout())
            .build()
            .map_err(|e| AgentError::InvalidState(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config: llm.aicore.clone(),
            defaults: ChatDefaults {
                temperature: llm.temperature,
                max_tokens: llm.max_tokens,
                timeout: llm.timeout(),
            },
            token: Mutex::new(None),
        })
    }

    fn token_url(&self) -> String {
        format!("{}/oauth/token", self.config.auth_url.trim_end_matches('/'))
    }

    fn chat_url(&self) -> String {
        format!(
            "{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.completions_path().trim_start_matches('/')
        )
    }

    async fn access_token(&self, timeout: Duration) -> std::result::Result<String, LlmError> {
        // Held across the refresh: concurrent callers wait for one token request
        // rather than each fetching their own.
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.clone());
        }

        let mut form = vec![("grant_type", "client_credentials".to_string())];
        if let Some(scope) = &self.config.scope {
            form.push(("scope", scope.clone()));
        }

        let request = self
            .client
            .post(self.token_url())
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&form)
            .timeout(timeout)
            .send();

        let response = match tokio::time::timeout(timeout, request).await {
            Ok(result) => result?,
            Err(_) => return Err(LlmError::TransientNetwork("token request timed out".to_string())),
        };

        let status = response.status();
        if status.is_server_error() {
            return Err(LlmError::TransientNetwork(format!("token endpoint returned {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Auth(format!("Token request failed: {} {}", status, body)));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Auth(format!("Unreadable token response: {}", e)))?;
        let value = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| LlmError::Auth("No access token in gateway response".to_string()))?;
        let lifetime = Duration::from_secs(body.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS));

        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + lifetime,
        });
        log::debug!("gateway token refreshed, valid for {}s", lifetime.as_secs());
        Ok(value)
    }

    async fn forget_token(&self) {
        *self.token.lock().await = None;
    }
}

#[async_trait]
impl LlmClient for AiCoreClient {
    async fn generate(&self, request: GenerateRequest) -> std::result::Result<GenerateResponse, LlmError> {
        if !self.is_ready() {
            return Err(LlmError::Auth(
                "missing gateway credentials (set SAP_AICORE_CLIENT_ID and SAP_AICORE_CLIENT_SECRET)".to_string(),
            ));
        }

        // One deadline covers the token fetch and the chat call
        let timeout = request.timeout.unwrap_or(self.defaults.timeout);
        let deadline = Instant::now() + timeout;
        // Bounds waiting for the token lock as well as the refresh itself
        let token = match tokio::time::timeout(timeout, self.access_token(timeout)).await {
            Ok(token) => token?,
            Err(_) => {
                return Err(LlmError::TransientNetwork(
                    "timed out waiting for gateway token".to_string(),
                ));
            }
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(LlmError::TransientNetwork(format!(
                "request timed out after {}s",
                timeout.as_secs_f32()
            )));
        }

        let mut body = build_chat_body(&request, None, "max_tokens", &self.defaults);
        body["deployment_id"] = serde_json::json!(self.config.deployment_id);

        log::debug!(
            "gateway request label={} deployment={}",
            request.label,
            self.config.deployment_id
        );
        let builder = self
            .client
            .post(self.chat_url())
            .bearer_auth(token)
            .header("AI-Resource-Group", &self.config.resource_group)
            .timeout(remaining)
            .json(&body);

        match send_chat(builder, remaining).await {
            Ok(response) => parse_chat_response(&response, &request, &self.config.deployment_id),
            Err(err @ LlmError::Auth(_)) => {
                self.forget_token().await;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    fn model(&self) -> &str {
        &self.config.deployment_id
    }

    fn is_ready(&self) -> bool {
        !self.config.client_id.is_empty() && !self.config.client_secret.is_empty()
    }
}

impl std::fmt::Debug for AiCoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiCoreClient")
            .field("api_base", &self.config.api_base)
            .field("deployment_id", &self.config.deployment_id)
            .field("resource_group", &self.config.resource_group)
            .finish()
    }
}
