//! Core LLM client trait, error taxonomy and a scripted mock

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::types::{GenerateRequest, GenerateResponse, Usage};

/// Stateless generation capability; each call is independent
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run one generation. When the request carries an `OutputShape` the
    /// response's `structured` field holds the parsed JSON object.
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, LlmError>;

    /// Model (or deployment) this client talks to
    fn model(&self) -> &str;

    /// Whether the client has the credentials it needs
    fn is_ready(&self) -> bool;
}

/// Errors that can occur during LLM operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LlmError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, LlmError::RateLimited { .. })
    }

    /// Rate limits and network trouble are retried by the caller; auth and
    /// malformed responses are fatal.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } => true,
            LlmError::TransientNetwork(_) => true,
            LlmError::Auth(_) => false,
            LlmError::InvalidResponse(_) => false,
        }
    }

    /// Server-suggested wait, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        match status {
            401 | 403 => LlmError::Auth(format!("{} {}", status, body)),
            429 => LlmError::RateLimited { retry_after },
            408 => LlmError::TransientNetwork(format!("request timeout: {}", body)),
            s if s >= 500 => LlmError::TransientNetwork(format!("server error {}: {}", s, body)),
            s => LlmError::InvalidResponse(format!("request rejected {}: {}", s, body)),
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            LlmError::TransientNetwork(err.to_string())
        } else if err.is_decode() || err.is_body() {
            LlmError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            LlmError::from_status(status.as_u16(), &err.to_string(), None)
        } else {
            LlmError::TransientNetwork(err.to_string())
        }
    }
}

/// Parse a structured reply into a JSON object. Accepts a bare object or one
/// wrapped in a ```json fence.
pub fn parse_structured(content: &str) -> Result<Value, LlmError> {
    let trimmed = content.trim();
    let body = strip_code_fence(trimmed).unwrap_or(trimmed);
    let value: Value = serde_json::from_str(body)
        .map_err(|e| LlmError::InvalidResponse(format!("structured output is not valid JSON: {}", e)))?;
    if !value.is_object() {
        return Err(LlmError::InvalidResponse(
            "structured output must be a JSON object".to_string(),
        ));
    }
    Ok(value)
}

fn strip_code_fence(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("```")?;
    let rest = rest.strip_suffix("```")?;
    // Drop the info string ("json") on the opening fence line
    let newline = rest.find('\n')?;
    Some(rest[newline + 1..].trim())
}

/// Scripted reply for `MockLlmClient`
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Fail(LlmError),
}

/// Test double that replays scripted replies per request label.
///
/// Replies queued for a label are consumed in order; once a label's queue has
/// a single entry left, that entry is repeated.
#[derive(Debug, Default)]
pub struct MockLlmClient {
    scripts: Mutex<HashMap<String, VecDeque<MockReply>>>,
    calls: Mutex<Vec<GenerateRequest>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a text reply for requests labelled `label`
    pub fn with_reply(self, label: &str, content: impl Into<String>) -> Self {
        self.push(label, MockReply::Text(content.into()));
        self
    }

    /// Queue a failure for requests labelled `label`
    pub fn with_failure(self, label: &str, error: LlmError) -> Self {
        self.push(label, MockReply::Fail(error));
        self
    }

    fn push(&self, label: &str, reply: MockReply) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.entry(label.to_string()).or_default().push_back(reply);
        }
    }

    /// Number of calls seen for a label
    pub fn call_count(&self, label: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.iter().filter(|c| c.label == label).count())
            .unwrap_or(0)
    }

    /// Total number of calls seen
    pub fn total_calls(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }

    /// Requests seen so far, in call order
    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    fn next_reply(&self, label: &str) -> MockReply {
        let mut scripts = match self.scripts.lock() {
            Ok(scripts) => scripts,
            Err(_) => return MockReply::Fail(LlmError::InvalidResponse("mock poisoned".to_string())),
        };
        match scripts.get_mut(label) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(no_script),
            Some(queue) => queue.front().cloned().unwrap_or_else(no_script),
            None => no_script(),
        }
    }
}

fn no_script() -> MockReply {
    MockReply::Fail(LlmError::InvalidResponse("no scripted reply".to_string()))
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, LlmError> {
        let label = request.label.clone();
        let wants_structure = request.shape.is_some();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request);
        }

        match self.next_reply(&label) {
            MockReply::Fail(err) => Err(err),
            MockReply::Text(content) => {
                let structured = if wants_structure {
                    Some(parse_structured(&content)?)
                } else {
                    None
                };
                Ok(GenerateResponse {
                    content,
                    structured,
                    usage: Usage::default(),
                    model: "mock-model".to_string(),
                })
            }
        }
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    fn is_ready(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::OutputShape;
    use serde_json::json;

    #[test]
    fn test_llm_error_is_retryable() {
        assert!(LlmError::RateLimited { retry_after: None }.is_retryable());
        assert!(LlmError::TransientNetwork("reset".into()).is_retryable());
        assert!(!LlmError::Auth("bad key".into()).is_retryable());
        assert!(!LlmError::InvalidResponse("bad".into()).is_retryable());
    }

    #[test]
    fn test_from_status_classification() {
        assert!(matches!(LlmError::from_status(401, "", None), LlmError::Auth(_)));
        assert!(matches!(LlmError::from_status(403, "", None), LlmError::Auth(_)));
        assert!(matches!(
            LlmError::from_status(429, "", Some(Duration::from_secs(3))),
            LlmError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(3)
        ));
        assert!(matches!(LlmError::from_status(503, "", None), LlmError::TransientNetwork(_)));
        assert!(matches!(LlmError::from_status(408, "", None), LlmError::TransientNetwork(_)));
        assert!(matches!(LlmError::from_status(400, "", None), LlmError::InvalidResponse(_)));
    }

    #[test]
    fn test_parse_structured_plain_object() {
        let value = parse_structured(r#"{"clauses": []}"#).unwrap();
        assert!(value["clauses"].is_array());
    }

    #[test]
    fn test_parse_structured_fenced() {
        let value = parse_structured("```json\n{\"a\": 1}\n```").unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_parse_structured_rejects_non_object() {
        assert!(matches!(parse_structured("[1, 2]"), Err(LlmError::InvalidResponse(_))));
        assert!(matches!(parse_structured("not json"), Err(LlmError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_mock_replays_in_order_then_repeats_last() {
        let mock = MockLlmClient::new()
            .with_failure("risk-brief", LlmError::TransientNetwork("reset".into()))
            .with_reply("risk-brief", "# Brief");

        let first = mock.generate(GenerateRequest::new("risk-brief", "p")).await;
        assert!(first.is_err());
        let second = mock.generate(GenerateRequest::new("risk-brief", "p")).await.unwrap();
        assert_eq!(second.content, "# Brief");
        let third = mock.generate(GenerateRequest::new("risk-brief", "p")).await.unwrap();
        assert_eq!(third.content, "# Brief");
        assert_eq!(mock.call_count("risk-brief"), 3);
    }

    #[tokio::test]
    async fn test_mock_parses_structured_when_shaped() {
        let mock = MockLlmClient::new().with_reply("compare", r#"{"assessments": []}"#);
        let req = GenerateRequest::new("compare", "p").with_shape(OutputShape::new("a", json!({})));
        let resp = mock.generate(req).await.unwrap();
        assert!(resp.structured.is_some());
    }

    #[tokio::test]
    async fn test_mock_without_script_fails() {
        let mock = MockLlmClient::new();
        let result = mock.generate(GenerateRequest::new("translate", "p")).await;
        assert!(matches!(result, Err(LlmError::InvalidResponse(_))));
    }
}
