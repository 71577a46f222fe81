//! Chat-completions wire format shared by both backends

use std::time::Duration;

use reqwest::RequestBuilder;
use serde_json::{Value, json};

use super::client::{LlmError, parse_structured};
use super::types::{GenerateRequest, GenerateResponse, Role, Usage};

/// Per-client defaults applied when a request leaves a field unset
#[derive(Debug, Clone)]
pub(crate) struct ChatDefaults {
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// Build the JSON body. `max_tokens_field` differs per provider
/// (`max_completion_tokens` for the direct API, `max_tokens` for the gateway).
pub(crate) fn build_chat_body(
    request: &GenerateRequest,
    model_field: Option<(&str, &str)>,
    max_tokens_field: &str,
    defaults: &ChatDefaults,
) -> Value {
    let messages: Vec<Value> = request
        .messages()
        .iter()
        .map(|m| {
            json!({
                "role": match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                "content": m.content
            })
        })
        .collect();

    let mut body = json!({
        "messages": messages,
        "temperature": request.temperature.unwrap_or(defaults.temperature),
    });
    body[max_tokens_field] = json!(request.max_tokens.unwrap_or(defaults.max_tokens));

    if let Some((key, value)) = model_field {
        body[key] = json!(value);
    }

    if let Some(shape) = &request.shape {
        body["response_format"] = json!({
            "type": "json_schema",
            "json_schema": {
                "name": shape.name,
                "schema": shape.schema,
                "strict": false
            }
        });
    }

    body
}

/// Extract content, usage and (for shaped requests) the structured object
pub(crate) fn parse_chat_response(body: &Value, request: &GenerateRequest, model: &str) -> Result<GenerateResponse, LlmError> {
    let choices = body["choices"]
        .as_array()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| LlmError::InvalidResponse("response did not contain choices".to_string()))?;

    let content = choices[0]["message"]["content"]
        .as_str()
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| LlmError::InvalidResponse("response did not contain message content".to_string()))?
        .to_string();

    let usage = body
        .get("usage")
        .map(|u| {
            Usage::new(
                u["prompt_tokens"].as_u64().unwrap_or(0),
                u["completion_tokens"].as_u64().unwrap_or(0),
            )
        })
        .unwrap_or_default();

    let structured = match request.shape {
        Some(_) => Some(parse_structured(&content)?),
        None => None,
    };

    Ok(GenerateResponse {
        content,
        structured,
        usage,
        model: body["model"].as_str().unwrap_or(model).to_string(),
    })
}

/// Send a prepared request, bounded by `timeout`, and classify failures
pub(crate) async fn send_chat(builder: RequestBuilder, timeout: Duration) -> Result<Value, LlmError> {
    let exchange = async {
        let response = builder.send().await?;
        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(LlmError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::from_status(status.as_u16(), &error_body, None));
        }

        response.json::<Value>().await.map_err(LlmError::from)
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::TransientNetwork(format!(
            "request timed out after {}s",
            timeout.as_secs_f32()
        ))),
    }
}
