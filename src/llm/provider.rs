//! Backend selection

use std::sync::Arc;

use crate::config::{LlmConfig, Provider};
use crate::error::Result;

use super::aicore::AiCoreClient;
use super::client::LlmClient;
use super::openai::OpenAiClient;

/// Build the configured backend behind the `LlmClient` seam
pub fn build_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    let client: Arc<dyn LlmClient> = match config.provider {
        Provider::OpenAi => Arc::new(OpenAiClient::new(config)?),
        Provider::AiCore => Arc::new(AiCoreClient::new(config)?),
    };

    if !client.is_ready() {
        log::warn!(
            "LLM provider {:?} has no credentials configured; model calls will fail",
            config.provider
        );
    }
    tracing::info!(provider = ?config.provider, model = client.model(), "llm client ready");
    Ok(client)
}
