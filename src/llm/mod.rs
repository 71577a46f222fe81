//! LLM client layer
//!
//! One `generate` capability behind the `LlmClient` trait, with two
//! interchangeable backends:
//! - `OpenAiClient` for a direct API key
//! - `AiCoreClient` for the OAuth-protected enterprise gateway

pub mod aicore;
mod chat;
pub mod client;
pub mod openai;
pub mod provider;
#[cfg(test)]
mod test_server;
pub mod types;

pub use aicore::AiCoreClient;
pub use client::{LlmClient, LlmError, MockLlmClient, MockReply, parse_structured};
pub use openai::OpenAiClient;
pub use provider::build_client;
pub use types::{GenerateRequest, GenerateResponse, Message, OutputShape, Role, Usage};
