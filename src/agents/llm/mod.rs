//! LLM providers with streaming support
//!
//! Every provider knows how to:
//! - encode a conversation into its native request body
//! - parse its own SSE frames into canonical [`StreamChunk`]s
//!
//! Supported providers:
//! - OpenAI (Responses API)
//! - Anthropic (Messages API)
//! - Google Gemini (`streamGenerateContent`)

mod anthropic;
mod gemini;
mod openai;
mod orchestrator;
mod stream;
mod transport;

pub use anthropic::{AnthropicParser, AnthropicProvider};
pub use gemini::{GeminiParser, GeminiProvider};
pub use openai::{OpenAiParser, OpenAiProvider};
pub use orchestrator::{LineFramer, StreamOrchestrator};
pub use stream::*;
pub use transport::*;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use crate::agents::config::ProviderConfig;
use crate::agents::domain::{AiFunction, Conversation, FunctionCall, ToolDefinition};
use crate::agents::error::{LlmError, LlmResult};

/// Provider family, derived from the model name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Gemini,
}

impl ProviderKind {
    /// Pick the provider serving `model`
    pub fn from_model(model: &str) -> LlmResult<Self> {
        if model.starts_with("claude-") {
            Ok(ProviderKind::Anthropic)
        } else if model.starts_with("gemini-") {
            Ok(ProviderKind::Gemini)
        } else if model.starts_with("gpt-") || is_openai_reasoning_model(model) {
            Ok(ProviderKind::OpenAi)
        } else {
            Err(LlmError::UnsupportedModel(model.to_string()))
        }
    }

    /// Environment variable holding the API key by default
    pub fn default_api_key_env(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::Gemini => "GEMINI_API_KEY",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::Anthropic => write!(f, "anthropic"),
            ProviderKind::Gemini => write!(f, "gemini"),
        }
    }
}

// o1, o3-mini, o4-mini, ...
fn is_openai_reasoning_model(model: &str) -> bool {
    let mut chars = model.chars();
    chars.next() == Some('o') && chars.next().map_or(false, |c| c.is_ascii_digit())
}

/// A provider backend
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Model being used
    fn model(&self) -> &str;

    /// Encode the full conversation as a streaming request
    fn build_request(
        &self,
        conversation: &Conversation,
        instructions: &str,
        tools: &[ToolDefinition],
    ) -> HttpRequest;

    /// Fresh parser for one response stream
    fn frame_parser(&self) -> Box<dyn FrameParser>;
}

/// Create a provider from configuration
pub fn create_provider(config: &ProviderConfig) -> LlmResult<Arc<dyn Provider>> {
    match ProviderKind::from_model(&config.model)? {
        ProviderKind::OpenAi => Ok(Arc::new(OpenAiProvider::new(config)?)),
        ProviderKind::Anthropic => Ok(Arc::new(AnthropicProvider::new(config)?)),
        ProviderKind::Gemini => Ok(Arc::new(GeminiProvider::new(config)?)),
    }
}

/// Resolve the API key: explicit value first, then the environment
pub(crate) fn resolve_api_key(config: &ProviderConfig, kind: ProviderKind) -> LlmResult<String> {
    if let Some(key) = config.api_key.as_ref().filter(|k| !k.is_empty()) {
        return Ok(key.clone());
    }
    let env_var = config
        .api_key_env
        .clone()
        .unwrap_or_else(|| kind.default_api_key_env().to_string());
    std::env::var(&env_var)
        .map_err(|_| LlmError::Authentication(format!("Environment variable {} not set", env_var)))
}

/// Terminal chunk for a frame that could not be understood
pub(crate) fn parse_failure(err: impl std::fmt::Display) -> StreamChunk {
    StreamChunk::failure(format!("Failed to parse chunk: {}", err))
}

/// Chunk for a completed function call whose arguments arrive as a JSON string.
///
/// Undecodable arguments are logged and produce a chunk without a call.
pub(crate) fn function_call_chunk(name: &str, raw_arguments: &str, call_id: String) -> StreamChunk {
    match FunctionCall::decode_arguments(raw_arguments) {
        Ok(arguments) => StreamChunk::function_call(FunctionCall::new(AiFunction::from(name), arguments, call_id)),
        Err(e) => {
            error!("Failed to parse function call arguments for {}: {}", name, e);
            StreamChunk::empty()
        }
    }
}
