//! Conversation titles generated from the first prompt

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::agents::config::{NamingConfig, ProviderConfig};
use crate::agents::domain::Conversation;
use crate::agents::error::{AgentError, AgentResult, LlmError, LlmResult};
use crate::agents::limiter::Semaphore;
use crate::agents::llm::{resolve_api_key, HttpRequest, ProviderKind, Transport};
use crate::agents::memory::ConversationStore;

/// Instructions for the naming model
pub const NAME_PROMPT: &str = "You are a conversation title generator. Given a user's first message, \
generate a concise, descriptive title (maximum 6 words) that captures the essence of their request.

Rules:
- Maximum 6 words
- No quotes or special formatting
- Capitalize appropriately
- Be specific and descriptive
- Return ONLY the title, nothing else";

const MAX_TITLE_WORDS: usize = 6;
const MAX_TITLE_ATTEMPTS: usize = 100;

/// Produces a raw title for a first prompt
#[async_trait]
pub trait TitleGenerator: Send + Sync {
    async fn generate(&self, first_prompt: &str) -> LlmResult<String>;
}

/// Titles from the OpenAI Responses API, without streaming
pub struct OpenAiTitleGenerator {
    transport: Arc<dyn Transport>,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiTitleGenerator {
    pub fn new(transport: Arc<dyn Transport>, provider: &ProviderConfig, naming: &NamingConfig) -> LlmResult<Self> {
        // Reuse the chat key only when the chat model is an OpenAI one
        let mut key_config = provider.clone();
        if ProviderKind::from_model(&provider.model).ok() != Some(ProviderKind::OpenAi) {
            key_config.api_key = None;
            key_config.api_key_env = None;
        }
        let api_key = resolve_api_key(&key_config, ProviderKind::OpenAi)?;

        Ok(Self {
            transport,
            api_key,
            base_url: key_config
                .base_url
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            model: naming.model.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct NamingResponse {
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl NamingResponse {
    fn title(self) -> Option<String> {
        if let Some(text) = self.output_text.filter(|t| !t.trim().is_empty()) {
            return Some(text.trim().to_string());
        }
        self.output
            .into_iter()
            .next()?
            .content
            .into_iter()
            .next()
            .filter(|c| c.kind == "output_text" && !c.text.trim().is_empty())
            .map(|c| c.text)
    }
}

#[async_trait]
impl TitleGenerator for OpenAiTitleGenerator {
    async fn generate(&self, first_prompt: &str) -> LlmResult<String> {
        let body = json!({
            "model": self.model,
            "max_output_tokens": 100,
            "instructions": NAME_PROMPT,
            "input": [{ "role": "user", "content": first_prompt }],
            "stream": false,
        });
        let request = HttpRequest::new(format!("{}/v1/responses", self.base_url), body)
            .with_header("Authorization", format!("Bearer {}", self.api_key));

        let response = self.transport.post(&request).await?;
        let status = response.status;
        let reason = response.reason.clone();
        let success = response.is_success();
        let text = response.text().await?;

        if !success {
            return Err(LlmError::Api {
                status,
                reason,
                message: text,
            });
        }

        let parsed: NamingResponse = serde_json::from_str(&text)?;
        parsed
            .title()
            .ok_or_else(|| LlmError::Parse("Failed to generate conversation name".to_string()))
    }
}

/// Clean up a generated title: trim, drop wrapping quotes, collapse
/// whitespace and keep at most six words
pub fn sanitize_title(raw: &str) -> String {
    let unquoted = raw.trim().trim_matches(|c: char| c == '"' || c == '\'');

    unquoted
        .split_whitespace()
        .take(MAX_TITLE_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
}

/// First of `title`, `title(1)`, `title(2)`, ... not used by another conversation
pub async fn unique_title(store: &dyn ConversationStore, title: &str, conversation_id: &str) -> AgentResult<String> {
    if !store.title_taken(title, conversation_id).await? {
        return Ok(title.to_string());
    }
    for n in 1..MAX_TITLE_ATTEMPTS {
        let candidate = format!("{}({})", title, n);
        if !store.title_taken(&candidate, conversation_id).await? {
            return Ok(candidate);
        }
    }
    Err(AgentError::Naming(format!(
        "No free title for \"{}\" after {} attempts",
        title, MAX_TITLE_ATTEMPTS
    )))
}

/// Names conversations, one request at a time
pub struct ConversationNamer {
    generator: Arc<dyn TitleGenerator>,
    store: Arc<dyn ConversationStore>,
    gate: Semaphore,
}

impl ConversationNamer {
    pub fn new(generator: Arc<dyn TitleGenerator>, store: Arc<dyn ConversationStore>) -> Self {
        Self {
            generator,
            store,
            gate: Semaphore::new(1, false),
        }
    }

    /// Title the conversation from its first user prompt and save it.
    ///
    /// Returns `Ok(None)` when another naming request is running, when
    /// there is no prompt yet, on cancellation, or when the conversation
    /// was retitled while the request was out.
    pub async fn name(
        &self,
        conversation: &Mutex<Conversation>,
        cancel: &CancellationToken,
    ) -> AgentResult<Option<String>> {
        let Some(_permit) = self.gate.permit().await else {
            debug!("Naming already in progress, skipping");
            return Ok(None);
        };

        let (id, old_title, prompt) = {
            let conversation = conversation.lock().await;
            let Some(prompt) = conversation.first_user_text() else {
                return Ok(None);
            };
            (conversation.id.clone(), conversation.title.clone(), prompt.to_string())
        };

        let raw = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            raw = self.generator.generate(&prompt) => raw?,
        };

        let title = sanitize_title(&raw);
        if title.is_empty() {
            return Err(AgentError::Naming("Generated title is empty".to_string()));
        }
        let title = unique_title(self.store.as_ref(), &title, &id).await?;

        let mut conversation = conversation.lock().await;
        if conversation.id != id || conversation.title != old_title {
            debug!("Conversation changed while naming, dropping title {}", title);
            return Ok(None);
        }
        conversation.title = title.clone();
        self.store.save(&conversation).await?;

        info!("Named conversation {} \"{}\"", id, title);
        Ok(Some(title))
    }
}
