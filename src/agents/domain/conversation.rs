//! Conversation and turn types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{FunctionCall, StoredFunctionCall, StoredFunctionResponse};

/// Speaker of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User input
    User,
    /// Model output
    Assistant,
    /// Function result fed back to the model
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// One entry in a conversation's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub role: Role,
    /// Text shown to the user
    pub text: String,
    /// Text sent to the provider for user turns (may carry extra context)
    #[serde(default)]
    pub raw_provider_text: String,
    /// Stored function call JSON when the assistant asked for a tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call_payload: Option<String>,
    #[serde(default)]
    pub is_function_call: bool,
    #[serde(default)]
    pub is_function_call_result: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            text: text.into(),
            raw_provider_text: String::new(),
            function_call_payload: None,
            is_function_call: false,
            is_function_call_result: false,
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    /// User turn sent to the provider as typed
    pub fn user(text: impl Into<String>) -> Self {
        let text = text.into();
        let mut turn = Self::new(Role::User, text.clone());
        turn.raw_provider_text = text;
        turn
    }

    /// User turn whose provider-facing text differs from what is displayed
    pub fn user_with_prompt(text: impl Into<String>, provider_text: impl Into<String>) -> Self {
        let mut turn = Self::new(Role::User, text);
        turn.raw_provider_text = provider_text.into();
        turn
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Tool turn carrying the result of `call`
    pub fn function_result(call: &FunctionCall, result: Value) -> Self {
        let stored = StoredFunctionResponse::new(call, result);
        let mut turn = Self::new(
            Role::Tool,
            serde_json::to_string(&stored).unwrap_or_else(|_| "{}".to_string()),
        );
        turn.is_function_call_result = true;
        turn.tool_call_id = Some(call.call_id.clone());
        turn
    }

    /// Text to send to the provider for this turn
    pub fn provider_text(&self) -> &str {
        match self.role {
            Role::User if !self.raw_provider_text.is_empty() => &self.raw_provider_text,
            _ => &self.text,
        }
    }

    /// Whether the turn has nothing worth sending
    pub fn is_empty(&self) -> bool {
        self.provider_text().trim().is_empty()
            && self
                .function_call_payload
                .as_deref()
                .map_or(true, |p| p.trim().is_empty())
    }

    /// Decode the stored call of a function-call turn
    pub fn stored_function_call(&self) -> Option<serde_json::Result<StoredFunctionCall>> {
        if !self.is_function_call {
            return None;
        }
        let payload = self.function_call_payload.as_deref()?;
        Some(serde_json::from_str(payload))
    }

    /// Decode the stored result of a tool turn
    pub fn stored_function_response(&self) -> Option<serde_json::Result<StoredFunctionResponse>> {
        if !self.is_function_call_result {
            return None;
        }
        Some(serde_json::from_str(&self.text))
    }

    fn is_plain_assistant(&self) -> bool {
        self.role == Role::Assistant && !self.is_function_call
    }
}

/// A conversation with its full turn history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub turns: Vec<Turn>,
}

impl Conversation {
    /// Create an empty conversation titled after its creation time
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: now.format("%Y-%m-%d %H-%M-%S").to_string(),
            created: now,
            updated: now,
            turns: Vec::new(),
        }
    }

    /// Append a turn at the tail
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
        self.touch();
    }

    /// Add streamed text to the trailing assistant turn, opening one if the
    /// tail is anything else
    pub fn append_assistant_text(&mut self, text: &str) {
        match self.turns.last_mut() {
            Some(turn) if turn.is_plain_assistant() => turn.text.push_str(text),
            _ => self.turns.push(Turn::assistant(text)),
        }
        self.touch();
    }

    /// Mark the trailing assistant turn as having requested `call`
    pub fn record_function_call(&mut self, call: &FunctionCall) {
        let payload = serde_json::to_string(&call.to_stored()).unwrap_or_else(|_| "{}".to_string());
        if !matches!(self.turns.last(), Some(turn) if turn.is_plain_assistant()) {
            self.turns.push(Turn::assistant(""));
        }
        if let Some(turn) = self.turns.last_mut() {
            turn.function_call_payload = Some(payload);
            turn.is_function_call = true;
            turn.tool_call_id = Some(call.call_id.clone());
        }
        self.touch();
    }

    /// Append the tool turn answering `call`
    pub fn push_function_result(&mut self, call: &FunctionCall, result: Value) {
        self.push(Turn::function_result(call, result));
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Text of the first user turn, used for naming
    pub fn first_user_text(&self) -> Option<&str> {
        self.turns
            .iter()
            .find(|t| t.role == Role::User && !t.is_function_call_result)
            .map(|t| t.text.as_str())
    }

    pub fn to_summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            turn_count: self.turns.len(),
            created: self.created,
            updated: self.updated,
            last_turn_preview: self.turns.last().map(|t| preview(&t.text, 100)),
        }
    }

    fn touch(&mut self) {
        self.updated = Utc::now();
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

/// Listing entry for a stored conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub turn_count: usize,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_turn_preview: Option<String>,
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}
