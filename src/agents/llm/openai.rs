//! OpenAI Responses API provider

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, error, warn};

use super::{
    function_call_chunk, parse_failure, resolve_api_key, FrameParser, HttpRequest, Provider,
    ProviderKind, StreamChunk,
};
use crate::agents::config::ProviderConfig;
use crate::agents::domain::{Conversation, Role, ToolDefinition, Turn};
use crate::agents::error::LlmResult;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// OpenAI provider speaking the Responses API
pub struct OpenAiProvider {
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: Option<u32>,
}

impl OpenAiProvider {
    /// Create a new OpenAI provider from configuration
    pub fn new(config: &ProviderConfig) -> LlmResult<Self> {
        Ok(Self {
            api_key: resolve_api_key(config, ProviderKind::OpenAi)?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    /// URL of the responses endpoint
    pub fn endpoint(&self) -> String {
        format!("{}/v1/responses", self.base_url.trim_end_matches('/'))
    }

    /// Bearer token header
    pub fn auth_header(&self) -> (String, String) {
        ("Authorization".to_string(), format!("Bearer {}", self.api_key))
    }

    fn convert_turns(turns: &[Turn]) -> Vec<Value> {
        let mut input = Vec::new();

        for turn in turns.iter().filter(|t| !t.is_empty()) {
            if let Some(stored) = turn.stored_function_call() {
                if !turn.text.trim().is_empty() {
                    input.push(json!({ "role": "assistant", "content": turn.text }));
                }
                match stored {
                    Ok(stored) => input.push(json!({
                        "type": "function_call",
                        "call_id": stored.function_call.id,
                        "name": stored.function_call.name,
                        "arguments": stored.function_call.args.to_string(),
                    })),
                    Err(e) => {
                        error!("Failed to parse stored function call: {}", e);
                        if turn.text.trim().is_empty() {
                            input.push(json!({
                                "role": "assistant",
                                "content": "Error parsing function call"
                            }));
                        }
                    }
                }
                continue;
            }

            if let Some(stored) = turn.stored_function_response() {
                match stored {
                    Ok(stored) => input.push(json!({
                        "type": "function_call_output",
                        "call_id": stored.id,
                        "output": stored.function_response.response.to_string(),
                    })),
                    Err(e) => {
                        error!("Failed to parse stored function response: {}", e);
                        input.push(json!({ "role": "user", "content": turn.text }));
                    }
                }
                continue;
            }

            let role = match turn.role {
                Role::Assistant => "assistant",
                Role::User | Role::Tool => "user",
            };
            input.push(json!({ "role": role, "content": turn.provider_text() }));
        }

        input
    }
}

impl Provider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn build_request(
        &self,
        conversation: &Conversation,
        instructions: &str,
        tools: &[ToolDefinition],
    ) -> HttpRequest {
        let mut body = json!({
            "model": self.model,
            "input": Self::convert_turns(&conversation.turns),
            "stream": true,
        });

        if !instructions.is_empty() {
            body["instructions"] = json!(instructions);
        }

        if let Some(max_tokens) = self.max_tokens {
            body["max_output_tokens"] = json!(max_tokens);
        }

        if !tools.is_empty() {
            body["tools"] = json!(tools
                .iter()
                .map(|t| json!({
                    "type": "function",
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                }))
                .collect::<Vec<_>>());
        }

        let (name, value) = self.auth_header();
        HttpRequest::new(self.endpoint(), body).with_header(name, value)
    }

    fn frame_parser(&self) -> Box<dyn FrameParser> {
        Box::new(OpenAiParser::default())
    }
}

/// Parser for Responses API stream events
#[derive(Debug, Default)]
pub struct OpenAiParser {
    /// Function call items announced by `response.output_item.added`, by item id
    pending_calls: HashMap<String, PendingCall>,
}

#[derive(Debug, Clone)]
struct PendingCall {
    call_id: String,
    name: String,
}

impl OpenAiParser {
    fn map_event(&mut self, event: ResponseEvent) -> Vec<StreamChunk> {
        match event {
            ResponseEvent::OutputTextDelta { delta } | ResponseEvent::RefusalDelta { delta } => {
                vec![StreamChunk::text(delta)]
            }
            ResponseEvent::ArgumentsDelta {} | ResponseEvent::OutputItemDone {} => Vec::new(),
            ResponseEvent::OutputItemAdded { item } => {
                if item.kind == "function_call" {
                    if let (Some(id), Some(name)) = (item.id.clone(), item.name.clone()) {
                        let call_id = item.call_id.unwrap_or_else(|| id.clone());
                        self.pending_calls.insert(id, PendingCall { call_id, name });
                    }
                }
                Vec::new()
            }
            ResponseEvent::ArgumentsDone {
                call,
                item_id,
                name,
                arguments,
            } => vec![self.complete_call(call, item_id, name, arguments)],
            ResponseEvent::Completed { response } => {
                let should_continue = response
                    .map(|r| r.output.iter().any(OutputItem::requests_tool))
                    .unwrap_or(false);
                vec![StreamChunk::done(should_continue)]
            }
            ResponseEvent::Incomplete { response } => {
                let reason = response
                    .and_then(|r| r.incomplete_details)
                    .and_then(|d| d.reason)
                    .unwrap_or_else(|| "unknown".to_string());
                warn!("Response incomplete: {}", reason);
                vec![StreamChunk::done(false)]
            }
            ResponseEvent::Failed { response } => {
                let message = response
                    .and_then(|r| r.error)
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| "Response failed".to_string());
                error!("Response failed: {}", message);
                vec![StreamChunk::failure(message)]
            }
            ResponseEvent::Error { error, message } => {
                let message = error
                    .and_then(|e| e.message)
                    .or(message)
                    .unwrap_or_else(|| "Unknown error".to_string());
                error!("Response error: {}", message);
                vec![StreamChunk::failure(message)]
            }
            ResponseEvent::Unknown => Vec::new(),
        }
    }

    fn complete_call(
        &mut self,
        call: Option<ToolCallPayload>,
        item_id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    ) -> StreamChunk {
        if let Some(call) = call {
            if call.kind != "function" {
                debug!("Ignoring non-function tool call of type {}", call.kind);
                return StreamChunk::empty();
            }
            return function_call_chunk(&call.function.name, &call.function.arguments, call.id);
        }

        let pending = item_id.as_ref().and_then(|id| self.pending_calls.remove(id));
        let resolved_name = name.or_else(|| pending.as_ref().map(|p| p.name.clone()));
        let call_id = pending.map(|p| p.call_id).or(item_id);

        match (resolved_name, call_id) {
            (Some(name), Some(call_id)) => {
                function_call_chunk(&name, arguments.as_deref().unwrap_or(""), call_id)
            }
            _ => {
                error!("Function call arguments arrived for an unknown item");
                StreamChunk::empty()
            }
        }
    }
}

impl FrameParser for OpenAiParser {
    fn parse_frame(&mut self, frame: &str) -> Vec<StreamChunk> {
        if frame.trim() == "[DONE]" {
            return vec![StreamChunk::done(false)];
        }

        let value: Value = match serde_json::from_str(frame) {
            Ok(value) => value,
            Err(e) => {
                error!("Failed to parse stream chunk: {} Chunk: {}", e, frame);
                return vec![parse_failure(e)];
            }
        };
        let Some(event_type) = value.get("type").and_then(Value::as_str).map(str::to_string) else {
            debug!("Ignoring event without a type");
            return Vec::new();
        };

        match serde_json::from_value::<ResponseEvent>(value) {
            Ok(ResponseEvent::Unknown) => {
                debug!("Unknown event type: {}", event_type);
                Vec::new()
            }
            Ok(event) => self.map_event(event),
            Err(e) => {
                error!("Malformed {} event: {}", event_type, e);
                vec![parse_failure(e)]
            }
        }
    }
}

// Responses API stream event types

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseEvent {
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        #[serde(default)]
        delta: String,
    },
    #[serde(rename = "response.refusal.delta")]
    RefusalDelta {
        #[serde(default)]
        delta: String,
    },
    #[serde(rename = "response.function_call_arguments.delta")]
    ArgumentsDelta {},
    #[serde(rename = "response.function_call_arguments.done")]
    ArgumentsDone {
        #[serde(default)]
        call: Option<ToolCallPayload>,
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        arguments: Option<String>,
    },
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { item: OutputItem },
    #[serde(rename = "response.output_item.done")]
    OutputItemDone {},
    #[serde(rename = "response.completed", alias = "response.done")]
    Completed {
        #[serde(default)]
        response: Option<ResponseBody>,
    },
    #[serde(rename = "response.incomplete")]
    Incomplete {
        #[serde(default)]
        response: Option<ResponseBody>,
    },
    #[serde(rename = "response.failed")]
    Failed {
        #[serde(default)]
        response: Option<ResponseBody>,
    },
    #[serde(rename = "error", alias = "response.error")]
    Error {
        #[serde(default)]
        error: Option<ErrorBody>,
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ToolCallPayload {
    id: String,
    #[serde(rename = "type", default = "default_tool_type")]
    kind: String,
    function: FunctionPayload,
}

fn default_tool_type() -> String {
    "function".to_string()
}

#[derive(Debug, Deserialize)]
struct FunctionPayload {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    call_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    tool_calls: Vec<Value>,
}

impl OutputItem {
    fn requests_tool(&self) -> bool {
        self.kind == "function_call" || !self.tool_calls.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    #[serde(default)]
    output: Vec<OutputItem>,
    #[serde(default)]
    error: Option<ErrorBody>,
    #[serde(default)]
    incomplete_details: Option<IncompleteDetails>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IncompleteDetails {
    #[serde(default)]
    reason: Option<String>,
}
