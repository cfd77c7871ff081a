//! Anthropic Messages API provider

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, error};

use super::{
    function_call_chunk, parse_failure, resolve_api_key, FrameParser, HttpRequest, Provider,
    ProviderKind, StreamChunk,
};
use crate::agents::config::ProviderConfig;
use crate::agents::domain::{Conversation, Role, ToolDefinition, Turn};
use crate::agents::error::LlmResult;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic provider
pub struct AnthropicProvider {
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider from configuration
    pub fn new(config: &ProviderConfig) -> LlmResult<Self> {
        Ok(Self {
            api_key: resolve_api_key(config, ProviderKind::Anthropic)?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: config.model.clone(),
            max_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }

    /// Convert turns to Anthropic messages.
    ///
    /// Tool results travel as user messages, and consecutive messages from
    /// the same role are merged because the API requires alternation.
    fn convert_turns(turns: &[Turn]) -> Vec<Value> {
        let mut messages: Vec<(&'static str, Vec<Value>)> = Vec::new();

        for turn in turns.iter().filter(|t| !t.is_empty()) {
            let (role, blocks) = Self::convert_turn(turn);
            if blocks.is_empty() {
                continue;
            }
            match messages.last_mut() {
                Some((last_role, content)) if *last_role == role => content.extend(blocks),
                _ => messages.push((role, blocks)),
            }
        }

        messages
            .into_iter()
            .map(|(role, content)| json!({ "role": role, "content": content }))
            .collect()
    }

    fn convert_turn(turn: &Turn) -> (&'static str, Vec<Value>) {
        if let Some(stored) = turn.stored_function_call() {
            let mut blocks = Vec::new();
            if !turn.text.trim().is_empty() {
                blocks.push(json!({ "type": "text", "text": turn.text }));
            }
            match stored {
                Ok(stored) => {
                    let input = if stored.function_call.args.is_object() {
                        stored.function_call.args
                    } else {
                        json!({})
                    };
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": stored.function_call.id,
                        "name": stored.function_call.name,
                        "input": input,
                    }));
                }
                Err(e) => {
                    error!("Failed to parse stored function call: {}", e);
                    if blocks.is_empty() {
                        blocks.push(json!({ "type": "text", "text": "Error parsing function call" }));
                    }
                }
            }
            return ("assistant", blocks);
        }

        if let Some(stored) = turn.stored_function_response() {
            let block = match stored {
                Ok(stored) => json!({
                    "type": "tool_result",
                    "tool_use_id": stored.id,
                    "content": stored.function_response.response.to_string(),
                }),
                Err(e) => {
                    error!("Failed to parse stored function response: {}", e);
                    json!({ "type": "text", "text": turn.text })
                }
            };
            return ("user", vec![block]);
        }

        let role = match turn.role {
            Role::Assistant => "assistant",
            Role::User | Role::Tool => "user",
        };
        (role, vec![json!({ "type": "text", "text": turn.provider_text() })])
    }
}

impl Provider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
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
            "max_tokens": self.max_tokens,
            "messages": Self::convert_turns(&conversation.turns),
            "stream": true,
        });

        if !instructions.is_empty() {
            body["system"] = json!(instructions);
        }

        if !tools.is_empty() {
            body["tools"] = json!(tools
                .iter()
                .map(|t| json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                }))
                .collect::<Vec<_>>());
        }

        HttpRequest::new(self.endpoint(), body)
            .with_header("x-api-key", self.api_key.clone())
            .with_header("anthropic-version", API_VERSION)
    }

    fn frame_parser(&self) -> Box<dyn FrameParser> {
        Box::new(AnthropicParser::default())
    }
}

/// Parser for Messages API stream events.
///
/// Tool input arrives as JSON fragments; they are accumulated per content
/// block and emitted as one function call when the block stops.
#[derive(Debug, Default)]
pub struct AnthropicParser {
    tool_blocks: HashMap<usize, ToolBlock>,
    stop_reason: Option<String>,
}

#[derive(Debug)]
struct ToolBlock {
    id: String,
    name: String,
    input_json: String,
}

impl AnthropicParser {
    fn map_event(&mut self, event: StreamEvent) -> Vec<StreamChunk> {
        match event {
            StreamEvent::MessageStart {} | StreamEvent::Ping {} => Vec::new(),
            StreamEvent::ContentBlockStart { index, content_block } => match content_block {
                ContentBlock::Text { text } if !text.is_empty() => vec![StreamChunk::text(text)],
                ContentBlock::ToolUse { id, name } => {
                    self.tool_blocks.insert(
                        index,
                        ToolBlock {
                            id,
                            name,
                            input_json: String::new(),
                        },
                    );
                    Vec::new()
                }
                _ => Vec::new(),
            },
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } => vec![StreamChunk::text(text)],
                BlockDelta::InputJsonDelta { partial_json } => {
                    match self.tool_blocks.get_mut(&index) {
                        Some(block) => block.input_json.push_str(&partial_json),
                        None => debug!("Input delta for unknown block {}", index),
                    }
                    Vec::new()
                }
                BlockDelta::Other => Vec::new(),
            },
            StreamEvent::ContentBlockStop { index } => match self.tool_blocks.remove(&index) {
                Some(block) => vec![function_call_chunk(&block.name, &block.input_json, block.id)],
                None => Vec::new(),
            },
            StreamEvent::MessageDelta { delta } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                Vec::new()
            }
            StreamEvent::MessageStop {} => {
                let should_continue = self.stop_reason.as_deref() == Some("tool_use");
                vec![StreamChunk::done(should_continue)]
            }
            StreamEvent::Error { error } => {
                let message = error
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| "Unknown error".to_string());
                error!("Anthropic stream error: {}", message);
                vec![StreamChunk::failure(message)]
            }
            StreamEvent::Unknown => Vec::new(),
        }
    }
}

impl FrameParser for AnthropicParser {
    fn parse_frame(&mut self, frame: &str) -> Vec<StreamChunk> {
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

        match serde_json::from_value::<StreamEvent>(value) {
            Ok(StreamEvent::Unknown) => {
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

// Anthropic stream event types

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {},
    ContentBlockStart {
        #[serde(default)]
        index: usize,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        #[serde(default)]
        index: usize,
        delta: BlockDelta,
    },
    ContentBlockStop {
        #[serde(default)]
        index: usize,
    },
    MessageDelta {
        #[serde(default)]
        delta: MessageDeltaBody,
    },
    MessageStop {},
    Ping {},
    Error {
        #[serde(default)]
        error: Option<ErrorBody>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta {
        #[serde(default)]
        text: String,
    },
    InputJsonDelta {
        #[serde(default)]
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::domain::{AiFunction, FunctionCall};
    use serde_json::Map;

    fn feed(parser: &mut AnthropicParser, frames: &[Value]) -> Vec<StreamChunk> {
        frames
            .iter()
            .flat_map(|f| parser.parse_frame(&f.to_string()))
            .collect()
    }

    #[test]
    fn test_text_stream() {
        let mut parser = AnthropicParser::default();
        let chunks = feed(
            &mut parser,
            &[
                json!({"type": "message_start", "message": {"id": "msg_1"}}),
                json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
                json!({"type": "ping"}),
                json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hel"}}),
                json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "lo"}}),
                json!({"type": "content_block_stop", "index": 0}),
                json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}}),
                json!({"type": "message_stop"}),
            ],
        );

        assert_eq!(
            chunks,
            vec![StreamChunk::text("Hel"), StreamChunk::text("lo"), StreamChunk::done(false)]
        );
    }

    #[test]
    fn test_tool_use_is_accumulated() {
        let mut parser = AnthropicParser::default();
        let chunks = feed(
            &mut parser,
            &[
                json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "search_vault_files", "input": {}}}),
                json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"search_terms\":"}}),
                json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": " [\"rust\"]}"}}),
                json!({"type": "content_block_stop", "index": 1}),
                json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}}),
                json!({"type": "message_stop"}),
            ],
        );

        assert_eq!(chunks.len(), 2);
        let call = chunks[0].function_call.as_ref().unwrap();
        assert_eq!(call.name, AiFunction::SearchVaultFiles);
        assert_eq!(call.call_id, "toolu_1");
        assert_eq!(call.arguments["search_terms"], json!(["rust"]));
        assert!(chunks[0].should_continue);
        assert_eq!(chunks[1], StreamChunk::done(true));
    }

    #[test]
    fn test_tool_use_without_input() {
        let mut parser = AnthropicParser::default();
        let chunks = feed(
            &mut parser,
            &[
                json!({"type": "content_block_start", "index": 0, "content_block": {"type": "tool_use", "id": "t", "name": "list_vault_files", "input": {}}}),
                json!({"type": "content_block_stop", "index": 0}),
            ],
        );
        assert!(chunks[0].function_call.as_ref().unwrap().arguments.is_empty());
    }

    #[test]
    fn test_error_event() {
        let mut parser = AnthropicParser::default();
        let chunks = feed(
            &mut parser,
            &[json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}})],
        );
        assert_eq!(chunks, vec![StreamChunk::failure("Overloaded")]);
    }

    #[test]
    fn test_unknown_delta_and_event_ignored() {
        let mut parser = AnthropicParser::default();
        let chunks = feed(
            &mut parser,
            &[
                json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "hmm"}}),
                json!({"type": "something_new"}),
            ],
        );
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_malformed_frame() {
        let mut parser = AnthropicParser::default();
        let chunks = parser.parse_frame("not json");
        assert!(chunks[0].is_complete);
        assert!(chunks[0].error.as_deref().unwrap().starts_with("Failed to parse chunk:"));
    }

    #[test]
    fn test_build_request_merges_roles() {
        let provider = AnthropicProvider::new(&ProviderConfig {
            model: "claude-sonnet-4-5-20250929".to_string(),
            api_key: Some("key".to_string()),
            ..Default::default()
        })
        .unwrap();

        let mut conversation = Conversation::new();
        conversation.push(Turn::user("find rust notes"));
        let mut args = Map::new();
        args.insert("search_terms".to_string(), json!(["rust"]));
        let first = FunctionCall::new(AiFunction::SearchVaultFiles, args, "t1");
        let second = FunctionCall::new(AiFunction::ListVaultFiles, Map::new(), "t2");
        conversation.record_function_call(&first);
        conversation.push_function_result(&first, json!([]));
        conversation.record_function_call(&second);
        conversation.push_function_result(&second, json!(["a.md"]));

        let request = provider.build_request(&conversation, "sys", &[]);
        assert_eq!(request.url, "https://api.anthropic.com/v1/messages");
        assert!(request.headers.contains(&("x-api-key".to_string(), "key".to_string())));
        assert!(request
            .headers
            .contains(&("anthropic-version".to_string(), "2023-06-01".to_string())));

        let body = request.body;
        assert_eq!(body["system"], json!("sys"));
        assert_eq!(body["max_tokens"], json!(4096));
        assert!(body.get("tools").is_none());

        let messages = body["messages"].as_array().unwrap();
        let roles: Vec<&str> = messages.iter().map(|m| m["role"].as_str().unwrap()).collect();
        assert_eq!(roles, vec!["user", "assistant", "user", "assistant", "user"]);
        assert_eq!(messages[1]["content"][0]["type"], json!("tool_use"));
        assert_eq!(messages[1]["content"][0]["input"], json!({"search_terms": ["rust"]}));
        assert_eq!(messages[2]["content"][0]["type"], json!("tool_result"));
        assert_eq!(messages[2]["content"][0]["tool_use_id"], json!("t1"));
    }

    #[test]
    fn test_consecutive_user_turns_are_merged() {
        let mut conversation = Conversation::new();
        conversation.push(Turn::user("one"));
        conversation.push(Turn::user("two"));
        let messages = AnthropicProvider::convert_turns(&conversation.turns);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["content"].as_array().unwrap().len(), 2);
    }
}
