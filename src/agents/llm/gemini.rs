//! Google Gemini provider

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error, warn};

use super::{parse_failure, resolve_api_key, FrameParser, HttpRequest, Provider, ProviderKind, StreamChunk};
use crate::agents::config::ProviderConfig;
use crate::agents::domain::{AiFunction, Conversation, FunctionCall, Role, ToolDefinition, Turn};
use crate::agents::error::LlmResult;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Google Gemini provider
pub struct GeminiProvider {
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: Option<u32>,
}

impl GeminiProvider {
    /// Create a new Gemini provider from configuration
    pub fn new(config: &ProviderConfig) -> LlmResult<Self> {
        Ok(Self {
            api_key: resolve_api_key(config, ProviderKind::Gemini)?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    fn convert_turns(turns: &[Turn]) -> Vec<Value> {
        let mut contents: Vec<(&'static str, Vec<Value>)> = Vec::new();

        for turn in turns.iter().filter(|t| !t.is_empty()) {
            let (role, parts) = Self::convert_turn(turn);
            match contents.last_mut() {
                Some((last_role, existing)) if *last_role == role => existing.extend(parts),
                _ => contents.push((role, parts)),
            }
        }

        contents
            .into_iter()
            .map(|(role, parts)| json!({ "role": role, "parts": parts }))
            .collect()
    }

    fn convert_turn(turn: &Turn) -> (&'static str, Vec<Value>) {
        if let Some(stored) = turn.stored_function_call() {
            let mut parts = Vec::new();
            if !turn.text.trim().is_empty() {
                parts.push(json!({ "text": turn.text }));
            }
            match stored {
                Ok(stored) => parts.push(json!({
                    "functionCall": {
                        "id": stored.function_call.id,
                        "name": stored.function_call.name,
                        "args": stored.function_call.args,
                    }
                })),
                Err(e) => {
                    error!("Failed to parse stored function call: {}", e);
                    if parts.is_empty() {
                        parts.push(json!({ "text": "Error parsing function call" }));
                    }
                }
            }
            return ("model", parts);
        }

        if let Some(stored) = turn.stored_function_response() {
            let part = match stored {
                Ok(stored) => json!({
                    "functionResponse": {
                        "id": stored.id,
                        "name": stored.function_response.name,
                        "response": stored.function_response.response,
                    }
                }),
                Err(e) => {
                    error!("Failed to parse stored function response: {}", e);
                    json!({ "text": turn.text })
                }
            };
            return ("user", vec![part]);
        }

        let role = match turn.role {
            Role::Assistant => "model",
            Role::User | Role::Tool => "user",
        };
        (role, vec![json!({ "text": turn.provider_text() })])
    }
}

impl Provider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
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
            "contents": Self::convert_turns(&conversation.turns),
        });

        if !instructions.is_empty() {
            body["systemInstruction"] = json!({ "parts": [{ "text": instructions }] });
        }

        if let Some(max_tokens) = self.max_tokens {
            body["generationConfig"] = json!({ "maxOutputTokens": max_tokens });
        }

        if !tools.is_empty() {
            body["tools"] = json!([{
                "functionDeclarations": tools
                    .iter()
                    .map(|t| json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }))
                    .collect::<Vec<_>>()
            }]);
        }

        HttpRequest::new(self.endpoint(), body).with_header("x-goog-api-key", self.api_key.clone())
    }

    fn frame_parser(&self) -> Box<dyn FrameParser> {
        Box::new(GeminiParser::default())
    }
}

/// Parser for `streamGenerateContent` SSE frames.
///
/// A single frame may carry text, several function calls and the finish
/// reason together.
#[derive(Debug, Default)]
pub struct GeminiParser {
    saw_function_call: bool,
}

impl GeminiParser {
    fn map_frame(&mut self, frame: GeminiFrame) -> Vec<StreamChunk> {
        match frame {
            GeminiFrame::Error { error } => {
                let message = error.message.unwrap_or_else(|| "Unknown error".to_string());
                error!("Gemini stream error: {}", message);
                vec![StreamChunk::failure(message)]
            }
            GeminiFrame::Content(response) => self.map_response(response),
        }
    }

    fn map_response(&mut self, response: GenerateContentResponse) -> Vec<StreamChunk> {
        if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
            return vec![StreamChunk::failure(format!("Prompt blocked: {}", reason))];
        }

        let Some(candidate) = response.candidates.into_iter().next() else {
            debug!("Frame without candidates");
            return Vec::new();
        };

        let mut chunks = Vec::new();
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if part.thought {
                continue;
            }
            if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                chunks.push(StreamChunk::text(text));
            }
            if let Some(call) = part.function_call {
                self.saw_function_call = true;
                let call_id = call.id.unwrap_or_else(FunctionCall::generate_id);
                chunks.push(StreamChunk::function_call(FunctionCall::new(
                    AiFunction::from(call.name.as_str()),
                    call.args,
                    call_id,
                )));
            }
        }

        if let Some(reason) = candidate.finish_reason {
            if reason != "STOP" {
                warn!("Gemini finished with reason {}", reason);
            }
            chunks.push(StreamChunk::done(self.saw_function_call));
        }

        chunks
    }
}

impl FrameParser for GeminiParser {
    fn parse_frame(&mut self, frame: &str) -> Vec<StreamChunk> {
        match serde_json::from_str::<GeminiFrame>(frame) {
            Ok(frame) => self.map_frame(frame),
            Err(e) => {
                error!("Failed to parse stream chunk: {} Chunk: {}", e, frame);
                vec![parse_failure(e)]
            }
        }
    }
}

// Gemini stream frame types

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiFrame {
    Error { error: ErrorBody },
    Content(GenerateContentResponse),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<GeminiFunctionCall>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Map<String, Value>,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(parser: &mut GeminiParser, frame: Value) -> Vec<StreamChunk> {
        parser.parse_frame(&frame.to_string())
    }

    #[test]
    fn test_text_frames() {
        let mut parser = GeminiParser::default();
        let chunks = parse(
            &mut parser,
            json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "Hello"}]}}]}),
        );
        assert_eq!(chunks, vec![StreamChunk::text("Hello")]);

        let chunks = parse(
            &mut parser,
            json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "!"}]}, "finishReason": "STOP"}]}),
        );
        assert_eq!(chunks, vec![StreamChunk::text("!"), StreamChunk::done(false)]);
    }

    #[test]
    fn test_multiple_function_calls_in_one_frame() {
        let mut parser = GeminiParser::default();
        let chunks = parse(
            &mut parser,
            json!({"candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "Let me look."},
                    {"functionCall": {"name": "read_file", "args": {"path": "a.md"}, "id": "g1"}},
                    {"functionCall": {"name": "list_vault_files", "args": {}}}
                ]},
                "finishReason": "STOP"
            }]}),
        );

        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].text, "Let me look.");
        let first = chunks[1].function_call.as_ref().unwrap();
        assert_eq!(first.name, AiFunction::ReadFile);
        assert_eq!(first.call_id, "g1");
        assert_eq!(first.arguments["path"], json!("a.md"));
        let second = chunks[2].function_call.as_ref().unwrap();
        assert!(second.call_id.starts_with("call_"));
        assert_eq!(chunks[3], StreamChunk::done(true));
    }

    #[test]
    fn test_should_continue_remembers_earlier_call() {
        let mut parser = GeminiParser::default();
        parse(
            &mut parser,
            json!({"candidates": [{"content": {"parts": [{"functionCall": {"name": "read_file", "args": {}}}]}}]}),
        );
        let chunks = parse(&mut parser, json!({"candidates": [{"finishReason": "STOP"}]}));
        assert_eq!(chunks, vec![StreamChunk::done(true)]);
    }

    #[test]
    fn test_error_frame() {
        let mut parser = GeminiParser::default();
        let chunks = parse(
            &mut parser,
            json!({"error": {"code": 429, "message": "Resource exhausted", "status": "RESOURCE_EXHAUSTED"}}),
        );
        assert_eq!(chunks, vec![StreamChunk::failure("Resource exhausted")]);
    }

    #[test]
    fn test_blocked_prompt() {
        let mut parser = GeminiParser::default();
        let chunks = parse(&mut parser, json!({"promptFeedback": {"blockReason": "SAFETY"}}));
        assert!(chunks[0].is_complete);
        assert_eq!(chunks[0].error.as_deref(), Some("Prompt blocked: SAFETY"));
    }

    #[test]
    fn test_thought_parts_and_usage_only_frames_are_skipped() {
        let mut parser = GeminiParser::default();
        let chunks = parse(
            &mut parser,
            json!({"candidates": [{"content": {"parts": [{"text": "thinking...", "thought": true}]}}]}),
        );
        assert!(chunks.is_empty());
        assert!(parse(&mut parser, json!({"usageMetadata": {"totalTokenCount": 5}})).is_empty());
    }

    #[test]
    fn test_malformed_frame() {
        let mut parser = GeminiParser::default();
        let chunks = parser.parse_frame("{\"candidates\": [");
        assert!(chunks[0].is_complete);
        assert!(chunks[0].error.as_deref().unwrap().starts_with("Failed to parse chunk:"));
    }

    #[test]
    fn test_build_request() {
        let provider = GeminiProvider::new(&ProviderConfig {
            model: "gemini-2.5-flash".to_string(),
            api_key: Some("gkey".to_string()),
            max_tokens: Some(1024),
            ..Default::default()
        })
        .unwrap();

        let mut conversation = Conversation::new();
        conversation.push(Turn::user("read a.md"));
        let call = FunctionCall::new(AiFunction::ReadFile, Map::new(), "g1");
        conversation.record_function_call(&call);
        conversation.push_function_result(&call, json!("contents"));
        conversation.append_assistant_text("It says contents");

        let tools = vec![ToolDefinition::new("read_file", "Read a file", json!({"type": "object"}))];
        let request = provider.build_request(&conversation, "sys", &tools);

        assert_eq!(
            request.url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:streamGenerateContent?alt=sse"
        );
        assert_eq!(request.headers, vec![("x-goog-api-key".to_string(), "gkey".to_string())]);

        let body = request.body;
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], json!("sys"));
        assert_eq!(body["generationConfig"]["maxOutputTokens"], json!(1024));
        assert_eq!(body["tools"][0]["functionDeclarations"][0]["name"], json!("read_file"));

        let contents = body["contents"].as_array().unwrap();
        let roles: Vec<&str> = contents.iter().map(|c| c["role"].as_str().unwrap()).collect();
        assert_eq!(roles, vec!["user", "model", "user", "model"]);
        assert_eq!(contents[1]["parts"][0]["functionCall"]["name"], json!("read_file"));
        assert_eq!(
            contents[2]["parts"][0]["functionResponse"]["response"],
            json!({"result": "contents"})
        );
    }
}
