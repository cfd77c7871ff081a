//! Shared helpers for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use parley::agents::config::{AgentConfig, ProviderConfig};
use parley::agents::core::{AgentLoop, FunctionExecutor};
use parley::agents::domain::{AiFunction, FunctionCall, ToolDefinition};
use parley::agents::error::{LlmError, LlmResult};
use parley::agents::llm::{
    AnthropicProvider, GeminiProvider, HttpRequest, HttpResponse, OpenAiProvider, Provider, StreamOrchestrator,
    Transport,
};

/// One scripted provider response
pub enum Reply {
    /// `data:` frames, then end of body
    Frames(Vec<String>),
    /// `data:` frames, then a body that never ends
    FramesThenHang(Vec<String>),
    /// Non-success status with a text body
    Status(u16, &'static str, &'static str),
}

/// Transport that answers requests from a script and records them
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Wait until `count` requests have been made
    pub async fn wait_for_requests(&self, count: usize) {
        while self.request_count() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

fn sse(frames: Vec<String>) -> Vec<LlmResult<Bytes>> {
    frames
        .into_iter()
        .map(|frame| Ok(Bytes::from(format!("data: {}\n\n", frame))))
        .collect()
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn post(&self, request: &HttpRequest) -> LlmResult<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self.replies.lock().unwrap().pop_front();

        match reply {
            Some(Reply::Frames(frames)) => Ok(HttpResponse {
                status: 200,
                reason: "OK".to_string(),
                body: Some(futures::stream::iter(sse(frames)).boxed()),
            }),
            Some(Reply::FramesThenHang(frames)) => Ok(HttpResponse {
                status: 200,
                reason: "OK".to_string(),
                body: Some(
                    futures::stream::iter(sse(frames))
                        .chain(futures::stream::pending())
                        .boxed(),
                ),
            }),
            Some(Reply::Status(status, reason, body)) => Ok(HttpResponse {
                status,
                reason: reason.to_string(),
                body: Some(futures::stream::iter(vec![Ok(Bytes::from_static(body.as_bytes()))]).boxed()),
            }),
            None => Err(LlmError::Network("No scripted reply left".to_string())),
        }
    }
}

/// Executor that records every call and answers from a table
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<FunctionCall>>,
    results: HashMap<String, Result<Value, String>>,
    block: bool,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer calls to `name` with `result`
    pub fn answer(mut self, name: &str, result: Result<Value, String>) -> Self {
        self.results.insert(name.to_string(), result);
        self
    }

    /// Never finish a call until cancelled
    pub fn blocking(mut self) -> Self {
        self.block = true;
        self
    }

    pub fn calls(&self) -> Vec<FunctionCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FunctionExecutor for RecordingExecutor {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition::new(
            AiFunction::ListVaultFiles.as_str(),
            "List files",
            json!({ "type": "object", "properties": {} }),
        )]
    }

    async fn execute(&self, call: &FunctionCall, cancel: &CancellationToken) -> Result<Value, String> {
        self.calls.lock().unwrap().push(call.clone());
        if self.block {
            cancel.cancelled().await;
            return Err("Cancelled".to_string());
        }
        self.results
            .get(call.name.as_str())
            .cloned()
            .unwrap_or_else(|| Ok(json!({ "files": ["inbox.md", "todo.md"] })))
    }
}

pub fn provider_config(model: &str) -> ProviderConfig {
    ProviderConfig {
        model: model.to_string(),
        api_key: Some("test-key".to_string()),
        ..Default::default()
    }
}

pub fn openai() -> Arc<dyn Provider> {
    Arc::new(OpenAiProvider::new(&provider_config("gpt-4o")).unwrap())
}

pub fn anthropic() -> Arc<dyn Provider> {
    Arc::new(AnthropicProvider::new(&provider_config("claude-sonnet-4-5")).unwrap())
}

pub fn gemini() -> Arc<dyn Provider> {
    Arc::new(GeminiProvider::new(&provider_config("gemini-2.5-flash")).unwrap())
}

pub fn agent_config() -> AgentConfig {
    AgentConfig {
        system_prompt: "You are a test assistant.".to_string(),
        timeout_seconds: 0,
        ..Default::default()
    }
}

pub fn agent(
    provider: Arc<dyn Provider>,
    transport: Arc<ScriptedTransport>,
    executor: Arc<dyn FunctionExecutor>,
    config: AgentConfig,
) -> AgentLoop {
    AgentLoop::new(provider, StreamOrchestrator::new(transport), executor, config)
}

// OpenAI Responses frames

pub fn openai_text(delta: &str) -> String {
    json!({ "type": "response.output_text.delta", "delta": delta }).to_string()
}

/// Frames announcing and completing one function call
pub fn openai_call(item_id: &str, call_id: &str, name: &str, arguments: Value) -> Vec<String> {
    vec![
        json!({
            "type": "response.output_item.added",
            "item": { "type": "function_call", "id": item_id, "call_id": call_id, "name": name }
        })
        .to_string(),
        json!({
            "type": "response.function_call_arguments.delta",
            "item_id": item_id,
            "delta": arguments.to_string()
        })
        .to_string(),
        json!({
            "type": "response.function_call_arguments.done",
            "item_id": item_id,
            "arguments": arguments.to_string()
        })
        .to_string(),
    ]
}

pub fn openai_completed(requested_function: bool) -> String {
    let output = if requested_function {
        json!([{ "type": "function_call" }])
    } else {
        json!([{ "type": "message" }])
    };
    json!({ "type": "response.completed", "response": { "output": output } }).to_string()
}

/// A whole OpenAI answer made of text deltas
pub fn openai_answer(parts: &[&str]) -> Reply {
    let mut frames: Vec<String> = parts.iter().map(|p| openai_text(p)).collect();
    frames.push(openai_completed(false));
    Reply::Frames(frames)
}
