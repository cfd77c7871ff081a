//! HTTP transport used to reach providers

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;

use crate::agents::error::{LlmError, LlmResult};

/// Body of a provider response, read incrementally
pub type ByteStream = Pin<Box<dyn Stream<Item = LlmResult<Bytes>> + Send>>;

/// An outgoing JSON POST
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    /// Extra headers; `Content-Type: application/json` is always added
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl HttpRequest {
    pub fn new(url: impl Into<String>, body: Value) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Response head plus an optional body stream
pub struct HttpResponse {
    pub status: u16,
    /// Reason phrase for `status`
    pub reason: String,
    pub body: Option<ByteStream>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Read the whole body as (lossy) UTF-8 text
    pub async fn text(self) -> LlmResult<String> {
        let Some(mut body) = self.body else {
            return Ok(String::new());
        };
        let mut bytes = Vec::new();
        while let Some(chunk) = body.next().await {
            bytes.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// Sends a request and hands back the response head and body stream
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, request: &HttpRequest) -> LlmResult<HttpResponse>;
}

/// `reqwest` backed transport
#[derive(Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, request: &HttpRequest) -> LlmResult<HttpResponse> {
        let mut builder = self
            .client
            .post(&request.url)
            .header("Content-Type", "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.json(&request.body).send().await?;

        let status = response.status();
        let body: ByteStream = Box::pin(response.bytes_stream().map(|read| read.map_err(LlmError::from)));

        Ok(HttpResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
            body: Some(body),
        })
    }
}
