//! Turns a provider's SSE byte stream into canonical chunks
//!
//! The orchestrator owns everything between "send the request" and "hand a
//! chunk to the caller": status handling, line framing, cancellation and the
//! guarantee that every stream ends with exactly one terminal chunk.

use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::stream::{ChunkSender, ChunkStream, FrameParser, StreamChunk};
use super::transport::{HttpRequest, Transport};

const CHANNEL_BUFFER: usize = 64;

/// Drives provider streams over a shared transport
#[derive(Clone)]
pub struct StreamOrchestrator {
    transport: Arc<dyn Transport>,
}

impl StreamOrchestrator {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    /// Start streaming `request`, parsing frames with `parser`.
    ///
    /// The returned stream always ends with one chunk whose `is_complete` is
    /// set. Errors and cancellation are reported through that chunk rather
    /// than as a failure of the stream itself.
    pub fn stream(
        &self,
        request: HttpRequest,
        parser: Box<dyn FrameParser>,
        cancel: Option<CancellationToken>,
    ) -> ChunkStream {
        let (sender, stream) = ChunkStream::channel(CHANNEL_BUFFER);
        let transport = self.transport.clone();
        let cancel = cancel.unwrap_or_default();

        tokio::spawn(async move {
            let terminal = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Stream to {} cancelled", request.url);
                    StreamChunk::cancelled()
                }
                terminal = pump(transport.as_ref(), &request, parser, &sender) => terminal,
            };
            let _ = sender.send(terminal).await;
        });

        stream
    }
}

/// Forward non-terminal chunks and return the terminal one
async fn pump(
    transport: &dyn Transport,
    request: &HttpRequest,
    mut parser: Box<dyn FrameParser>,
    sender: &ChunkSender,
) -> StreamChunk {
    let response = match transport.post(request).await {
        Ok(response) => response,
        Err(e) => {
            warn!("Request to {} failed: {}", request.url, e);
            return StreamChunk::failure(e.to_string());
        }
    };

    if !response.is_success() {
        let status = response.status;
        let reason = response.reason.clone();
        let body = response.text().await.unwrap_or_else(|e| e.to_string());
        warn!("Provider returned {} {}", status, reason);
        return StreamChunk::failure(format!("{} {} - {}", status, reason, body));
    }

    let Some(mut body) = response.body else {
        return StreamChunk::failure("Response body is not readable");
    };

    let mut framer = LineFramer::default();
    while let Some(read) = body.next().await {
        let bytes = match read {
            Ok(bytes) => bytes,
            Err(e) => return StreamChunk::failure(e.to_string()),
        };

        for frame in framer.push(&bytes) {
            for chunk in parser.parse_frame(&frame) {
                if chunk.is_complete {
                    return chunk;
                }
                if sender.send(chunk).await.is_err() {
                    // Receiver dropped; nobody is left to read the terminal
                    return StreamChunk::done(false);
                }
            }
        }
    }

    if framer.has_partial() {
        debug!("Discarding unterminated line at end of stream");
    }
    StreamChunk::done(false)
}

/// Splits a byte stream into `data:` frames.
///
/// Bytes are buffered until a newline so multi-byte characters split across
/// reads decode correctly.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    /// Feed bytes and return the payload of every complete `data:` line
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = data_payload(&line) {
                frames.push(frame.to_string());
            }
        }
        frames
    }

    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty()
    }
}

fn data_payload(line: &str) -> Option<&str> {
    let payload = line.trim().strip_prefix("data:")?.trim();
    if payload.is_empty() {
        None
    } else {
        Some(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::error::{LlmError, LlmResult};
    use crate::agents::llm::transport::{ByteStream, HttpResponse};
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Parses `{"text": .., "done": ..}` frames
    struct JsonParser;

    impl FrameParser for JsonParser {
        fn parse_frame(&mut self, frame: &str) -> Vec<StreamChunk> {
            match serde_json::from_str::<Value>(frame) {
                Ok(v) if v["done"] == json!(true) => vec![StreamChunk::done(false)],
                Ok(v) => vec![StreamChunk::text(v["text"].as_str().unwrap_or(""))],
                Err(e) => vec![StreamChunk::failure(format!("Failed to parse chunk: {}", e))],
            }
        }
    }

    enum Reply {
        Body(u16, &'static str, Vec<Vec<u8>>),
        NoBody,
        Fail(String),
        Hang,
    }

    struct FakeTransport {
        reply: Mutex<Option<Reply>>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl FakeTransport {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply: Mutex::new(Some(reply)),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn post(&self, request: &HttpRequest) -> LlmResult<HttpResponse> {
            self.seen.lock().unwrap().push(request.clone());
            let reply = self.reply.lock().unwrap().take().unwrap();
            match reply {
                Reply::Body(status, reason, parts) => {
                    let body: ByteStream = Box::pin(futures::stream::iter(
                        parts.into_iter().map(|p| Ok(Bytes::from(p))),
                    ));
                    Ok(HttpResponse {
                        status,
                        reason: reason.to_string(),
                        body: Some(body),
                    })
                }
                Reply::NoBody => Ok(HttpResponse {
                    status: 200,
                    reason: "OK".to_string(),
                    body: None,
                }),
                Reply::Fail(message) => Err(LlmError::Network(message)),
                Reply::Hang => {
                    futures::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    fn ok_body(parts: &[&str]) -> Reply {
        Reply::Body(200, "OK", parts.iter().map(|p| p.as_bytes().to_vec()).collect())
    }

    async fn run(reply: Reply, cancel: Option<CancellationToken>) -> Vec<StreamChunk> {
        let orchestrator = StreamOrchestrator::new(FakeTransport::new(reply));
        let request = HttpRequest::new("https://example.test/stream", json!({}));
        orchestrator
            .stream(request, Box::new(JsonParser), cancel)
            .collect_all()
            .await
    }

    #[tokio::test]
    async fn test_streams_text_in_order() {
        let chunks = run(
            ok_body(&[
                "data: {\"text\":\"Hello\"}\n",
                "data: {\"text\":\" World\"}\n",
                "data: {\"done\":true}\n",
            ]),
            None,
        )
        .await;

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "Hello");
        assert_eq!(chunks[1].text, " World");
        assert!(chunks[2].is_complete);
    }

    #[tokio::test]
    async fn test_lines_split_across_reads() {
        let chunks = run(
            ok_body(&["data: {\"te", "xt\":\"joined\"}\n\nda", "ta: {\"done\":true}\n"]),
            None,
        )
        .await;

        assert_eq!(chunks[0].text, "joined");
        assert!(chunks[1].is_complete);
        assert_eq!(chunks.len(), 2);
    }

    #[tokio::test]
    async fn test_multibyte_character_split_across_reads() {
        let line = "data: {\"text\":\"caf\u{e9} \u{1f600}\"}\n".as_bytes().to_vec();
        let split = line.len() - 6;
        let reply = Reply::Body(
            200,
            "OK",
            vec![line[..split].to_vec(), line[split..].to_vec(), b"data: {\"done\":true}\n".to_vec()],
        );

        let chunks = run(reply, None).await;
        assert_eq!(chunks[0].text, "caf\u{e9} \u{1f600}");
    }

    #[tokio::test]
    async fn test_non_data_lines_are_ignored() {
        let chunks = run(
            ok_body(&[
                "event: message\n",
                ": keep-alive\n",
                "data:\n",
                "data:{\"text\":\"x\"}\n",
                "data: {\"done\":true}\n",
            ]),
            None,
        )
        .await;

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "x");
    }

    #[tokio::test]
    async fn test_stops_at_first_terminal_chunk() {
        let chunks = run(
            ok_body(&["data: {\"done\":true}\n", "data: {\"text\":\"late\"}\n", "data: {\"done\":true}\n"]),
            None,
        )
        .await;

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_complete);
    }

    #[tokio::test]
    async fn test_synthetic_terminal_when_stream_ends_early() {
        let chunks = run(ok_body(&["data: {\"text\":\"a\"}\n", "data: {\"text\":\"trailing\"}"]), None).await;

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "a");
        assert_eq!(chunks[1], StreamChunk::done(false));
    }

    #[tokio::test]
    async fn test_malformed_frame_is_terminal_error() {
        let chunks = run(ok_body(&["data: {not json\n", "data: {\"text\":\"after\"}\n"]), None).await;

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_complete);
        assert!(chunks[0].error.as_deref().unwrap().starts_with("Failed to parse chunk:"));
    }

    #[tokio::test]
    async fn test_non_success_status() {
        let reply = Reply::Body(404, "Not Found", vec![b"Resource not found".to_vec()]);
        let chunks = run(reply, None).await;

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_complete);
        assert_eq!(chunks[0].error.as_deref(), Some("404 Not Found - Resource not found"));
    }

    #[tokio::test]
    async fn test_missing_body() {
        let chunks = run(Reply::NoBody, None).await;

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].error.as_deref(), Some("Response body is not readable"));
    }

    #[tokio::test]
    async fn test_transport_failure_becomes_terminal_error() {
        let chunks = run(Reply::Fail("Network connection failed".to_string()), None).await;

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_complete);
        assert!(chunks[0].error.as_deref().unwrap().contains("Network connection failed"));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_response() {
        let cancel = CancellationToken::new();
        let orchestrator = StreamOrchestrator::new(FakeTransport::new(Reply::Hang));
        let stream = orchestrator.stream(
            HttpRequest::new("https://example.test", json!({})),
            Box::new(JsonParser),
            Some(cancel.clone()),
        );

        cancel.cancel();
        let chunks = stream.collect_all().await;
        assert_eq!(chunks, vec![StreamChunk::cancelled()]);
    }

    #[tokio::test]
    async fn test_request_is_forwarded() {
        let transport = FakeTransport::new(ok_body(&["data: {\"done\":true}\n"]));
        let orchestrator = StreamOrchestrator::new(transport.clone());
        let request = HttpRequest::new("https://example.test/v1", json!({"stream": true}))
            .with_header("x-api-key", "secret");

        orchestrator.stream(request, Box::new(JsonParser), None).collect_all().await;

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].url, "https://example.test/v1");
        assert_eq!(seen[0].headers, vec![("x-api-key".to_string(), "secret".to_string())]);
        assert_eq!(seen[0].body, json!({"stream": true}));
    }

    #[test]
    fn test_framer_keeps_partial_line() {
        let mut framer = LineFramer::default();
        assert!(framer.push(b"data: {\"a\"").is_empty());
        assert!(framer.has_partial());
        assert_eq!(framer.push(b":1}\r\n"), vec!["{\"a\":1}".to_string()]);
        assert!(!framer.has_partial());
    }
}
