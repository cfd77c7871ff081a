//! Streaming types shared by every provider

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::agents::domain::FunctionCall;

/// Text emitted when a stream is cancelled by its caller
pub const CANCELLED_TEXT: &str = "Request has been cancelled";

/// One increment of provider output, normalised across providers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Text delta (may be empty)
    #[serde(default)]
    pub text: String,
    /// Set on the single chunk that closes a stream
    #[serde(default)]
    pub is_complete: bool,
    /// A complete function call requested by the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    /// The model expects another round after this response
    #[serde(default)]
    pub should_continue: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamChunk {
    /// Create a text delta chunk
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_complete: false,
            function_call: None,
            should_continue: false,
            error: None,
        }
    }

    /// Create a chunk carrying a decoded function call
    pub fn function_call(call: FunctionCall) -> Self {
        Self {
            text: String::new(),
            is_complete: false,
            function_call: Some(call),
            should_continue: true,
            error: None,
        }
    }

    /// Create an empty, non-terminal chunk
    pub fn empty() -> Self {
        Self::text("")
    }

    /// Create the terminal chunk of a stream
    pub fn done(should_continue: bool) -> Self {
        Self {
            is_complete: true,
            should_continue,
            ..Self::empty()
        }
    }

    /// Create a terminal error chunk
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            is_complete: true,
            error: Some(error.into()),
            ..Self::empty()
        }
    }

    /// Create the terminal chunk reported on cancellation
    pub fn cancelled() -> Self {
        Self {
            text: CANCELLED_TEXT.to_string(),
            is_complete: true,
            ..Self::empty()
        }
    }

    pub fn has_text(&self) -> bool {
        !self.text.is_empty()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Translates one provider frame into canonical chunks.
///
/// A parser is created per stream and may keep state across frames. It must
/// never panic: malformed input becomes a terminal error chunk.
pub trait FrameParser: Send {
    fn parse_frame(&mut self, frame: &str) -> Vec<StreamChunk>;
}

/// Ordered stream of chunks produced by a background task
pub struct ChunkStream {
    receiver: mpsc::Receiver<StreamChunk>,
}

impl ChunkStream {
    /// Create a channel pair for building a chunk stream
    pub fn channel(buffer: usize) -> (ChunkSender, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (ChunkSender { sender: tx }, Self { receiver: rx })
    }

    /// Receive the next chunk
    pub async fn next_chunk(&mut self) -> Option<StreamChunk> {
        self.receiver.recv().await
    }

    /// Drain the stream, returning every chunk in order
    pub async fn collect_all(mut self) -> Vec<StreamChunk> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.receiver.recv().await {
            chunks.push(chunk);
        }
        chunks
    }
}

impl Stream for ChunkStream {
    type Item = StreamChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_recv(cx)
    }
}

/// Sender half for building a chunk stream
#[derive(Clone)]
pub struct ChunkSender {
    sender: mpsc::Sender<StreamChunk>,
}

impl ChunkSender {
    /// Send a chunk
    pub async fn send(&self, chunk: StreamChunk) -> Result<(), mpsc::error::SendError<StreamChunk>> {
        self.sender.send(chunk).await
    }

    /// Check if the receiver is closed
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
