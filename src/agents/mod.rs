//! Streaming chat agent with tool use
//!
//! ## Architecture
//!
//! - `domain/` - Conversation, turns and function call types
//! - `llm/` - Provider encoders, frame parsers and the stream orchestrator
//! - `core/` - Agent loop, chat sessions and function execution
//! - `memory/` - Conversation persistence backends
//! - `limiter` - Counting semaphore for request limits
//! - `naming` - Conversation titles

pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod limiter;
pub mod llm;
pub mod memory;
pub mod naming;

// Re-export commonly used types
pub use config::*;
pub use core::{AgentEvent, AgentLoop, ChatSession, FunctionExecutor, RoundOutcome};
pub use domain::*;
pub use error::*;
pub use limiter::Semaphore;
