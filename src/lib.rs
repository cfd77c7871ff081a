//! # Parley - streaming chat with tool use
//!
//! Parley talks to OpenAI (Responses API), Anthropic (Messages API) and
//! Gemini models over server-sent events, normalises every provider's
//! stream into one chunk type, and runs a multi-round loop that executes
//! the functions the model asks for until it produces an answer.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use parley::config::Settings;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Load configuration
//!     let settings = Settings::new()?;
//!     println!("Using {}", settings.provider.model);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **agents::llm**: providers, frame parsers and the stream orchestrator
//! - **agents::core**: agent loop, sessions and function execution
//! - **agents::memory**: conversation persistence
//! - **config**: layered settings and validation

pub mod agents;
pub mod cli;
pub mod config;
