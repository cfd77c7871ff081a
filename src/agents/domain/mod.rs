//! Domain types for the chat agent
//!
//! Conversations, turns and the function calls that move between the model
//! and the executor.

mod conversation;
mod function_call;

pub use conversation::*;
pub use function_call::*;
