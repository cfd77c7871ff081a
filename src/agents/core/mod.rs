//! Multi-round tool-use loop
//!
//! - `AgentLoop`: drives provider rounds until the model stops asking for
//!   functions, executing each requested call as it streams in
//! - `ChatSession`: one conversation, at most one active round
//! - `FunctionExecutor`: the seam where requested functions actually run

mod agent_loop;
mod executor;
mod session;

pub use agent_loop::AgentLoop;
pub use executor::{FunctionExecutor, NoFunctions, VaultExecutor};
pub use session::ChatSession;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agents::domain::{AiFunction, FunctionCall};

/// How a submitted prompt ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RoundOutcome {
    /// The model produced a final answer
    Completed,
    /// The caller cancelled; partial output is kept
    Aborted,
    /// The provider reported an error before any function ran
    Failed { error: String },
    /// The model kept requesting functions past the round cap
    RoundLimitReached { rounds: u32 },
    /// The prompt ran past its time budget
    TimedOut,
}

impl RoundOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for RoundOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Aborted => write!(f, "aborted"),
            Self::Failed { error } => write!(f, "failed: {}", error),
            Self::RoundLimitReached { rounds } => write!(f, "stopped after {} rounds", rounds),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Progress published while a loop holds the conversation
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// A provider request is about to be sent
    RoundStarted { round: u32 },
    /// Text delta appended to the assistant turn
    Text(String),
    /// The model requested a function
    FunctionCall(FunctionCall),
    /// A function finished; errors arrive as `{"error": ...}`
    FunctionResult {
        call_id: String,
        name: AiFunction,
        result: Value,
    },
    /// The prompt is settled
    Finished(RoundOutcome),
}
