//! Single-flight chat session over one conversation

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{AgentEvent, AgentLoop, RoundOutcome};
use crate::agents::domain::{Conversation, Turn};
use crate::agents::naming::ConversationNamer;

struct ActiveRound {
    id: u64,
    cancel: CancellationToken,
}

/// Owns one conversation and lets at most one prompt run against it.
///
/// Submitting while a prompt is running cancels the running one first.
pub struct ChatSession {
    agent: Arc<AgentLoop>,
    conversation: Arc<Mutex<Conversation>>,
    parent: CancellationToken,
    active: StdMutex<Option<ActiveRound>>,
    next_round: AtomicU64,
    namer: Option<Arc<ConversationNamer>>,
    named: AtomicBool,
    naming: StdMutex<Option<JoinHandle<()>>>,
}

impl ChatSession {
    /// Every round runs under a child of `parent`
    pub fn new(agent: Arc<AgentLoop>, conversation: Conversation, parent: CancellationToken) -> Self {
        let named = !conversation.turns.is_empty();
        Self {
            agent,
            conversation: Arc::new(Mutex::new(conversation)),
            parent,
            active: StdMutex::new(None),
            next_round: AtomicU64::new(0),
            namer: None,
            named: AtomicBool::new(named),
            naming: StdMutex::new(None),
        }
    }

    /// Title the conversation after its first completed prompt
    pub fn with_namer(mut self, namer: Arc<ConversationNamer>) -> Self {
        self.namer = Some(namer);
        self
    }

    /// Add `prompt` as a user turn and run the agent loop to an outcome
    pub async fn submit(&self, prompt: &str, events: Option<&mpsc::Sender<AgentEvent>>) -> RoundOutcome {
        let cancel = self.parent.child_token();
        let id = self.next_round.fetch_add(1, Ordering::Relaxed);
        let previous = lock(&self.active).replace(ActiveRound {
            id,
            cancel: cancel.clone(),
        });
        if let Some(previous) = previous {
            debug!("Cancelling round {} for a new prompt", previous.id);
            previous.cancel.cancel();
        }

        let outcome = {
            let mut conversation = self.conversation.lock().await;
            if cancel.is_cancelled() {
                // Superseded before it started
                RoundOutcome::Aborted
            } else {
                conversation.push(Turn::user(prompt));
                self.agent.run(&mut conversation, &cancel, events).await
            }
        };

        {
            let mut active = lock(&self.active);
            if active.as_ref().map_or(false, |round| round.id == id) {
                *active = None;
            }
        }

        if outcome.is_completed() {
            self.start_naming();
        }
        outcome
    }

    /// Cancel the running prompt, if any
    pub fn stop(&self) {
        if let Some(active) = lock(&self.active).take() {
            active.cancel.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.active).is_some()
    }

    /// Copy of the conversation as it stands once no prompt holds it
    pub async fn conversation(&self) -> Conversation {
        self.conversation.lock().await.clone()
    }

    /// Wait for a naming request started by `submit`
    pub async fn naming_finished(&self) {
        let handle = lock(&self.naming).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Naming task failed: {}", e);
            }
        }
    }

    fn start_naming(&self) {
        let Some(namer) = self.namer.clone() else {
            return;
        };
        if self.named.swap(true, Ordering::SeqCst) {
            return;
        }

        let conversation = self.conversation.clone();
        let cancel = self.parent.child_token();
        let handle = tokio::spawn(async move {
            if let Err(e) = namer.name(&conversation, &cancel).await {
                warn!("Failed to generate name: {}", e);
            }
        });
        *lock(&self.naming) = Some(handle);
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
