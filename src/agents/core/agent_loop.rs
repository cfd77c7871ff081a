//! Agent loop: request, stream, execute functions, repeat

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{AgentEvent, FunctionExecutor, RoundOutcome};
use crate::agents::config::AgentConfig;
use crate::agents::domain::{Conversation, FunctionCall, ToolDefinition};
use crate::agents::limiter::Semaphore;
use crate::agents::llm::{Provider, StreamChunk, StreamOrchestrator};
use crate::agents::memory::ConversationStore;

/// What one round decided
enum RoundStep {
    Continue,
    Finish(RoundOutcome),
}

/// Drives provider rounds for one conversation at a time
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    orchestrator: StreamOrchestrator,
    executor: Arc<dyn FunctionExecutor>,
    store: Option<Arc<dyn ConversationStore>>,
    limiter: Option<Arc<Semaphore>>,
    config: AgentConfig,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        orchestrator: StreamOrchestrator,
        executor: Arc<dyn FunctionExecutor>,
        config: AgentConfig,
    ) -> Self {
        Self {
            provider,
            orchestrator,
            executor,
            store: None,
            limiter: None,
            config,
        }
    }

    /// Persist the conversation whenever a prompt settles
    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Share a request limiter with other loops
    pub fn with_limiter(mut self, limiter: Arc<Semaphore>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run rounds until the model gives a final answer or something stops it.
    ///
    /// The conversation is expected to end with the user's prompt. Turns are
    /// only ever appended; an aborted or failed prompt keeps what streamed.
    pub async fn run(
        &self,
        conversation: &mut Conversation,
        cancel: &CancellationToken,
        events: Option<&mpsc::Sender<AgentEvent>>,
    ) -> RoundOutcome {
        let token = cancel.child_token();

        let outcome = match self.config.timeout_seconds {
            0 => self.run_rounds(conversation, &token, events).await,
            secs => {
                // The deadline cancels the rounds rather than dropping them, so
                // an interrupted function call still gets its tool turn
                let mut timed_out = false;
                let outcome = {
                    let deadline = tokio::time::sleep(Duration::from_secs(secs));
                    let rounds = self.run_rounds(conversation, &token, events);
                    tokio::pin!(deadline);
                    tokio::pin!(rounds);
                    loop {
                        tokio::select! {
                            outcome = &mut rounds => break outcome,
                            _ = &mut deadline, if !timed_out => {
                                timed_out = true;
                                token.cancel();
                            }
                        }
                    }
                };
                if timed_out {
                    warn!("Conversation {} timed out after {}s", conversation.id, secs);
                    RoundOutcome::TimedOut
                } else {
                    outcome
                }
            }
        };

        info!("Conversation {} {}", conversation.id, outcome);
        self.persist(conversation).await;
        emit(events, &token, AgentEvent::Finished(outcome.clone())).await;
        outcome
    }

    async fn run_rounds(
        &self,
        conversation: &mut Conversation,
        cancel: &CancellationToken,
        events: Option<&mpsc::Sender<AgentEvent>>,
    ) -> RoundOutcome {
        let tools = self.executor.definitions();
        let instructions = self.config.instructions();

        for round in 1..=self.config.max_rounds {
            if cancel.is_cancelled() {
                return RoundOutcome::Aborted;
            }
            emit(events, cancel, AgentEvent::RoundStarted { round }).await;

            let step = match self.limiter.as_deref() {
                Some(limiter) => {
                    let permit = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return RoundOutcome::Aborted,
                        permit = limiter.permit() => permit,
                    };
                    let Some(_permit) = permit else {
                        return RoundOutcome::Failed {
                            error: "Request limit reached".to_string(),
                        };
                    };
                    self.round(conversation, cancel, events, &instructions, &tools).await
                }
                None => self.round(conversation, cancel, events, &instructions, &tools).await,
            };

            match step {
                RoundStep::Continue => info!("Round {} requested functions, continuing", round),
                RoundStep::Finish(outcome) => return outcome,
            }
        }

        RoundOutcome::RoundLimitReached {
            rounds: self.config.max_rounds,
        }
    }

    /// One provider request and everything streamed back for it
    async fn round(
        &self,
        conversation: &mut Conversation,
        cancel: &CancellationToken,
        events: Option<&mpsc::Sender<AgentEvent>>,
        instructions: &str,
        tools: &[ToolDefinition],
    ) -> RoundStep {
        let request = self.provider.build_request(conversation, instructions, tools);
        let mut stream = self
            .orchestrator
            .stream(request, self.provider.frame_parser(), Some(cancel.clone()));
        let mut calls_executed = 0usize;

        while let Some(chunk) = stream.next_chunk().await {
            if chunk.is_complete {
                return settle(chunk, calls_executed, cancel);
            }
            if chunk.has_text() {
                conversation.append_assistant_text(&chunk.text);
                emit(events, cancel, AgentEvent::Text(chunk.text)).await;
            }
            if let Some(call) = chunk.function_call {
                self.execute_call(conversation, call, cancel, events).await;
                calls_executed += 1;
            }
        }

        RoundStep::Finish(RoundOutcome::Failed {
            error: "Stream ended without a terminal chunk".to_string(),
        })
    }

    /// Record the call, run it and append exactly one tool turn for it
    async fn execute_call(
        &self,
        conversation: &mut Conversation,
        call: FunctionCall,
        cancel: &CancellationToken,
        events: Option<&mpsc::Sender<AgentEvent>>,
    ) {
        conversation.record_function_call(&call);
        emit(events, cancel, AgentEvent::FunctionCall(call.clone())).await;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err("Cancelled".to_string()),
            result = self.executor.execute(&call, cancel) => result,
        };
        let result = match result {
            Ok(value) => value,
            Err(e) => {
                warn!("Function {} ({}) failed: {}", call.name, call.call_id, e);
                json!({ "error": e })
            }
        };

        conversation.push_function_result(&call, result.clone());
        emit(
            events,
            cancel,
            AgentEvent::FunctionResult {
                call_id: call.call_id.clone(),
                name: call.name.clone(),
                result,
            },
        )
        .await;
    }

    async fn persist(&self, conversation: &Conversation) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(conversation).await {
                warn!("Failed to save conversation {}: {}", conversation.id, e);
            }
        }
    }
}

/// Decide what the terminal chunk of a round means
fn settle(chunk: StreamChunk, calls_executed: usize, cancel: &CancellationToken) -> RoundStep {
    if cancel.is_cancelled() {
        return RoundStep::Finish(RoundOutcome::Aborted);
    }
    if let Some(error) = chunk.error {
        if calls_executed == 0 {
            return RoundStep::Finish(RoundOutcome::Failed { error });
        }
        // The function results still need an answer from the model
        warn!("Stream failed after {} function calls: {}", calls_executed, error);
        return RoundStep::Continue;
    }
    if calls_executed > 0 || chunk.should_continue {
        RoundStep::Continue
    } else {
        RoundStep::Finish(RoundOutcome::Completed)
    }
}

/// Deliver an event, giving up on a full channel once the round is cancelled
async fn emit(events: Option<&mpsc::Sender<AgentEvent>>, cancel: &CancellationToken, event: AgentEvent) {
    let Some(events) = events else {
        return;
    };
    tokio::select! {
        biased;
        _ = events.send(event) => {}
        _ = cancel.cancelled() => debug!("Event channel full after cancellation, dropping event"),
    }
}
