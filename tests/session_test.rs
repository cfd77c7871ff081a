mod common;

use async_trait::async_trait;
use common::*;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use parley::agents::core::{ChatSession, RoundOutcome};
use parley::agents::domain::{Conversation, Role};
use parley::agents::error::LlmResult;
use parley::agents::memory::{ConversationStore, InMemoryStore};
use parley::agents::naming::{ConversationNamer, TitleGenerator};

struct FixedTitle;

#[async_trait]
impl TitleGenerator for FixedTitle {
    async fn generate(&self, first_prompt: &str) -> LlmResult<String> {
        Ok(format!("\"Notes about {}\"", first_prompt))
    }
}

#[tokio::test]
async fn test_new_prompt_cancels_running_one() {
    let transport = ScriptedTransport::new(vec![
        Reply::FramesThenHang(vec![openai_text("Once upon")]),
        openai_answer(&["Sure."]),
    ]);
    let agent = Arc::new(agent(openai(), transport.clone(), Arc::new(RecordingExecutor::new()), agent_config()));
    let session = Arc::new(ChatSession::new(agent, Conversation::new(), CancellationToken::new()));

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.submit("tell me a story", None).await })
    };
    transport.wait_for_requests(1).await;
    assert!(session.is_running());

    let second = session.submit("never mind", None).await;
    assert_eq!(first.await.unwrap(), RoundOutcome::Aborted);
    assert_eq!(second, RoundOutcome::Completed);
    assert!(!session.is_running());

    let conversation = session.conversation().await;
    let texts: Vec<_> = conversation.turns.iter().map(|t| (t.role, t.text.as_str())).collect();
    assert_eq!(
        texts,
        vec![
            (Role::User, "tell me a story"),
            (Role::Assistant, "Once upon"),
            (Role::User, "never mind"),
            (Role::Assistant, "Sure."),
        ]
    );
}

#[tokio::test]
async fn test_stop_cancels_active_round() {
    let transport = ScriptedTransport::new(vec![Reply::FramesThenHang(vec![])]);
    let agent = Arc::new(agent(openai(), transport.clone(), Arc::new(RecordingExecutor::new()), agent_config()));
    let session = Arc::new(ChatSession::new(agent, Conversation::new(), CancellationToken::new()));

    let running = {
        let session = session.clone();
        tokio::spawn(async move { session.submit("hello", None).await })
    };
    transport.wait_for_requests(1).await;

    session.stop();
    assert_eq!(running.await.unwrap(), RoundOutcome::Aborted);

    // Stopping an idle session does nothing
    session.stop();
    assert_eq!(session.conversation().await.turns.len(), 1);
}

#[tokio::test]
async fn test_parent_token_cancels_session() {
    let transport = ScriptedTransport::new(vec![Reply::FramesThenHang(vec![])]);
    let agent = Arc::new(agent(openai(), transport.clone(), Arc::new(RecordingExecutor::new()), agent_config()));
    let shutdown = CancellationToken::new();
    let session = Arc::new(ChatSession::new(agent, Conversation::new(), shutdown.clone()));

    let running = {
        let session = session.clone();
        tokio::spawn(async move { session.submit("hello", None).await })
    };
    transport.wait_for_requests(1).await;

    shutdown.cancel();
    assert_eq!(running.await.unwrap(), RoundOutcome::Aborted);
}

#[tokio::test]
async fn test_first_completed_prompt_names_conversation() {
    let store = Arc::new(InMemoryStore::new());
    let transport = ScriptedTransport::new(vec![openai_answer(&["Hi!"]), openai_answer(&["Again!"])]);
    let agent = Arc::new(
        agent(openai(), transport, Arc::new(RecordingExecutor::new()), agent_config()).with_store(store.clone()),
    );
    let namer = Arc::new(ConversationNamer::new(Arc::new(FixedTitle), store.clone()));
    let session = ChatSession::new(agent, Conversation::new(), CancellationToken::new()).with_namer(namer);

    assert_eq!(session.submit("rust", None).await, RoundOutcome::Completed);
    session.naming_finished().await;

    let conversation = session.conversation().await;
    assert_eq!(conversation.title, "Notes about rust");
    let saved = store.load(&conversation.id).await.unwrap().unwrap();
    assert_eq!(saved.title, "Notes about rust");

    // Only the first prompt triggers naming
    session.submit("more", None).await;
    session.naming_finished().await;
    assert_eq!(session.conversation().await.title, "Notes about rust");
}
