//! In-memory conversation store

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{paginate, ConversationStore};
use crate::agents::domain::{Conversation, ConversationSummary};
use crate::agents::error::AgentResult;

/// In-memory conversation store
#[derive(Default)]
pub struct InMemoryStore {
    conversations: Arc<RwLock<HashMap<String, Conversation>>>,
}

impl InMemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn save(&self, conversation: &Conversation) -> AgentResult<()> {
        let mut conversations = self.conversations.write().await;
        conversations.insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn load(&self, conversation_id: &str) -> AgentResult<Option<Conversation>> {
        let conversations = self.conversations.read().await;
        Ok(conversations.get(conversation_id).cloned())
    }

    async fn list(&self, limit: usize, offset: usize) -> AgentResult<Vec<ConversationSummary>> {
        let conversations = self.conversations.read().await;
        let summaries = conversations.values().map(|c| c.to_summary()).collect();
        Ok(paginate(summaries, limit, offset))
    }
}
