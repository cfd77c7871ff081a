//! Conversation persistence
//!
//! Provides storage backends for conversations:
//! - In-memory (default, lost on restart)
//! - File-based (one JSON file per conversation)
//!
//! Conversations are never deleted through this interface.

mod file;
mod in_memory;

pub use file::FileStore;
pub use in_memory::InMemoryStore;

use async_trait::async_trait;
use std::sync::Arc;

use crate::agents::config::{StorageBackend, StorageConfig};
use crate::agents::domain::{Conversation, ConversationSummary};
use crate::agents::error::AgentResult;

/// Trait for conversation storage backends
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Save (insert or replace) a conversation
    async fn save(&self, conversation: &Conversation) -> AgentResult<()>;

    /// Load a conversation by ID
    async fn load(&self, conversation_id: &str) -> AgentResult<Option<Conversation>>;

    /// List conversations, most recently updated first
    async fn list(&self, limit: usize, offset: usize) -> AgentResult<Vec<ConversationSummary>>;

    /// Whether a conversation other than `except_id` already uses `title`
    async fn title_taken(&self, title: &str, except_id: &str) -> AgentResult<bool> {
        Ok(self
            .list(usize::MAX, 0)
            .await?
            .iter()
            .any(|s| s.id != except_id && s.title == title))
    }
}

/// Create a conversation store from configuration
pub fn create_store(config: &StorageConfig) -> AgentResult<Arc<dyn ConversationStore>> {
    match config.backend {
        StorageBackend::InMemory => Ok(Arc::new(InMemoryStore::new())),
        StorageBackend::File => {
            let path = config
                .path
                .clone()
                .unwrap_or_else(|| "data/conversations".to_string());
            Ok(Arc::new(FileStore::new(path)?))
        }
    }
}

/// Sort newest first and apply pagination
pub(crate) fn paginate(mut summaries: Vec<ConversationSummary>, limit: usize, offset: usize) -> Vec<ConversationSummary> {
    summaries.sort_by(|a, b| b.updated.cmp(&a.updated));
    summaries.into_iter().skip(offset).take(limit).collect()
}
