//! File-based conversation store

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tracing::warn;

use super::{paginate, ConversationStore};
use crate::agents::domain::{Conversation, ConversationSummary};
use crate::agents::error::{AgentError, AgentResult};

/// Stores each conversation as `<id>.json` under a base directory
pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    /// Create a new file store
    pub fn new(base_path: impl Into<PathBuf>) -> AgentResult<Self> {
        let base_path = base_path.into();

        std::fs::create_dir_all(&base_path)
            .map_err(|e| AgentError::Memory(format!("Failed to create directory: {}", e)))?;

        Ok(Self { base_path })
    }

    fn conversation_path(&self, conversation_id: &str) -> AgentResult<PathBuf> {
        if conversation_id.is_empty()
            || conversation_id.contains(|c: char| c == '/' || c == '\\')
            || conversation_id.starts_with('.')
        {
            return Err(AgentError::Memory(format!(
                "Invalid conversation id: {}",
                conversation_id
            )));
        }
        Ok(self.base_path.join(format!("{}.json", conversation_id)))
    }
}

#[async_trait]
impl ConversationStore for FileStore {
    async fn save(&self, conversation: &Conversation) -> AgentResult<()> {
        let path = self.conversation_path(&conversation.id)?;
        let content = serde_json::to_string_pretty(conversation)?;

        // Readers only ever see a complete file
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .await
            .map_err(|e| AgentError::Memory(format!("Failed to write conversation file: {}", e)))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| AgentError::Memory(format!("Failed to write conversation file: {}", e)))?;

        Ok(())
    }

    async fn load(&self, conversation_id: &str) -> AgentResult<Option<Conversation>> {
        let path = self.conversation_path(conversation_id)?;

        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| AgentError::Memory(format!("Failed to read conversation file: {}", e)))?;

        let conversation: Conversation = serde_json::from_str(&content)?;
        Ok(Some(conversation))
    }

    async fn list(&self, limit: usize, offset: usize) -> AgentResult<Vec<ConversationSummary>> {
        let mut entries = fs::read_dir(&self.base_path)
            .await
            .map_err(|e| AgentError::Memory(format!("Failed to read directory: {}", e)))?;

        let mut summaries = Vec::new();

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AgentError::Memory(format!("Failed to read directory entry: {}", e)))?
        {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }

            match fs::read_to_string(&path).await {
                Ok(content) => match serde_json::from_str::<Conversation>(&content) {
                    Ok(conversation) => summaries.push(conversation.to_summary()),
                    Err(e) => warn!("Skipping unreadable conversation {}: {}", path.display(), e),
                },
                Err(e) => warn!("Failed to read {}: {}", path.display(), e),
            }
        }

        Ok(paginate(summaries, limit, offset))
    }
}
