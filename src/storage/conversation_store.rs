//! Conversation Store
//!
//! Persistence seam for the few effects a request leaves behind: the
//! conversation title and the per-conversation todo list.
//!
//! ## Implementations
//! - `InMemoryConversationStore` - default store, also used by tests

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cascade_agent_core::TodoItem;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::utils::error::AppResult;

/// Stored conversation header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// ISO 8601 timestamp of the last update.
    pub updated_at: String,
}

impl Conversation {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Whether a non-blank title is already set.
    pub fn has_title(&self) -> bool {
        self.title
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Partial update applied by `update_conversation`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationUpdate {
    pub title: Option<String>,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_conversation(&self, conversation_id: &str) -> AppResult<Option<Conversation>>;

    /// Apply `update`, creating the conversation if it does not exist.
    async fn update_conversation(
        &self,
        conversation_id: &str,
        update: ConversationUpdate,
    ) -> AppResult<Conversation>;

    async fn load_todos(&self, conversation_id: &str) -> AppResult<Vec<TodoItem>>;

    async fn save_todos(&self, conversation_id: &str, todos: &[TodoItem]) -> AppResult<()>;
}

/// In-memory implementation of `ConversationStore`.
///
/// Data is lost when the process exits.
#[derive(Debug, Default, Clone)]
pub struct InMemoryConversationStore {
    conversations: Arc<RwLock<HashMap<String, Conversation>>>,
    todos: Arc<RwLock<HashMap<String, Vec<TodoItem>>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get_conversation(&self, conversation_id: &str) -> AppResult<Option<Conversation>> {
        Ok(self.conversations.read().await.get(conversation_id).cloned())
    }

    async fn update_conversation(
        &self,
        conversation_id: &str,
        update: ConversationUpdate,
    ) -> AppResult<Conversation> {
        let mut conversations = self.conversations.write().await;
        let entry = conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| Conversation::new(conversation_id));
        if let Some(title) = update.title {
            entry.title = Some(title);
        }
        entry.updated_at = chrono::Utc::now().to_rfc3339();
        Ok(entry.clone())
    }

    async fn load_todos(&self, conversation_id: &str) -> AppResult<Vec<TodoItem>> {
        Ok(self
            .todos
            .read()
            .await
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_todos(&self, conversation_id: &str, todos: &[TodoItem]) -> AppResult<()> {
        self.todos
            .write()
            .await
            .insert(conversation_id.to_string(), todos.to_vec());
        Ok(())
    }
}
