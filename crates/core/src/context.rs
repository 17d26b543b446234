//! Request Context Types
//!
//! Plain-data pieces of the per-request middleware context that do not depend
//! on model or tool collaborators:
//!
//! 1. `Metadata` - open key/value bag for cross-middleware signaling
//! 2. `ChatMode` - which conversation mode the request runs in
//! 3. `AgentPhase` - current phase tag of the planning state machine
//! 4. `TodoItem` - per-conversation task list entry
//!
//! The runtime-bearing `MiddlewareContext` lives in the root crate and embeds these.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Metadata
// ============================================================================

/// Open key/value bag carried through one request.
///
/// Middlewares record decisions here (summarization applied, tool calls
/// dropped, approval outcome) so later hooks and callers can observe them
/// without new fields on the context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(Map<String, Value>);

impl Metadata {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Return a copy with `key` set to `value`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Add `delta` to a numeric counter, starting from zero.
    pub fn increment(&mut self, key: &str, delta: u64) {
        let current = self.get_u64(key).unwrap_or(0);
        self.0.insert(key.to_string(), Value::from(current + delta));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

// ============================================================================
// ChatMode
// ============================================================================

/// Conversation mode selected by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    /// Plain question answering with optional tool use
    Chat,
    /// Task-driven mode: keeps a todo list across turns
    Agent,
}

impl Default for ChatMode {
    fn default() -> Self {
        Self::Chat
    }
}

impl ChatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMode::Chat => "chat",
            ChatMode::Agent => "agent",
        }
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// AgentPhase
// ============================================================================

/// Phase tag of the planning state machine, stored on the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    Init,
    Planning,
    ToolCall,
    Clarifying,
    Synthesizing,
    Completed,
}

impl Default for AgentPhase {
    fn default() -> Self {
        Self::Init
    }
}

// ============================================================================
// TodoItem
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

impl Default for TodoStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// One entry of a conversation's task list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub status: TodoStatus,
}

impl TodoItem {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            status: TodoStatus::Pending,
        }
    }

    pub fn with_status(mut self, status: TodoStatus) -> Self {
        self.status = status;
        self
    }
}
