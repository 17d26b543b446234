//! Middleware Context
//!
//! `MiddlewareContext` is the single unit of state threaded through one
//! request. Hooks take it by value and return a new one; the `with_*`
//! helpers keep those functional updates terse.
//!
//! `AgentRuntime` bundles the collaborators a hook may need. It is cheap to
//! clone (every field is shared) and lives exactly as long as the request.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use cascade_agent_core::{AgentPhase, ChatMode, Metadata, ProgressUpdate, TodoItem};
use cascade_agent_llm::{ChatMessage, GenerateRequest, GenerateResponse, ModelsFactory, RuntimeTarget};
use cascade_agent_tools::{SandboxService, ToolAction, ToolDescriptor, WorkspaceLease};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::models::settings::AgentSettings;
use crate::storage::conversation_store::ConversationStore;
use crate::utils::error::{AppError, AppResult};

/// Progress callback: receives every staged update of a request.
pub type OnUpdate = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Delta callback: receives incremental synthesis text.
pub type OnDelta = Arc<dyn Fn(&str) + Send + Sync>;

/// Metadata key accumulating latency of model calls made by middlewares.
pub const MIDDLEWARE_LATENCY_KEY: &str = "middlewareLatencyMs";

// ============================================================================
// Model response
// ============================================================================

/// A tool call proposed by a model response.
///
/// `name` is optional because models emit calls with no usable name; those
/// are stripped before anything acts on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            arguments,
        }
    }

    pub fn from_action(id: impl Into<String>, action: &ToolAction) -> Self {
        Self::new(id, action.tool.clone(), action.input.clone())
    }

    /// The trimmed name, if it is non-empty.
    pub fn tool_name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|n| !n.is_empty())
    }

    /// Back to a planner action; `None` for a nameless call.
    pub fn to_action(&self, reason: Option<String>) -> Option<ToolAction> {
        let tool = self.tool_name()?;
        Some(ToolAction {
            tool: tool.to_string(),
            input: self.arguments.clone(),
            reason,
        })
    }
}

/// Raw model output plus the tool calls derived from it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: None,
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCallRequest>) -> Self {
        self.tool_calls = Some(calls);
        self
    }

    pub fn pending_tool_calls(&self) -> &[ToolCallRequest] {
        self.tool_calls.as_deref().unwrap_or(&[])
    }
}

// ============================================================================
// Runtime handle
// ============================================================================

/// Collaborators and per-request signals shared by every hook.
#[derive(Clone)]
pub struct AgentRuntime {
    pub settings: Arc<AgentSettings>,
    pub models: Arc<dyn ModelsFactory>,
    pub sandbox: Arc<SandboxService>,
    pub store: Arc<dyn ConversationStore>,
    /// Binding used for planning and for auxiliary calls (summaries, titles)
    pub planner: RuntimeTarget,
    pub synthesizer: RuntimeTarget,
    pub on_update: Option<OnUpdate>,
    pub cancel: CancellationToken,
    workspace_lease: Arc<Mutex<Option<WorkspaceLease>>>,
}

impl AgentRuntime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Arc<AgentSettings>,
        models: Arc<dyn ModelsFactory>,
        sandbox: Arc<SandboxService>,
        store: Arc<dyn ConversationStore>,
        planner: RuntimeTarget,
        synthesizer: RuntimeTarget,
        on_update: Option<OnUpdate>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            settings,
            models,
            sandbox,
            store,
            planner,
            synthesizer,
            on_update,
            cancel,
            workspace_lease: Arc::new(Mutex::new(None)),
        }
    }

    pub fn emit(&self, update: ProgressUpdate) {
        if let Some(on_update) = &self.on_update {
            on_update(update);
        }
    }

    pub fn check_cancelled(&self) -> AppResult<()> {
        if self.cancel.is_cancelled() {
            Err(AppError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// One non-streaming call on the planner binding.
    ///
    /// Used by middlewares for summaries and titles. Failures carry the
    /// binding; cancellation stays `AppError::Cancelled`.
    pub async fn generate_auxiliary(
        &self,
        system: &str,
        messages: Vec<ChatMessage>,
    ) -> AppResult<GenerateResponse> {
        self.check_cancelled()?;
        let request = GenerateRequest::new(self.planner.clone(), messages)
            .with_system(system)
            .with_cancel(self.cancel.clone());
        self.models
            .generate_text(request)
            .await
            .map_err(|e| AppError::from_llm(&self.planner, e))
    }

    /// Keep `lease` alive until released or until the request ends.
    pub fn hold_workspace_lease(&self, lease: WorkspaceLease) {
        let mut slot = self.workspace_lease.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(lease);
    }

    /// Drop the held lease, clearing the sandbox binding. Returns whether one was held.
    pub fn release_workspace_lease(&self) -> bool {
        let lease = self
            .workspace_lease
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        lease.is_some()
    }
}

impl std::fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRuntime")
            .field("planner", &self.planner.profile_id)
            .field("synthesizer", &self.synthesizer.profile_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

// ============================================================================
// MiddlewareContext
// ============================================================================

#[derive(Debug, Clone)]
pub struct MiddlewareContext {
    pub session_id: String,
    pub task_id: String,
    pub conversation_id: Option<String>,
    /// Set by the workspace middleware
    pub workspace_path: Option<PathBuf>,
    /// The current user message, unmodified
    pub user_message: String,
    /// Conversation so far: history followed by the user message
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDescriptor>,
    pub metadata: Metadata,
    pub state: AgentPhase,
    pub llm_response: Option<LlmResponse>,
    pub final_response: Option<String>,
    pub chat_mode: ChatMode,
    pub todos: Option<Vec<TodoItem>>,
    pub runtime: AgentRuntime,
}

impl MiddlewareContext {
    pub fn new(
        session_id: impl Into<String>,
        task_id: impl Into<String>,
        user_message: impl Into<String>,
        runtime: AgentRuntime,
    ) -> Self {
        let user_message = user_message.into();
        Self {
            session_id: session_id.into(),
            task_id: task_id.into(),
            conversation_id: None,
            workspace_path: None,
            messages: vec![ChatMessage::user(user_message.clone())],
            user_message,
            tools: Vec::new(),
            metadata: Metadata::new(),
            state: AgentPhase::Init,
            llm_response: None,
            final_response: None,
            chat_mode: runtime.settings.chat_mode,
            todos: None,
            runtime,
        }
    }

    pub fn with_conversation_id(mut self, conversation_id: Option<String>) -> Self {
        self.conversation_id = conversation_id;
        self
    }

    pub fn with_chat_mode(mut self, chat_mode: ChatMode) -> Self {
        self.chat_mode = chat_mode;
        self
    }

    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_workspace_path(mut self, path: PathBuf) -> Self {
        self.workspace_path = Some(path);
        self
    }

    pub fn with_state(mut self, state: AgentPhase) -> Self {
        self.state = state;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key, value);
        self
    }

    pub fn with_llm_response(mut self, response: Option<LlmResponse>) -> Self {
        self.llm_response = response;
        self
    }

    pub fn with_final_response(mut self, response: impl Into<String>) -> Self {
        self.final_response = Some(response.into());
        self
    }

    pub fn with_todos(mut self, todos: Option<Vec<TodoItem>>) -> Self {
        self.todos = todos;
        self
    }

    /// Workspace path, or an error if the workspace middleware has not run.
    pub fn require_workspace(&self) -> AppResult<&PathBuf> {
        self.workspace_path
            .as_ref()
            .ok_or_else(|| AppError::internal("task workspace has not been allocated"))
    }
}
