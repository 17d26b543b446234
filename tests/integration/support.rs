//! Scripted doubles shared by the integration tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cascade_agent::{AgentSettings, OnUpdate, ToolPlanningChatAgent};
use cascade_agent_core::ProgressUpdate;
use cascade_agent_llm::{
    DeltaSink, GenerateRequest, GenerateResponse, LlmError, LlmResult, ModelRole, ModelRouter, ModelsFactory,
    ProviderRuntimeConfig, RoutingError, RuntimeTarget,
};
use cascade_agent_tools::{
    SandboxService, ToolAction, ToolDescriptor, ToolExecutor, ToolObservation,
    WorkspaceToolExecutor,
};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Text,
    Stream,
}

/// Replays scripted replies in order and records every request.
#[derive(Default)]
pub struct ScriptedModels {
    replies: Mutex<VecDeque<LlmResult<String>>>,
    calls: Mutex<Vec<(CallKind, GenerateRequest)>>,
}

impl ScriptedModels {
    pub fn new(replies: Vec<LlmResult<String>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn replying(texts: &[&str]) -> Arc<Self> {
        Self::new(texts.iter().map(|t| Ok(t.to_string())).collect())
    }

    pub fn calls(&self) -> Vec<(CallKind, GenerateRequest)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn stream_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|(kind, _)| *kind == CallKind::Stream)
            .count()
    }

    /// Non-streaming calls made on the planner binding.
    pub fn planner_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|(kind, req)| *kind == CallKind::Text && req.target.role == ModelRole::Planner)
            .count()
    }

    fn next(&self, kind: CallKind, request: GenerateRequest) -> LlmResult<GenerateResponse> {
        if request.cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        let target = request.target.clone();
        self.calls.lock().unwrap().push((kind, request));
        let text = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::other("no scripted reply left")))?;
        Ok(GenerateResponse {
            provider: target.provider,
            model: target.model,
            text,
            latency_ms: 10,
            usage: None,
        })
    }
}

#[async_trait]
impl ModelsFactory for ScriptedModels {
    async fn generate_text(&self, request: GenerateRequest) -> LlmResult<GenerateResponse> {
        self.next(CallKind::Text, request)
    }

    async fn generate_text_stream(
        &self,
        request: GenerateRequest,
        on_delta: &DeltaSink,
    ) -> LlmResult<GenerateResponse> {
        let response = self.next(CallKind::Stream, request)?;
        let chars: Vec<char> = response.text.chars().collect();
        for chunk in chars.chunks(8) {
            on_delta(&chunk.iter().collect::<String>());
        }
        Ok(response)
    }
}

// ============================================================================
// Routing
// ============================================================================

pub fn target(role: ModelRole) -> RuntimeTarget {
    RuntimeTarget {
        role,
        profile_id: format!("{}-profile", role.as_str()),
        provider: "openai".to_string(),
        model: format!("{}-model", role.as_str()),
        runtime_config: ProviderRuntimeConfig::default(),
        temperature: None,
        max_tokens: None,
    }
}

pub struct FixedRouter;

impl ModelRouter for FixedRouter {
    fn resolve_runtime_target(&self, role: ModelRole) -> Result<RuntimeTarget, RoutingError> {
        Ok(target(role))
    }
}

// ============================================================================
// Tools
// ============================================================================

type ToolScript = Box<dyn Fn(&ToolAction) -> Result<String, String> + Send + Sync>;

/// Executor answering from a closure and recording every action.
pub struct ScriptedExecutor {
    script: ToolScript,
    executed: Mutex<Vec<ToolAction>>,
    cancel_on_execute: Option<CancellationToken>,
}

impl ScriptedExecutor {
    pub fn new(
        script: impl Fn(&ToolAction) -> Result<String, String> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            executed: Mutex::new(Vec::new()),
            cancel_on_execute: None,
        })
    }

    /// Fires `token` while the first tool runs.
    pub fn cancelling(token: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(|_: &ToolAction| Ok("done".to_string())),
            executed: Mutex::new(Vec::new()),
            cancel_on_execute: Some(token),
        })
    }

    pub fn executed(&self) -> Vec<ToolAction> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolExecutor for ScriptedExecutor {
    fn available_tools(&self) -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new("list_dir", "List a directory"),
            ToolDescriptor::new("shell", "Run a shell command"),
            ToolDescriptor::new("delegate", "Fan out sub-tasks"),
        ]
    }

    async fn execute_planner_tool(
        &self,
        action: &ToolAction,
        _sandbox: &SandboxService,
        _workspace_path: &Path,
        _cancel: &CancellationToken,
    ) -> ToolObservation {
        self.executed.lock().unwrap().push(action.clone());
        if let Some(token) = &self.cancel_on_execute {
            token.cancel();
        }
        ToolObservation::from_action(action, (self.script)(action))
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn settings(root: &Path) -> AgentSettings {
    AgentSettings {
        workspace_root: root.to_path_buf(),
        ..Default::default()
    }
}

pub fn agent_with(
    settings: AgentSettings,
    models: Arc<ScriptedModels>,
    executor: Arc<dyn ToolExecutor>,
) -> ToolPlanningChatAgent {
    ToolPlanningChatAgent::builder(settings, models, executor)
        .router(Arc::new(FixedRouter))
        .build()
        .unwrap()
}

pub fn workspace_agent(root: &Path, models: Arc<ScriptedModels>) -> ToolPlanningChatAgent {
    agent_with(settings(root), models, Arc::new(WorkspaceToolExecutor::new()))
}

/// Progress callback that records every update.
pub fn recorder() -> (OnUpdate, Arc<Mutex<Vec<ProgressUpdate>>>) {
    let events: Arc<Mutex<Vec<ProgressUpdate>>> = Arc::default();
    let sink = Arc::clone(&events);
    let on_update: OnUpdate = Arc::new(move |u: ProgressUpdate| sink.lock().unwrap().push(u));
    (on_update, events)
}

/// Single task directory created under `root`.
pub fn only_task_dir(root: &Path) -> std::path::PathBuf {
    let mut dirs: Vec<_> = std::fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.is_dir())
        .collect();
    assert_eq!(dirs.len(), 1, "expected exactly one task directory");
    dirs.remove(0)
}
