//! Middleware
//!
//! The pipeline that wraps every phase of the planning loop, and the policy
//! units that plug into it.
//!
//! ## Module Organization
//!
//! - `context` - `MiddlewareContext`, `AgentRuntime`, model response types
//! - `pipeline` - `Middleware` trait, phase runner, tool-call chain
//! - `workspace` / `sandbox_binding` - per-task directories and sandbox lease
//! - `dangling_tool_call` / `subagent_limit` - repair and bound tool calls
//! - `summarization` / `title` / `todo_list` - conversation upkeep
//! - `clarification` - terminal tool-call interceptor
//! - `hitl` - risk classification and approval gate

pub mod clarification;
pub mod context;
pub mod dangling_tool_call;
pub mod hitl;
pub mod pipeline;
pub mod sandbox_binding;
pub mod subagent_limit;
pub mod summarization;
pub mod title;
pub mod todo_list;
pub mod workspace;

use std::path::PathBuf;
use std::sync::Arc;

pub use clarification::ClarificationInterceptor;
pub use context::{
    AgentRuntime, LlmResponse, MiddlewareContext, OnDelta, OnUpdate, ToolCallRequest,
    MIDDLEWARE_LATENCY_KEY,
};
pub use dangling_tool_call::DanglingToolCallMiddleware;
pub use hitl::{ApprovalBroker, HitlMiddleware, RiskAssessment};
pub use pipeline::{
    LegacyAdapter, LegacyMiddleware, Middleware, MiddlewarePipeline, ModelTurnExecutor, Phase,
    PipelineEntry, ToolCallHandler, ToolCallInterceptor, ToolCallNext,
};
pub use sandbox_binding::SandboxBindingMiddleware;
pub use subagent_limit::SubagentLimitMiddleware;
pub use summarization::SummarizationMiddleware;
pub use title::TitleMiddleware;
pub use todo_list::TodoListMiddleware;
pub use workspace::{cleanup_stale_workspaces, WorkspaceMiddleware};

/// The standard pipeline of the planning agent, in registration order.
pub fn default_pipeline(workspace_root: impl Into<PathBuf>, broker: Arc<ApprovalBroker>) -> MiddlewarePipeline {
    MiddlewarePipeline::new()
        .with(WorkspaceMiddleware::new(workspace_root))
        .with(SandboxBindingMiddleware)
        .with(TodoListMiddleware)
        .with(DanglingToolCallMiddleware)
        .with(SummarizationMiddleware)
        .with(SubagentLimitMiddleware::new())
        .with(HitlMiddleware::new(broker))
        .with(TitleMiddleware)
        .with_terminal(ClarificationInterceptor)
}
