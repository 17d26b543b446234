//! Cascade Agent - Tool-Planning Chat Engine
//!
//! This library turns a user message into an answer by planning tool calls
//! step by step and synthesizing a final streamed reply. It includes:
//! - The planning agent (`ToolPlanningChatAgent`)
//! - The phased middleware pipeline and its policy units
//! - Human-in-the-loop approval brokering
//! - Settings and conversation storage
//!
//! Model providers and tool backends plug in through the `ModelsFactory`
//! and `ToolExecutor` traits of the workspace crates.

pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

pub use models::settings::{AgentSettings, SettingsUpdate};
pub use services::agent::{ChatInput, ChatReply, ToolPlanningChatAgent, ToolPlanningChatAgentBuilder};
pub use services::middleware::{
    default_pipeline, ApprovalBroker, Middleware, MiddlewareContext, MiddlewarePipeline, OnDelta,
    OnUpdate, Phase,
};
pub use storage::conversation_store::{ConversationStore, InMemoryConversationStore};
pub use utils::error::{AppError, AppResult};
