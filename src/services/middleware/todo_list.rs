//! Todo List Middleware
//!
//! Loads a conversation's task list into the context before the agent runs
//! and writes it back afterwards. Only active in agent mode, and only for
//! requests that belong to a conversation.

use async_trait::async_trait;
use cascade_agent_core::ChatMode;
use tracing::debug;

use super::context::MiddlewareContext;
use super::pipeline::{Middleware, Phase};
use crate::utils::error::AppResult;

pub struct TodoListMiddleware;

impl TodoListMiddleware {
    fn active_conversation(ctx: &MiddlewareContext) -> Option<String> {
        if ctx.chat_mode != ChatMode::Agent {
            return None;
        }
        ctx.conversation_id.clone()
    }
}

#[async_trait]
impl Middleware for TodoListMiddleware {
    fn name(&self) -> &str {
        "todo_list"
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::BeforeAgent, Phase::AfterAgent]
    }

    async fn before_agent(&self, ctx: MiddlewareContext) -> AppResult<MiddlewareContext> {
        let Some(conversation_id) = Self::active_conversation(&ctx) else {
            return Ok(ctx);
        };
        let todos = ctx.runtime.store.load_todos(&conversation_id).await?;
        debug!(conversation_id = %conversation_id, count = todos.len(), "todo list loaded");
        Ok(ctx.with_todos(Some(todos)))
    }

    async fn after_agent(&self, ctx: MiddlewareContext) -> AppResult<MiddlewareContext> {
        let Some(conversation_id) = Self::active_conversation(&ctx) else {
            return Ok(ctx);
        };
        let Some(todos) = ctx.todos.as_deref() else {
            return Ok(ctx);
        };
        ctx.runtime.store.save_todos(&conversation_id, todos).await?;
        let count = todos.len() as u64;
        Ok(ctx.with_metadata("todoCount", count))
    }
}
