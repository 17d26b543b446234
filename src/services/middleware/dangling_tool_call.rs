//! Dangling Tool Call Middleware
//!
//! Strips tool calls without a usable name from the pending model response
//! before anything downstream acts on them.

use async_trait::async_trait;
use tracing::warn;

use super::context::MiddlewareContext;
use super::pipeline::{Middleware, Phase};
use crate::utils::error::AppResult;

pub const DANGLING_REMOVED_KEY: &str = "danglingToolCallsRemoved";

pub struct DanglingToolCallMiddleware;

#[async_trait]
impl Middleware for DanglingToolCallMiddleware {
    fn name(&self) -> &str {
        "dangling_tool_call"
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::BeforeModel]
    }

    async fn before_model(&self, mut ctx: MiddlewareContext) -> AppResult<MiddlewareContext> {
        let Some(calls) = ctx.llm_response.as_mut().and_then(|r| r.tool_calls.as_mut()) else {
            return Ok(ctx);
        };

        let before = calls.len();
        calls.retain(|call| call.tool_name().is_some());
        let removed = before - calls.len();

        if removed > 0 {
            warn!(task_id = %ctx.task_id, removed, "dropped tool calls without a name");
            ctx.metadata.increment(DANGLING_REMOVED_KEY, removed as u64);
        }
        Ok(ctx)
    }
}
