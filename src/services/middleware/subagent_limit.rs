//! Subagent Limit Middleware
//!
//! Caps how many sub-tasks one delegation call may request. Extra tasks are
//! dropped from the tail and the dropped count is recorded in metadata.

use async_trait::async_trait;
use cascade_agent_tools::DELEGATION_TOOL;
use serde_json::Value;
use tracing::warn;

use super::context::MiddlewareContext;
use super::pipeline::{Middleware, Phase};
use crate::utils::error::AppResult;

pub const SUBAGENT_DROPPED_KEY: &str = "subagentTasksDropped";

pub struct SubagentLimitMiddleware {
    max_tasks: Option<usize>,
}

impl SubagentLimitMiddleware {
    /// Use the limit from the request's settings.
    pub fn new() -> Self {
        Self { max_tasks: None }
    }

    /// Fixed limit, overriding settings.
    pub fn with_max_tasks(max_tasks: usize) -> Self {
        Self {
            max_tasks: Some(max_tasks),
        }
    }
}

impl Default for SubagentLimitMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for SubagentLimitMiddleware {
    fn name(&self) -> &str {
        "subagent_limit"
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::AfterModel]
    }

    async fn after_model(&self, mut ctx: MiddlewareContext) -> AppResult<MiddlewareContext> {
        let max = self
            .max_tasks
            .unwrap_or(ctx.runtime.settings.subagent.max_tasks);
        let Some(calls) = ctx.llm_response.as_mut().and_then(|r| r.tool_calls.as_mut()) else {
            return Ok(ctx);
        };

        let mut dropped = 0usize;
        for call in calls.iter_mut() {
            if call.tool_name() != Some(DELEGATION_TOOL) {
                continue;
            }
            if let Some(Value::Array(tasks)) = call.arguments.get_mut("tasks") {
                if tasks.len() > max {
                    dropped += tasks.len() - max;
                    tasks.truncate(max);
                }
            }
        }

        if dropped > 0 {
            warn!(task_id = %ctx.task_id, dropped, max, "delegation requested too many sub-tasks");
            ctx.metadata.increment(SUBAGENT_DROPPED_KEY, dropped as u64);
        }
        Ok(ctx)
    }
}
