//! Clarification Interceptor
//!
//! Terminal unit of the tool-call chain. A call to `ask_clarification` never
//! reaches a tool backend: it comes back as a failed observation carrying the
//! question, which the agent turns into a clarification reply.

use async_trait::async_trait;
use cascade_agent_tools::{ToolObservation, CLARIFICATION_TOOL};
use serde_json::Value;
use tracing::debug;

use super::context::{MiddlewareContext, ToolCallRequest};
use super::pipeline::{ToolCallHandler, ToolCallInterceptor};
use crate::utils::error::AppResult;

pub const CLARIFICATION_MARKER: &str = "Clarification required:";

pub struct ClarificationInterceptor;

/// The question of an `ask_clarification` call, or a generic one.
pub fn clarification_question(arguments: &Value) -> String {
    arguments
        .get("question")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .unwrap_or("Could you clarify what you would like me to do?")
        .to_string()
}

#[async_trait]
impl ToolCallInterceptor for ClarificationInterceptor {
    fn name(&self) -> &str {
        "clarification"
    }

    async fn intercept(
        &self,
        ctx: &MiddlewareContext,
        call: ToolCallRequest,
        executor: &dyn ToolCallHandler,
    ) -> AppResult<ToolObservation> {
        if call.tool_name() != Some(CLARIFICATION_TOOL) {
            return executor.handle(ctx, call).await;
        }

        let question = clarification_question(&call.arguments);
        debug!(task_id = %ctx.task_id, "tool call intercepted for clarification");
        Ok(ToolObservation::failure(
            CLARIFICATION_TOOL,
            call.arguments,
            format!("{CLARIFICATION_MARKER} {question}"),
        ))
    }
}
