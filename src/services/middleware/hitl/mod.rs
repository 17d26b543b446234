//! Human-in-the-Loop Risk Gate
//!
//! After each model call, pending tool calls are graded by `risk`. Low-risk
//! batches pass untouched. Medium and high-risk batches are published as an
//! `approval-required` event through the `ApprovalBroker` and the request
//! waits for a decision:
//!
//! - approved: the tool calls proceed unmodified
//! - rejected or timed out: the pending tool calls are cleared and the reason
//!   is recorded in metadata

pub mod broker;
pub mod risk;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cascade_agent_core::HitlApprovalRequest;
use serde_json::json;
use tracing::{info, warn};

use super::context::MiddlewareContext;
use super::pipeline::{Middleware, Phase};
use crate::utils::error::AppResult;

pub use broker::ApprovalBroker;
pub use risk::{assess_tool_calls, RiskAssessment};

pub struct HitlMiddleware {
    broker: Arc<ApprovalBroker>,
}

impl HitlMiddleware {
    pub fn new(broker: Arc<ApprovalBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl Middleware for HitlMiddleware {
    fn name(&self) -> &str {
        "hitl"
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::AfterModel]
    }

    async fn after_model(&self, mut ctx: MiddlewareContext) -> AppResult<MiddlewareContext> {
        let settings = ctx.runtime.settings.hitl.clone();
        if !settings.enabled {
            return Ok(ctx);
        }
        let calls = match ctx.llm_response.as_ref() {
            Some(response) if !response.pending_tool_calls().is_empty() => {
                response.pending_tool_calls().to_vec()
            }
            _ => return Ok(ctx),
        };

        let assessment = assess_tool_calls(&calls, ctx.runtime.sandbox.virtual_root());
        ctx.metadata.insert("hitlRisk", assessment.level.as_str());
        if !assessment.requires_approval() {
            return Ok(ctx);
        }

        info!(
            task_id = %ctx.task_id,
            risk = assessment.level.as_str(),
            reason = %assessment.reason,
            "tool calls require approval"
        );
        let request = HitlApprovalRequest {
            task_id: ctx.task_id.clone(),
            operation: assessment.operations.join(", "),
            risk: assessment.level,
            details: assessment.reason.clone(),
            tool_calls: calls
                .iter()
                .map(|c| json!({"id": c.id, "name": c.name, "arguments": c.arguments}))
                .collect(),
        };

        let response = self
            .broker
            .request_approval(
                request,
                Duration::from_secs(settings.timeout_secs),
                &ctx.runtime.cancel,
            )
            .await?;

        if response.approved {
            info!(task_id = %ctx.task_id, "tool calls approved");
            return Ok(ctx.with_metadata("hitlApproved", true));
        }

        let reason = response
            .reason
            .unwrap_or_else(|| "Rejected by user".to_string());
        warn!(task_id = %ctx.task_id, reason = %reason, "tool calls rejected");
        if let Some(llm_response) = ctx.llm_response.as_mut() {
            llm_response.tool_calls = None;
        }
        Ok(ctx
            .with_metadata("hitlApproved", false)
            .with_metadata("hitlRejectionReason", reason))
    }
}
