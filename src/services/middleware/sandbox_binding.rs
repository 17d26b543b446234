//! Sandbox Binding Middleware
//!
//! Binds the task workspace as the sandbox's current workspace for the
//! duration of the request. The binding is held as a `WorkspaceLease` on the
//! request runtime: `after_agent` releases it, and if the request fails first
//! the lease is released when the runtime is dropped.

use async_trait::async_trait;
use tracing::debug;

use super::context::MiddlewareContext;
use super::pipeline::{Middleware, Phase};
use crate::utils::error::AppResult;

pub struct SandboxBindingMiddleware;

#[async_trait]
impl Middleware for SandboxBindingMiddleware {
    fn name(&self) -> &str {
        "sandbox_binding"
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::BeforeAgent, Phase::AfterAgent]
    }

    async fn before_agent(&self, ctx: MiddlewareContext) -> AppResult<MiddlewareContext> {
        let workspace = ctx.require_workspace()?.clone();
        let lease = ctx.runtime.sandbox.bind_workspace(&workspace);
        ctx.runtime.hold_workspace_lease(lease);
        debug!(task_id = %ctx.task_id, "sandbox bound to task workspace");
        Ok(ctx.with_metadata("sandboxBound", true))
    }

    async fn after_agent(&self, ctx: MiddlewareContext) -> AppResult<MiddlewareContext> {
        let released = ctx.runtime.release_workspace_lease();
        Ok(ctx.with_metadata("sandboxBound", false).with_metadata("sandboxReleased", released))
    }
}
