//! Middleware Pipeline
//!
//! Ordered hook runner wrapped around every phase of the planning loop.
//!
//! ## Phases
//!
//! Phases always run in this order, whichever middlewares are registered:
//!
//! 1. `before_agent`   - once, before the first planner call
//! 2. `before_model`   - before every model call
//! 3. `after_model`    - after every planner call
//! 4. `wrap_tool_call` - around every tool execution (onion order)
//! 5. `after_agent`    - once, after the reply is fixed
//!
//! Within a phase, middlewares run in registration order and each receives
//! the context the previous one returned. A failing hook aborts the pipeline
//! with `"{middleware} failed at {phase}: {original}"`.
//!
//! The tool-call chain ends in an optional terminal interceptor slot, then
//! the executor. The clarification interceptor lives in that slot, so it is
//! always the innermost wrapper.

use std::sync::Arc;

use async_trait::async_trait;
use cascade_agent_tools::ToolObservation;
use futures_util::future::BoxFuture;
use tracing::{debug, warn};

use super::context::{MiddlewareContext, ToolCallRequest};
use crate::utils::error::{AppError, AppResult};

// ============================================================================
// Phases
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    BeforeAgent,
    BeforeModel,
    AfterModel,
    WrapToolCall,
    AfterAgent,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::BeforeAgent => "before_agent",
            Phase::BeforeModel => "before_model",
            Phase::AfterModel => "after_model",
            Phase::WrapToolCall => "wrap_tool_call",
            Phase::AfterAgent => "after_agent",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Middleware traits
// ============================================================================

/// A policy unit hooked into one or more phases.
///
/// `phases()` declares which hooks the unit implements; the pipeline only
/// dispatches those. Undeclared hooks keep their pass-through defaults.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    fn phases(&self) -> &'static [Phase];

    async fn before_agent(&self, ctx: MiddlewareContext) -> AppResult<MiddlewareContext> {
        Ok(ctx)
    }

    async fn before_model(&self, ctx: MiddlewareContext) -> AppResult<MiddlewareContext> {
        Ok(ctx)
    }

    async fn after_model(&self, ctx: MiddlewareContext) -> AppResult<MiddlewareContext> {
        Ok(ctx)
    }

    async fn after_agent(&self, ctx: MiddlewareContext) -> AppResult<MiddlewareContext> {
        Ok(ctx)
    }

    async fn wrap_tool_call(
        &self,
        ctx: &MiddlewareContext,
        call: ToolCallRequest,
        next: ToolCallNext<'_>,
    ) -> AppResult<ToolObservation> {
        next.run(ctx, call).await
    }
}

/// Executes a tool call once every wrapper has passed it on.
#[async_trait]
pub trait ToolCallHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &MiddlewareContext,
        call: ToolCallRequest,
    ) -> AppResult<ToolObservation>;
}

/// The innermost wrapper of the tool-call chain.
#[async_trait]
pub trait ToolCallInterceptor: Send + Sync {
    fn name(&self) -> &str;

    async fn intercept(
        &self,
        ctx: &MiddlewareContext,
        call: ToolCallRequest,
        executor: &dyn ToolCallHandler,
    ) -> AppResult<ToolObservation>;
}

/// Rest of the tool-call chain, handed to each `wrap_tool_call`.
pub struct ToolCallNext<'a> {
    remaining: &'a [Arc<dyn Middleware>],
    terminal: Option<&'a Arc<dyn ToolCallInterceptor>>,
    executor: &'a dyn ToolCallHandler,
}

impl<'a> ToolCallNext<'a> {
    /// Pass `call` to the next wrapper, the terminal interceptor, or the executor.
    pub fn run<'b>(
        self,
        ctx: &'b MiddlewareContext,
        call: ToolCallRequest,
    ) -> BoxFuture<'b, AppResult<ToolObservation>>
    where
        'a: 'b,
    {
        Box::pin(async move {
            match self.remaining.split_first() {
                Some((head, rest)) => {
                    let next = ToolCallNext {
                        remaining: rest,
                        terminal: self.terminal,
                        executor: self.executor,
                    };
                    head.wrap_tool_call(ctx, call, next)
                        .await
                        .map_err(|e| hook_failed(head.name(), Phase::WrapToolCall, e))
                }
                None => match self.terminal {
                    Some(terminal) => terminal
                        .intercept(ctx, call, self.executor)
                        .await
                        .map_err(|e| hook_failed(terminal.name(), Phase::WrapToolCall, e)),
                    None => self.executor.handle(ctx, call).await,
                },
            }
        })
    }
}

fn hook_failed(middleware: &str, phase: Phase, err: AppError) -> AppError {
    if !err.is_cancelled() {
        warn!(middleware, phase = phase.as_str(), error = %err, "middleware hook failed");
    }
    AppError::middleware(middleware, phase, err)
}

// ============================================================================
// Legacy four-phase vocabulary
// ============================================================================

/// Older four-hook middleware shape, run through `LegacyAdapter`.
#[async_trait]
pub trait LegacyMiddleware: Send + Sync {
    fn name(&self) -> &str;

    async fn on_request(&self, ctx: MiddlewareContext) -> AppResult<MiddlewareContext> {
        Ok(ctx)
    }

    async fn before_llm(&self, ctx: MiddlewareContext) -> AppResult<MiddlewareContext> {
        Ok(ctx)
    }

    async fn after_llm(&self, ctx: MiddlewareContext) -> AppResult<MiddlewareContext> {
        Ok(ctx)
    }

    async fn on_response(&self, ctx: MiddlewareContext) -> AppResult<MiddlewareContext> {
        Ok(ctx)
    }
}

/// Maps `on_request/before_llm/after_llm/on_response` onto
/// `before_agent/before_model/after_model/after_agent`.
pub struct LegacyAdapter<M>(pub M);

#[async_trait]
impl<M: LegacyMiddleware> Middleware for LegacyAdapter<M> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn phases(&self) -> &'static [Phase] {
        &[
            Phase::BeforeAgent,
            Phase::BeforeModel,
            Phase::AfterModel,
            Phase::AfterAgent,
        ]
    }

    async fn before_agent(&self, ctx: MiddlewareContext) -> AppResult<MiddlewareContext> {
        self.0.on_request(ctx).await
    }

    async fn before_model(&self, ctx: MiddlewareContext) -> AppResult<MiddlewareContext> {
        self.0.before_llm(ctx).await
    }

    async fn after_model(&self, ctx: MiddlewareContext) -> AppResult<MiddlewareContext> {
        self.0.after_llm(ctx).await
    }

    async fn after_agent(&self, ctx: MiddlewareContext) -> AppResult<MiddlewareContext> {
        self.0.on_response(ctx).await
    }
}

/// One model call, used by `run_single_turn`.
#[async_trait]
pub trait ModelTurnExecutor: Send + Sync {
    /// Run the model and return the context with `llm_response` set.
    async fn execute(&self, ctx: MiddlewareContext) -> AppResult<MiddlewareContext>;
}

// ============================================================================
// Pipeline
// ============================================================================

/// One slot of a dynamically assembled pipeline.
pub enum PipelineEntry {
    Middleware(Arc<dyn Middleware>),
    Terminal(Arc<dyn ToolCallInterceptor>),
}

#[derive(Default)]
pub struct MiddlewarePipeline {
    middlewares: Vec<Arc<dyn Middleware>>,
    terminal: Option<Arc<dyn ToolCallInterceptor>>,
}

impl std::fmt::Debug for MiddlewarePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewarePipeline")
            .field("middlewares", &self.names())
            .field("terminal", &self.terminal.as_ref().map(|t| t.name().to_string()))
            .finish()
    }
}

impl MiddlewarePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware.
    pub fn with(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    /// Set the terminal interceptor of the tool-call chain.
    pub fn with_terminal(mut self, interceptor: impl ToolCallInterceptor + 'static) -> Self {
        self.terminal = Some(Arc::new(interceptor));
        self
    }

    /// Build from an ordered list, as read from configuration.
    ///
    /// A terminal interceptor is only accepted as the last entry.
    pub fn from_ordered(entries: Vec<PipelineEntry>) -> AppResult<Self> {
        let count = entries.len();
        let mut pipeline = Self::new();
        for (index, entry) in entries.into_iter().enumerate() {
            match entry {
                PipelineEntry::Middleware(m) => pipeline.middlewares.push(m),
                PipelineEntry::Terminal(t) => {
                    if index + 1 != count {
                        return Err(AppError::pipeline_config(format!(
                            "'{}' intercepts tool calls and must be the last middleware (found at position {} of {})",
                            t.name(),
                            index + 1,
                            count
                        )));
                    }
                    pipeline.terminal = Some(t);
                }
            }
        }
        Ok(pipeline)
    }

    /// Names in registration order, terminal last.
    pub fn names(&self) -> Vec<String> {
        self.middlewares
            .iter()
            .map(|m| m.name().to_string())
            .chain(self.terminal.iter().map(|t| t.name().to_string()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty() && self.terminal.is_none()
    }

    async fn run_phase(&self, phase: Phase, mut ctx: MiddlewareContext) -> AppResult<MiddlewareContext> {
        for middleware in self.middlewares.iter().filter(|m| m.phases().contains(&phase)) {
            ctx.runtime.check_cancelled()?;
            debug!(middleware = middleware.name(), phase = phase.as_str(), "running hook");
            let result = match phase {
                Phase::BeforeAgent => middleware.before_agent(ctx).await,
                Phase::BeforeModel => middleware.before_model(ctx).await,
                Phase::AfterModel => middleware.after_model(ctx).await,
                Phase::AfterAgent => middleware.after_agent(ctx).await,
                Phase::WrapToolCall => {
                    return Err(AppError::internal(
                        "wrap_tool_call is not a context phase",
                    ))
                }
            };
            ctx = result.map_err(|e| hook_failed(middleware.name(), phase, e))?;
        }
        Ok(ctx)
    }

    pub async fn before_agent(&self, ctx: MiddlewareContext) -> AppResult<MiddlewareContext> {
        self.run_phase(Phase::BeforeAgent, ctx).await
    }

    pub async fn before_model(&self, ctx: MiddlewareContext) -> AppResult<MiddlewareContext> {
        self.run_phase(Phase::BeforeModel, ctx).await
    }

    pub async fn after_model(&self, ctx: MiddlewareContext) -> AppResult<MiddlewareContext> {
        self.run_phase(Phase::AfterModel, ctx).await
    }

    pub async fn after_agent(&self, ctx: MiddlewareContext) -> AppResult<MiddlewareContext> {
        self.run_phase(Phase::AfterAgent, ctx).await
    }

    /// Run `call` through every `wrap_tool_call` hook, then `executor`.
    pub async fn wrap_tool_call(
        &self,
        ctx: &MiddlewareContext,
        call: ToolCallRequest,
        executor: &dyn ToolCallHandler,
    ) -> AppResult<ToolObservation> {
        ctx.runtime.check_cancelled()?;
        let wrappers: Vec<Arc<dyn Middleware>> = self
            .middlewares
            .iter()
            .filter(|m| m.phases().contains(&Phase::WrapToolCall))
            .cloned()
            .collect();
        let next = ToolCallNext {
            remaining: &wrappers,
            terminal: self.terminal.as_ref(),
            executor,
        };
        next.run(ctx, call).await
    }

    /// Wrap one model call with the four context phases, no tool loop.
    pub async fn run_single_turn(
        &self,
        ctx: MiddlewareContext,
        executor: &dyn ModelTurnExecutor,
    ) -> AppResult<MiddlewareContext> {
        let ctx = self.before_agent(ctx).await?;
        let ctx = self.before_model(ctx).await?;
        ctx.runtime.check_cancelled()?;
        let ctx = executor.execute(ctx).await?;
        let ctx = self.after_model(ctx).await?;
        self.after_agent(ctx).await
    }
}
