//! Tool-Planning Chat Agent
//!
//! Turns one user message into a reply:
//!
//! 1. validate the message and resolve the planner and synthesizer bindings
//! 2. run `before_agent` hooks (workspace, sandbox lease, todo list)
//! 3. plan for at most `max_steps` steps: each step asks the planner for one
//!    action and either answers, asks for clarification, or runs one tool
//! 4. synthesize the final reply with a streaming call, unless the turn ended
//!    with a clarification question
//! 5. run `after_agent` hooks (todo list, title)
//!
//! Every model call is wrapped in `before_model` / `after_model` hooks and
//! every tool call runs through the `wrap_tool_call` chain. The abort token
//! is checked at each step and phase boundary.

pub mod clarification;
pub mod prompts;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use cascade_agent_core::{AgentPhase, ChatMode, ProgressStage, ProgressUpdate};
use cascade_agent_llm::{
    ChatMessage, GenerateRequest, GenerateResponse, ModelRole, ModelRouter, ModelsFactory,
    ProfileRouter, ProviderRateLimiter, RateLimitedModels, RuntimeTarget,
};
use cascade_agent_tools::{
    looks_like_malformed_structured_output, try_parse_planner_action, PlannerAction,
    SandboxService, ToolAction, ToolExecutor, ToolObservation,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::settings::AgentSettings;
use crate::services::middleware::clarification::clarification_question;
use crate::services::middleware::{
    default_pipeline, AgentRuntime, ApprovalBroker, LlmResponse, MiddlewareContext,
    MiddlewarePipeline, OnDelta, OnUpdate, ToolCallHandler, ToolCallRequest,
    MIDDLEWARE_LATENCY_KEY,
};
use crate::storage::conversation_store::{ConversationStore, InMemoryConversationStore};
use crate::utils::error::{AppError, AppResult};

/// Tool failure messages after which further planning is pointless.
const UNRECOVERABLE_FAILURE_MARKERS: &[&str] = &["path does not exist", "invalid_path"];

// ============================================================================
// Request / reply
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatInput {
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Overrides the configured chat mode for this request
    #[serde(default)]
    pub chat_mode: Option<ChatMode>,
}

impl ChatInput {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_chat_mode(mut self, chat_mode: ChatMode) -> Self {
        self.chat_mode = Some(chat_mode);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub reply: String,
    pub provider: String,
    pub model: String,
    /// Sum over every model call the request made
    pub latency_ms: u64,
}

// ============================================================================
// Per-turn bookkeeping
// ============================================================================

#[derive(Debug, Default)]
struct TurnProgress {
    observations: Vec<ToolObservation>,
    attempted: HashSet<String>,
    draft: Option<String>,
    clarification_reply: Option<String>,
    planner_calls: u32,
    latency_ms: u64,
}

/// Hands tool calls that survive the wrapper chain to the executor.
struct ExecutorHandler {
    executor: Arc<dyn ToolExecutor>,
}

#[async_trait]
impl ToolCallHandler for ExecutorHandler {
    async fn handle(
        &self,
        ctx: &MiddlewareContext,
        call: ToolCallRequest,
    ) -> AppResult<ToolObservation> {
        let Some(action) = call.to_action(None) else {
            return Ok(ToolObservation::failure(
                "",
                call.arguments,
                "tool call has no name",
            ));
        };
        let workspace = ctx.require_workspace()?;
        Ok(self
            .executor
            .execute_planner_tool(&action, &ctx.runtime.sandbox, workspace, &ctx.runtime.cancel)
            .await)
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        format!("{}…", text.chars().take(max_chars).collect::<String>())
    }
}

fn is_unrecoverable_failure(output: &str) -> bool {
    UNRECOVERABLE_FAILURE_MARKERS.iter().any(|m| output.contains(m))
}

// ============================================================================
// Agent
// ============================================================================

pub struct ToolPlanningChatAgent {
    settings: Arc<AgentSettings>,
    router: Arc<dyn ModelRouter>,
    models: Arc<dyn ModelsFactory>,
    executor: Arc<dyn ToolExecutor>,
    sandbox: Arc<SandboxService>,
    store: Arc<dyn ConversationStore>,
    broker: Arc<ApprovalBroker>,
    pipeline: MiddlewarePipeline,
}

impl ToolPlanningChatAgent {
    pub fn builder(
        settings: AgentSettings,
        models: Arc<dyn ModelsFactory>,
        executor: Arc<dyn ToolExecutor>,
    ) -> ToolPlanningChatAgentBuilder {
        ToolPlanningChatAgentBuilder {
            settings,
            models,
            executor,
            router: None,
            store: None,
            sandbox: None,
            broker: None,
            limiter: None,
            pipeline: None,
        }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn broker(&self) -> Arc<ApprovalBroker> {
        Arc::clone(&self.broker)
    }

    pub fn sandbox(&self) -> Arc<SandboxService> {
        Arc::clone(&self.sandbox)
    }

    pub fn pipeline(&self) -> &MiddlewarePipeline {
        &self.pipeline
    }

    /// Answer one user message.
    ///
    /// Fails on an empty message, an unusable model binding, a failed model
    /// call, a failed hook, or cancellation (`AppError::Cancelled`). A reply
    /// is only returned for a fully completed turn.
    pub async fn send(
        &self,
        input: ChatInput,
        on_update: Option<OnUpdate>,
        on_delta: Option<OnDelta>,
        abort: Option<CancellationToken>,
    ) -> AppResult<ChatReply> {
        let message = input.message.trim();
        if message.is_empty() {
            return Err(AppError::validation("Message cannot be empty"));
        }

        let planner = self.router.resolve_runtime_target(ModelRole::Planner)?;
        let synthesizer = self.router.resolve_runtime_target(ModelRole::Synthesizer)?;
        let cancel = abort.unwrap_or_default();

        let result = self
            .run_turn(&input, planner, synthesizer, on_update.clone(), on_delta, cancel)
            .await;
        if let (Err(e), Some(on_update)) = (&result, &on_update) {
            if !e.is_cancelled() {
                on_update(ProgressUpdate::new(ProgressStage::Error, e.to_string()));
            }
        }
        result
    }

    async fn run_turn(
        &self,
        input: &ChatInput,
        planner: RuntimeTarget,
        synthesizer: RuntimeTarget,
        on_update: Option<OnUpdate>,
        on_delta: Option<OnDelta>,
        cancel: CancellationToken,
    ) -> AppResult<ChatReply> {
        let message = input.message.trim().to_string();
        let task_id = Uuid::new_v4().to_string();
        let session_id = input.session_id.clone().unwrap_or_else(|| task_id.clone());
        let runtime = AgentRuntime::new(
            Arc::clone(&self.settings),
            Arc::clone(&self.models),
            Arc::clone(&self.sandbox),
            Arc::clone(&self.store),
            planner,
            synthesizer,
            on_update,
            cancel,
        );
        runtime.check_cancelled()?;

        let mut messages = input.history.clone();
        messages.push(ChatMessage::user(message.clone()));
        let mut tools = self.executor.available_tools();
        tools.push(prompts::clarification_descriptor());

        let ctx = MiddlewareContext::new(session_id, task_id.clone(), message, runtime)
            .with_conversation_id(input.conversation_id.clone())
            .with_chat_mode(input.chat_mode.unwrap_or(self.settings.chat_mode))
            .with_messages(messages)
            .with_tools(tools);
        info!(task_id = %task_id, chat_mode = %ctx.chat_mode, "chat turn started");

        let ctx = self.pipeline.before_agent(ctx).await?;
        let mut turn = TurnProgress::default();
        let ctx = self.plan(ctx, &mut turn).await?;

        let (ctx, reply, provider, model) = match turn.clarification_reply.take() {
            Some(reply) => {
                let planner = ctx.runtime.planner.clone();
                (ctx, reply, planner.provider, planner.model)
            }
            None => {
                let (ctx, response) = self.synthesize(ctx, &mut turn, on_delta).await?;
                let reply = ctx
                    .llm_response
                    .as_ref()
                    .map(|r| r.content.clone())
                    .unwrap_or_else(|| response.text.clone());
                (ctx, reply, response.provider, response.model)
            }
        };

        let ctx = self
            .pipeline
            .after_agent(
                ctx.with_final_response(reply.clone())
                    .with_state(AgentPhase::Completed),
            )
            .await?;

        let latency_ms = turn.latency_ms + ctx.metadata.get_u64(MIDDLEWARE_LATENCY_KEY).unwrap_or(0);
        ctx.runtime
            .emit(ProgressUpdate::new(ProgressStage::Final, "Reply ready"));
        info!(
            task_id = %task_id,
            planner_calls = turn.planner_calls,
            observations = turn.observations.len(),
            latency_ms,
            "chat turn completed"
        );
        Ok(ChatReply {
            reply,
            provider,
            model,
            latency_ms,
        })
    }

    // ------------------------------------------------------------------------
    // Planning
    // ------------------------------------------------------------------------

    async fn plan(
        &self,
        mut ctx: MiddlewareContext,
        turn: &mut TurnProgress,
    ) -> AppResult<MiddlewareContext> {
        let max_steps = self.settings.max_steps;
        let handler = ExecutorHandler {
            executor: Arc::clone(&self.executor),
        };

        for step in 1..=max_steps {
            ctx.runtime.check_cancelled()?;
            ctx = ctx.with_state(AgentPhase::Planning);
            ctx.runtime.emit(ProgressUpdate::new(
                ProgressStage::Planning,
                format!("Planning step {step}/{max_steps}"),
            ));

            let (next, raw) = self.call_planner(ctx, turn, step).await?;
            ctx = next;

            let proposed = match try_parse_planner_action(&raw) {
                Some(PlannerAction::Answer { answer }) => {
                    debug!(task_id = %ctx.task_id, step, "planner answered");
                    turn.draft = Some(answer);
                    break;
                }
                Some(PlannerAction::Tool(action)) => action,
                None => {
                    if looks_like_malformed_structured_output(&raw) {
                        warn!(task_id = %ctx.task_id, step, "planner output is malformed JSON, discarding");
                    } else if !raw.trim().is_empty() {
                        turn.draft = Some(raw.trim().to_string());
                    }
                    break;
                }
            };

            if turn.attempted.contains(&proposed.signature()) {
                info!(task_id = %ctx.task_id, tool = %proposed.tool, "repeated tool call, ending planning");
                break;
            }

            // after_model hooks may have rewritten or cleared the call
            let action = ctx
                .llm_response
                .as_ref()
                .and_then(|r| {
                    r.pending_tool_calls()
                        .iter()
                        .find_map(|c| c.to_action(proposed.reason.clone()))
                });
            let Some(action) = action else {
                let reason = ctx
                    .metadata
                    .get_str("hitlRejectionReason")
                    .unwrap_or("removed before execution")
                    .to_string();
                info!(task_id = %ctx.task_id, tool = %proposed.tool, reason = %reason, "tool call not executed");
                let observation = ToolObservation::failure(
                    &proposed.tool,
                    proposed.input.clone(),
                    format!("Tool call rejected: {reason}"),
                );
                self.record_observation(&ctx, turn, observation);
                break;
            };

            if action.is_clarification() {
                ctx = self.clarify(ctx, turn, &handler, step, action).await?;
                break;
            }

            if !turn.attempted.insert(action.signature()) {
                info!(task_id = %ctx.task_id, tool = %action.tool, "repeated tool call, ending planning");
                break;
            }

            ctx = ctx.with_state(AgentPhase::ToolCall);
            let call = ToolCallRequest::from_action(format!("call_{step}"), &action);
            let observation = self.pipeline.wrap_tool_call(&ctx, call, &handler).await?;
            ctx.runtime.check_cancelled()?;

            let ok = observation.ok;
            let output = observation.output.clone();
            self.record_observation(&ctx, turn, observation);

            if ok {
                if action.is_delegation() {
                    info!(task_id = %ctx.task_id, "delegation finished, ending planning");
                    break;
                }
            } else if turn.observations.iter().all(|o| !o.ok) || is_unrecoverable_failure(&output) {
                info!(task_id = %ctx.task_id, tool = %action.tool, "tool failed, ending planning");
                break;
            }
        }
        Ok(ctx)
    }

    async fn call_planner(
        &self,
        ctx: MiddlewareContext,
        turn: &mut TurnProgress,
        step: u32,
    ) -> AppResult<(MiddlewareContext, String)> {
        let ctx = self.pipeline.before_model(ctx).await?;
        ctx.runtime.check_cancelled()?;

        let planner = ctx.runtime.planner.clone();
        let todos = ctx.todos.as_deref();
        let system = prompts::planner_system_prompt(
            ctx.chat_mode,
            &ctx.tools,
            todos,
            ctx.runtime.sandbox.virtual_root(),
        );
        let request = GenerateRequest::new(
            planner.clone(),
            prompts::planner_messages(&ctx.messages, &turn.observations),
        )
        .with_system(system)
        .with_cancel(ctx.runtime.cancel.clone());

        ctx.runtime.emit(ProgressUpdate::new(
            ProgressStage::Model,
            format!("Calling planner {}/{}", planner.provider, planner.model),
        ));
        let response = self
            .models
            .generate_text(request)
            .await
            .map_err(|e| AppError::from_llm(&planner, e))?;
        turn.planner_calls += 1;
        turn.latency_ms += response.latency_ms;
        debug!(task_id = %ctx.task_id, step, latency_ms = response.latency_ms, "planner replied");

        let raw = response.text;
        let mut llm_response = LlmResponse::text(raw.clone());
        // A repeat never reaches the after_model gates; planning ends on it.
        if let Some(PlannerAction::Tool(action)) = try_parse_planner_action(&raw) {
            if !turn.attempted.contains(&action.signature()) {
                llm_response = llm_response
                    .with_tool_calls(vec![ToolCallRequest::from_action(format!("call_{step}"), &action)]);
            }
        }
        let ctx = self
            .pipeline
            .after_model(ctx.with_llm_response(Some(llm_response)))
            .await?;
        Ok((ctx, raw))
    }

    async fn clarify(
        &self,
        ctx: MiddlewareContext,
        turn: &mut TurnProgress,
        handler: &ExecutorHandler,
        step: u32,
        action: ToolAction,
    ) -> AppResult<MiddlewareContext> {
        let ctx = ctx.with_state(AgentPhase::Clarifying);
        let call = ToolCallRequest::from_action(format!("call_{step}"), &action);
        let observation = self.pipeline.wrap_tool_call(&ctx, call, handler).await?;
        turn.observations.push(observation);

        let question = clarification_question(&action.input);
        let (payload, latency_ms) = clarification::generate_options(&ctx, &question).await?;
        turn.latency_ms += latency_ms;

        let reply = clarification::format_reply(&payload);
        ctx.runtime
            .emit(ProgressUpdate::clarification(question, payload));
        info!(task_id = %ctx.task_id, "turn ends with a clarification question");
        turn.clarification_reply = Some(reply);
        Ok(ctx)
    }

    fn record_observation(
        &self,
        ctx: &MiddlewareContext,
        turn: &mut TurnProgress,
        observation: ToolObservation,
    ) {
        let status = if observation.ok { "ok" } else { "failed" };
        if !observation.ok {
            warn!(task_id = %ctx.task_id, tool = %observation.tool, output = %observation.output, "tool failed");
        }
        ctx.runtime.emit(ProgressUpdate::new(
            ProgressStage::Tool,
            format!(
                "{} {status}: {}",
                observation.tool,
                preview(&observation.output, self.settings.tool_event_preview_chars)
            ),
        ));
        turn.observations.push(observation);
    }

    // ------------------------------------------------------------------------
    // Synthesis
    // ------------------------------------------------------------------------

    async fn synthesize(
        &self,
        ctx: MiddlewareContext,
        turn: &mut TurnProgress,
        on_delta: Option<OnDelta>,
    ) -> AppResult<(MiddlewareContext, GenerateResponse)> {
        ctx.runtime.check_cancelled()?;
        let ctx = self
            .pipeline
            .before_model(ctx.with_state(AgentPhase::Synthesizing))
            .await?;
        ctx.runtime.check_cancelled()?;

        let synthesizer = ctx.runtime.synthesizer.clone();
        let request = GenerateRequest::new(
            synthesizer.clone(),
            prompts::synthesis_messages(&ctx.messages, &turn.observations, turn.draft.as_deref()),
        )
        .with_system(prompts::synthesis_system_prompt(ctx.chat_mode))
        .with_cancel(ctx.runtime.cancel.clone());

        ctx.runtime.emit(ProgressUpdate::new(
            ProgressStage::Model,
            format!("Writing reply with {}/{}", synthesizer.provider, synthesizer.model),
        ));
        let forward = move |delta: &str| {
            if let Some(on_delta) = &on_delta {
                on_delta(delta);
            }
        };
        let response = self
            .models
            .generate_text_stream(request, &forward)
            .await
            .map_err(|e| AppError::from_llm(&synthesizer, e))?;
        turn.latency_ms += response.latency_ms;

        let text = if response.text.trim().is_empty() {
            turn.draft.clone().unwrap_or_default()
        } else {
            response.text.clone()
        };
        let ctx = self
            .pipeline
            .after_model(ctx.with_llm_response(Some(LlmResponse::text(text))))
            .await?;
        Ok((ctx, response))
    }
}

// ============================================================================
// Builder
// ============================================================================

pub struct ToolPlanningChatAgentBuilder {
    settings: AgentSettings,
    models: Arc<dyn ModelsFactory>,
    executor: Arc<dyn ToolExecutor>,
    router: Option<Arc<dyn ModelRouter>>,
    store: Option<Arc<dyn ConversationStore>>,
    sandbox: Option<Arc<SandboxService>>,
    broker: Option<Arc<ApprovalBroker>>,
    limiter: Option<Arc<ProviderRateLimiter>>,
    pipeline: Option<MiddlewarePipeline>,
}

impl ToolPlanningChatAgentBuilder {
    /// Defaults to a `ProfileRouter` over `settings.routing`.
    pub fn router(mut self, router: Arc<dyn ModelRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn sandbox(mut self, sandbox: Arc<SandboxService>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn broker(mut self, broker: Arc<ApprovalBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Share one limiter between agents calling the same providers.
    pub fn rate_limiter(mut self, limiter: Arc<ProviderRateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Replace the default pipeline.
    pub fn pipeline(mut self, pipeline: MiddlewarePipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn build(self) -> AppResult<ToolPlanningChatAgent> {
        self.settings.validate().map_err(AppError::config)?;

        let router = self
            .router
            .unwrap_or_else(|| Arc::new(ProfileRouter::new(self.settings.routing.clone())));
        let limiter = self.limiter.unwrap_or_default();
        let models: Arc<dyn ModelsFactory> = Arc::new(RateLimitedModels::new(self.models, limiter));
        let sandbox = self
            .sandbox
            .unwrap_or_else(|| Arc::new(SandboxService::new(self.settings.sandbox.clone())));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryConversationStore::new()));
        let broker = self.broker.unwrap_or_default();
        let pipeline = self.pipeline.unwrap_or_else(|| {
            default_pipeline(self.settings.workspace_root.clone(), Arc::clone(&broker))
        });

        debug!(middlewares = ?pipeline.names(), "tool planning agent built");
        Ok(ToolPlanningChatAgent {
            settings: Arc::new(self.settings),
            router,
            models,
            executor: self.executor,
            sandbox,
            store,
            broker,
            pipeline,
        })
    }
}
