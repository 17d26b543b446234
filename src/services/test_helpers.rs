//! Shared fixtures for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cascade_agent_llm::{
    DeltaSink, GenerateRequest, GenerateResponse, LlmError, LlmResult, ModelRole, ModelsFactory,
    ProviderRuntimeConfig, RuntimeTarget,
};
use cascade_agent_tools::{SandboxConfig, SandboxService};
use tokio_util::sync::CancellationToken;

use crate::models::settings::AgentSettings;
use crate::services::middleware::context::{AgentRuntime, MiddlewareContext};
use crate::storage::conversation_store::{ConversationStore, InMemoryConversationStore};

/// Model double that replays scripted replies in order.
#[derive(Default)]
pub struct ScriptedModels {
    replies: Mutex<VecDeque<LlmResult<String>>>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedModels {
    pub fn new(replies: Vec<LlmResult<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok(t.to_string())).collect())
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelsFactory for ScriptedModels {
    async fn generate_text(&self, request: GenerateRequest) -> LlmResult<GenerateResponse> {
        let target = request.target.clone();
        self.requests.lock().unwrap().push(request);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::other("no scripted reply left")))?;
        Ok(GenerateResponse {
            provider: target.provider,
            model: target.model,
            text: reply,
            latency_ms: 5,
            usage: None,
        })
    }

    async fn generate_text_stream(
        &self,
        request: GenerateRequest,
        on_delta: &DeltaSink,
    ) -> LlmResult<GenerateResponse> {
        let response = self.generate_text(request).await?;
        on_delta(&response.text);
        Ok(response)
    }
}

pub fn target(role: ModelRole) -> RuntimeTarget {
    RuntimeTarget {
        role,
        profile_id: format!("{}-profile", role.as_str()),
        provider: "openai".to_string(),
        model: "gpt-test".to_string(),
        runtime_config: ProviderRuntimeConfig::default(),
        temperature: None,
        max_tokens: None,
    }
}

pub fn test_runtime_with(
    models: Arc<dyn ModelsFactory>,
    store: Arc<dyn ConversationStore>,
    settings: AgentSettings,
) -> AgentRuntime {
    AgentRuntime::new(
        Arc::new(settings),
        models,
        Arc::new(SandboxService::new(SandboxConfig::default())),
        store,
        target(ModelRole::Planner),
        target(ModelRole::Synthesizer),
        None,
        CancellationToken::new(),
    )
}

pub fn test_context_with(models: Arc<dyn ModelsFactory>, message: &str) -> MiddlewareContext {
    let runtime = test_runtime_with(
        models,
        Arc::new(InMemoryConversationStore::new()),
        AgentSettings::default(),
    );
    MiddlewareContext::new("session-1", "task-1", message, runtime)
}

pub fn test_context(message: &str) -> MiddlewareContext {
    test_context_with(Arc::new(ScriptedModels::default()), message)
}
