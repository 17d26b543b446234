//! LLM Types
//!
//! Core types for model routing and model calls.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Messages
// ============================================================================

/// Role of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// A single text message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }

    /// Length in characters (not bytes), so CJK text is counted fairly.
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

// ============================================================================
// Routing
// ============================================================================

/// Logical model role resolved by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    /// Decides per step whether to answer, call a tool or ask for clarification
    Planner,
    /// Produces the final streamed answer
    Synthesizer,
}

impl ModelRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelRole::Planner => "planner",
            ModelRole::Synthesizer => "synthesizer",
        }
    }
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credentials and transport knobs for one resolved binding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderRuntimeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Outbound call budget for this provider; `None` means unlimited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_per_second: Option<f64>,
}

/// Concrete provider/model binding for a role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeTarget {
    pub role: ModelRole,
    pub profile_id: String,
    pub provider: String,
    pub model: String,
    pub runtime_config: ProviderRuntimeConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Why a role could not be resolved to a usable binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingFailure {
    /// No profile is bound to the role
    Unbound,
    /// The bound profile id does not exist
    UnknownProfile,
    /// The bound profile is disabled
    Disabled,
    /// The provider needs an API key and none is configured
    MissingApiKey,
}

impl fmt::Display for RoutingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RoutingFailure::Unbound => "no model profile is bound to this role",
            RoutingFailure::UnknownProfile => "the bound model profile does not exist",
            RoutingFailure::Disabled => "the bound model profile is disabled",
            RoutingFailure::MissingApiKey => "the provider has no API key configured",
        };
        f.write_str(text)
    }
}

/// Fatal, non-retryable failure to resolve a role binding.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error(
    "{role} model unavailable (profile={}, provider={}): {reason}. Bind a model profile in Settings",
    .profile_id.as_deref().unwrap_or("none"),
    .provider.as_deref().unwrap_or("none")
)]
pub struct RoutingError {
    pub role: ModelRole,
    pub profile_id: Option<String>,
    pub provider: Option<String>,
    pub reason: RoutingFailure,
}

// ============================================================================
// Model calls
// ============================================================================

/// Token usage reported by a provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// One model call.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub target: RuntimeTarget,
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Aborts in-flight I/O when cancelled.
    pub cancel: CancellationToken,
}

impl GenerateRequest {
    pub fn new(target: RuntimeTarget, messages: Vec<ChatMessage>) -> Self {
        let temperature = target.temperature;
        let max_tokens = target.max_tokens;
        Self {
            target,
            system: None,
            messages,
            temperature,
            max_tokens,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Result of one model call (streamed or not).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub provider: String,
    pub model: String,
    pub text: String,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageStats>,
}

/// LLM-specific errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LlmError {
    /// Authentication failed (invalid API key)
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },
    /// Rate limit exceeded
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<u32>,
    },
    /// Model not found or not available
    #[error("Model not found: {model}")]
    ModelNotFound { model: String },
    /// Invalid request (bad parameters)
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },
    /// Server error from the provider
    #[error("Server error: {message}")]
    ServerError {
        message: String,
        status: Option<u16>,
    },
    /// Network/connection error
    #[error("Network error: {message}")]
    NetworkError { message: String },
    /// Response parsing error
    #[error("Parse error: {message}")]
    ParseError { message: String },
    /// Provider not available (e.g., local server not running)
    #[error("Provider unavailable: {message}")]
    ProviderUnavailable { message: String },
    /// The call observed its cancellation token
    #[error("Model call cancelled")]
    Cancelled,
    /// Other error
    #[error("{message}")]
    Other { message: String },
}

impl LlmError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, LlmError::Cancelled)
    }
}

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;
