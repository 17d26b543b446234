//! Error Handling
//!
//! Unified error types for the agent runtime.
//! Uses thiserror for ergonomic error definitions.

use cascade_agent_llm::{LlmError, ModelRole, RoutingError, RuntimeTarget};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Validation errors (rejected before any model call)
    #[error("Validation error: {0}")]
    Validation(String),

    /// A role could not be bound to a usable model profile
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// A model call failed; carries the binding it was made with
    #[error("{role} model call failed (profile={profile_id}, provider={provider}, model={model}): {message}")]
    ModelCall {
        role: ModelRole,
        profile_id: String,
        provider: String,
        model: String,
        message: String,
    },

    /// A middleware hook failed
    #[error("{middleware} failed at {phase}: {message}")]
    Middleware {
        middleware: String,
        phase: String,
        message: String,
    },

    /// The middleware pipeline was assembled in an invalid order
    #[error("Pipeline configuration error: {0}")]
    PipelineConfig(String),

    /// The request's abort signal fired
    #[error("Request cancelled")]
    Cancelled,

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a pipeline configuration error
    pub fn pipeline_config(msg: impl Into<String>) -> Self {
        Self::PipelineConfig(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Annotate a failed model call with the binding it used.
    pub fn model_call(target: &RuntimeTarget, message: impl Into<String>) -> Self {
        Self::ModelCall {
            role: target.role,
            profile_id: target.profile_id.clone(),
            provider: target.provider.clone(),
            model: target.model.clone(),
            message: message.into(),
        }
    }

    /// Map a model-call failure, keeping cancellation distinguishable.
    pub fn from_llm(target: &RuntimeTarget, err: LlmError) -> Self {
        if err.is_cancelled() {
            Self::Cancelled
        } else {
            Self::model_call(target, err.to_string())
        }
    }

    /// Wrap a hook failure with the middleware name and phase.
    ///
    /// Errors that are already middleware failures or cancellations pass
    /// through unchanged so nested chains do not double-wrap.
    pub fn middleware(middleware: &str, phase: impl ToString, err: AppError) -> Self {
        match err {
            AppError::Middleware { .. } | AppError::Cancelled => err,
            other => Self::Middleware {
                middleware: middleware.to_string(),
                phase: phase.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Whether this error means the request was aborted.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }
}

/// Convert AppError to a string suitable for frontend responses
impl From<AppError> for String {
    fn from(err: AppError) -> String {
        err.to_string()
    }
}
