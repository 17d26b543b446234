//! Model Call Trait
//!
//! Defines the common interface through which the agent executes model calls.
//! Concrete HTTP/stream transports and their retry policies live behind this
//! trait and are not part of this crate.

use async_trait::async_trait;

use super::types::{GenerateRequest, GenerateResponse, LlmResult};

/// Receives streamed text deltas. Each delta only lives for the call.
pub type DeltaSink = dyn for<'d> Fn(&'d str) + Send + Sync;

/// Executes or streams one model call given a resolved target.
///
/// Implementations should observe `request.cancel` and return
/// `LlmError::Cancelled` when it fires mid-call.
#[async_trait]
pub trait ModelsFactory: Send + Sync {
    /// Run a call and return the complete text.
    async fn generate_text(&self, request: GenerateRequest) -> LlmResult<GenerateResponse>;

    /// Run a call, forwarding each text delta to `on_delta`, and return the
    /// complete text once the stream ends.
    async fn generate_text_stream(
        &self,
        request: GenerateRequest,
        on_delta: &DeltaSink,
    ) -> LlmResult<GenerateResponse>;
}

/// Providers that run locally and never need an API key.
const KEYLESS_PROVIDERS: &[&str] = &["ollama", "lmstudio", "local"];

/// Whether a provider requires an API key to be usable.
pub fn provider_requires_api_key(provider: &str) -> bool {
    let normalized = provider.trim().to_ascii_lowercase();
    !KEYLESS_PROVIDERS.contains(&normalized.as_str())
}
