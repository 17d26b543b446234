//! Per-Provider Rate Limiting
//!
//! Every provider gets one queue slot shared by all concurrent requests:
//! calls to the same provider run one at a time and start no closer together
//! than `1 / requests_per_second`. Different providers do not block each other.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use super::provider::{DeltaSink, ModelsFactory};
use super::types::{GenerateRequest, GenerateResponse, LlmError, LlmResult};

/// Minimum spacing between call starts for a requests-per-second budget.
///
/// `None`, zero, negative or non-finite budgets mean "no spacing", as does a
/// budget so small that its interval overflows `Duration`.
pub fn min_interval(requests_per_second: Option<f64>) -> Option<Duration> {
    let rps = requests_per_second?;
    if !rps.is_finite() || rps <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(1.0 / rps).ok()
}

type Slot = Arc<tokio::sync::Mutex<Option<Instant>>>;

/// Shared limiter keyed by provider name.
#[derive(Debug, Default)]
pub struct ProviderRateLimiter {
    slots: Mutex<HashMap<String, Slot>>,
}

impl ProviderRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, provider: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(slots.entry(provider.to_string()).or_default())
    }

    /// Run `call` in the provider's queue.
    ///
    /// The slot stays held until `call` completes, so at most one call per
    /// provider is in flight.
    pub async fn run<F, T>(&self, provider: &str, requests_per_second: Option<f64>, call: F) -> T
    where
        F: Future<Output = T>,
    {
        let slot = self.slot(provider);
        let mut last_start = slot.lock().await;

        if let (Some(prev), Some(interval)) = (*last_start, min_interval(requests_per_second)) {
            let elapsed = prev.elapsed();
            if elapsed < interval {
                let wait = interval - elapsed;
                debug!(provider, wait_ms = wait.as_millis() as u64, "rate limiter delaying call");
                tokio::time::sleep(wait).await;
            }
        }

        *last_start = Some(Instant::now());
        call.await
    }
}

/// `ModelsFactory` decorator that routes every call through a shared limiter.
pub struct RateLimitedModels {
    inner: Arc<dyn ModelsFactory>,
    limiter: Arc<ProviderRateLimiter>,
}

impl RateLimitedModels {
    pub fn new(inner: Arc<dyn ModelsFactory>, limiter: Arc<ProviderRateLimiter>) -> Self {
        Self { inner, limiter }
    }

    async fn queued<F>(&self, request: &GenerateRequest, call: F) -> LlmResult<GenerateResponse>
    where
        F: Future<Output = LlmResult<GenerateResponse>> + Send,
    {
        let provider = request.target.provider.clone();
        let rps = request.target.runtime_config.requests_per_second;
        let cancel = request.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => Err(LlmError::Cancelled),
            result = self.limiter.run(&provider, rps, call) => result,
        }
    }
}

#[async_trait]
impl ModelsFactory for RateLimitedModels {
    async fn generate_text(&self, request: GenerateRequest) -> LlmResult<GenerateResponse> {
        let inner = Arc::clone(&self.inner);
        let call_request = request.clone();
        self.queued(&request, async move { inner.generate_text(call_request).await })
            .await
    }

    async fn generate_text_stream(
        &self,
        request: GenerateRequest,
        on_delta: &DeltaSink,
    ) -> LlmResult<GenerateResponse> {
        let inner = Arc::clone(&self.inner);
        let call_request = request.clone();
        self.queued(&request, async move {
            inner.generate_text_stream(call_request, on_delta).await
        })
        .await
    }
}
