//! Cascade Agent LLM
//!
//! Model-facing plumbing for the tool-planning agent:
//! - role → provider/model routing (`ModelRouter`, `ProfileRouter`)
//! - the model-call abstraction (`ModelsFactory`)
//! - per-provider call spacing (`ProviderRateLimiter`, `RateLimitedModels`)
//!
//! Concrete provider transports implement `ModelsFactory` outside this crate.

pub mod provider;
pub mod rate_limit;
pub mod router;
pub mod types;

pub use provider::{provider_requires_api_key, DeltaSink, ModelsFactory};
pub use rate_limit::{min_interval, ProviderRateLimiter, RateLimitedModels};
pub use router::{ModelProfile, ModelRouter, ProfileRouter, ProfileRouterConfig};
pub use types::*;
