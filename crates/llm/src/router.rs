//! Model Routing
//!
//! Resolves a logical role (`planner`, `synthesizer`) to a concrete
//! provider/model binding. `ProfileRouter` is the config-driven
//! implementation: role → profile id → profile.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::provider::provider_requires_api_key;
use super::types::{ModelRole, ProviderRuntimeConfig, RoutingError, RoutingFailure, RuntimeTarget};

/// Resolves role bindings. Any unusable binding is a fatal `RoutingError`.
pub trait ModelRouter: Send + Sync {
    fn resolve_runtime_target(&self, role: ModelRole) -> Result<RuntimeTarget, RoutingError>;
}

/// A named model profile the user configured in Settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    pub id: String,
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_second: Option<f64>,
}

fn default_enabled() -> bool {
    true
}

impl ModelProfile {
    pub fn new(id: impl Into<String>, provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            model: model.into(),
            api_key: None,
            base_url: None,
            enabled: true,
            temperature: None,
            max_tokens: None,
            requests_per_second: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    fn has_api_key(&self) -> bool {
        self.api_key
            .as_deref()
            .map(|k| !k.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Profiles plus the role → profile id bindings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileRouterConfig {
    #[serde(default)]
    pub profiles: Vec<ModelProfile>,
    #[serde(default)]
    pub roles: BTreeMap<ModelRole, String>,
}

impl ProfileRouterConfig {
    pub fn with_profile(mut self, profile: ModelProfile) -> Self {
        self.profiles.push(profile);
        self
    }

    pub fn bind(mut self, role: ModelRole, profile_id: impl Into<String>) -> Self {
        self.roles.insert(role, profile_id.into());
        self
    }
}

/// Config-driven router.
#[derive(Debug, Clone, Default)]
pub struct ProfileRouter {
    config: ProfileRouterConfig,
}

impl ProfileRouter {
    pub fn new(config: ProfileRouterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProfileRouterConfig {
        &self.config
    }
}

impl ModelRouter for ProfileRouter {
    fn resolve_runtime_target(&self, role: ModelRole) -> Result<RuntimeTarget, RoutingError> {
        let fail = |profile_id: Option<&str>, provider: Option<&str>, reason| RoutingError {
            role,
            profile_id: profile_id.map(str::to_string),
            provider: provider.map(str::to_string),
            reason,
        };

        let profile_id = self
            .config
            .roles
            .get(&role)
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| fail(None, None, RoutingFailure::Unbound))?;

        let profile = self
            .config
            .profiles
            .iter()
            .find(|p| &p.id == profile_id)
            .ok_or_else(|| fail(Some(profile_id), None, RoutingFailure::UnknownProfile))?;

        if !profile.enabled {
            return Err(fail(
                Some(&profile.id),
                Some(&profile.provider),
                RoutingFailure::Disabled,
            ));
        }

        if provider_requires_api_key(&profile.provider) && !profile.has_api_key() {
            return Err(fail(
                Some(&profile.id),
                Some(&profile.provider),
                RoutingFailure::MissingApiKey,
            ));
        }

        Ok(RuntimeTarget {
            role,
            profile_id: profile.id.clone(),
            provider: profile.provider.clone(),
            model: profile.model.clone(),
            runtime_config: ProviderRuntimeConfig {
                api_key: profile.api_key.clone(),
                base_url: profile.base_url.clone(),
                requests_per_second: profile.requests_per_second,
            },
            temperature: profile.temperature,
            max_tokens: profile.max_tokens,
        })
    }
}
