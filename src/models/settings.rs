//! Settings Models
//!
//! Agent configuration stored in settings.json.

use std::path::PathBuf;

use cascade_agent_core::ChatMode;
use cascade_agent_llm::ProfileRouterConfig;
use cascade_agent_tools::SandboxConfig;
use serde::{Deserialize, Serialize};

use crate::utils::paths::default_workspace_root;

/// Smallest non-zero provider rate. Zero still means unlimited.
pub const MIN_REQUESTS_PER_SECOND: f64 = 0.001;

fn default_max_steps() -> u32 {
    6
}

fn default_workspace_root_path() -> PathBuf {
    default_workspace_root().unwrap_or_else(|_| std::env::temp_dir().join("cascade-agent-workspaces"))
}

fn default_tool_event_preview_chars() -> usize {
    400
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Sections
// ============================================================================

fn default_max_messages() -> usize {
    24
}

fn default_max_chars() -> usize {
    16_000
}

fn default_keep_recent() -> usize {
    8
}

/// When and how older conversation turns are folded into a summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummarizationSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Trigger when the message count exceeds this
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Trigger when the total character count exceeds this
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Most recent messages kept verbatim
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,
}

impl Default for SummarizationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_messages: default_max_messages(),
            max_chars: default_max_chars(),
            keep_recent: default_keep_recent(),
        }
    }
}

fn default_max_tasks() -> usize {
    3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubagentSettings {
    /// Upper bound on sub-tasks one delegation action may request
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,
}

impl Default for SubagentSettings {
    fn default() -> Self {
        Self {
            max_tasks: default_max_tasks(),
        }
    }
}

fn default_hitl_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitlSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds to wait for a decision before rejecting
    #[serde(default = "default_hitl_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HitlSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: default_hitl_timeout_secs(),
        }
    }
}

// ============================================================================
// AgentSettings
// ============================================================================

/// Complete agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Maximum planner calls per request
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Parent directory of per-task workspaces
    #[serde(default = "default_workspace_root_path")]
    pub workspace_root: PathBuf,
    #[serde(default)]
    pub chat_mode: ChatMode,
    #[serde(default)]
    pub summarization: SummarizationSettings,
    #[serde(default)]
    pub subagent: SubagentSettings,
    #[serde(default)]
    pub hitl: HitlSettings,
    /// Characters of tool output included in `tool` progress events
    #[serde(default = "default_tool_event_preview_chars")]
    pub tool_event_preview_chars: usize,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub routing: ProfileRouterConfig,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            workspace_root: default_workspace_root_path(),
            chat_mode: ChatMode::default(),
            summarization: SummarizationSettings::default(),
            subagent: SubagentSettings::default(),
            hitl: HitlSettings::default(),
            tool_event_preview_chars: default_tool_event_preview_chars(),
            sandbox: SandboxConfig::default(),
            routing: ProfileRouterConfig::default(),
        }
    }
}

/// Settings update request (partial update)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SettingsUpdate {
    pub max_steps: Option<u32>,
    pub workspace_root: Option<PathBuf>,
    pub chat_mode: Option<ChatMode>,
    pub summarization_enabled: Option<bool>,
    pub hitl_enabled: Option<bool>,
    pub subagent_max_tasks: Option<usize>,
    pub routing: Option<ProfileRouterConfig>,
}

impl AgentSettings {
    /// Apply a partial update to the settings
    pub fn apply_update(&mut self, update: SettingsUpdate) {
        if let Some(max_steps) = update.max_steps {
            self.max_steps = max_steps;
        }
        if let Some(root) = update.workspace_root {
            self.workspace_root = root;
        }
        if let Some(mode) = update.chat_mode {
            self.chat_mode = mode;
        }
        if let Some(enabled) = update.summarization_enabled {
            self.summarization.enabled = enabled;
        }
        if let Some(enabled) = update.hitl_enabled {
            self.hitl.enabled = enabled;
        }
        if let Some(max) = update.subagent_max_tasks {
            self.subagent.max_tasks = max;
        }
        if let Some(routing) = update.routing {
            self.routing = routing;
        }
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=50).contains(&self.max_steps) {
            return Err(format!(
                "Invalid max_steps: {}. Must be between 1 and 50",
                self.max_steps
            ));
        }

        if self.summarization.keep_recent == 0 {
            return Err("summarization.keep_recent must be at least 1".to_string());
        }

        if self.hitl.timeout_secs == 0 {
            return Err("hitl.timeout_secs must be at least 1 second".to_string());
        }

        if self.subagent.max_tasks == 0 {
            return Err("subagent.max_tasks must be at least 1".to_string());
        }

        for profile in &self.routing.profiles {
            if let Some(rps) = profile.requests_per_second {
                if !rps.is_finite() || rps < 0.0 {
                    return Err(format!(
                        "Invalid requests_per_second for profile '{}': {}",
                        profile.id, rps
                    ));
                }
                if rps > 0.0 && rps < MIN_REQUESTS_PER_SECOND {
                    return Err(format!(
                        "Invalid requests_per_second for profile '{}': {}. Must be 0 or at least {}",
                        profile.id, rps, MIN_REQUESTS_PER_SECOND
                    ));
                }
            }
        }

        Ok(())
    }
}
