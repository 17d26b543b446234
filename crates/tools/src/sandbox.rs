//! Sandbox Service
//!
//! The bounded environment tools run in: a virtual root (`/mnt/workspace`)
//! that maps onto the per-task workspace directory, and the set of shell
//! commands tools may invoke.
//!
//! Executors receive the workspace path explicitly. The ambient
//! "current workspace" binding is kept for backends that still read it, and is
//! only reachable through a `WorkspaceLease` that releases on drop.

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ToolError, ToolResult};

/// Virtual path tools use to address the task workspace.
pub const DEFAULT_VIRTUAL_ROOT: &str = "/mnt/workspace";

fn default_virtual_root() -> String {
    DEFAULT_VIRTUAL_ROOT.to_string()
}

fn default_allowed_commands() -> Vec<String> {
    ["ls", "cat", "head", "tail", "wc", "grep", "find", "echo", "pwd"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_virtual_root")]
    pub virtual_root: String,
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            virtual_root: default_virtual_root(),
            allowed_commands: default_allowed_commands(),
        }
    }
}

#[derive(Debug)]
struct Binding {
    lease_id: Uuid,
    workspace: PathBuf,
}

/// Shared sandbox, one per process.
#[derive(Debug, Default)]
pub struct SandboxService {
    config: SandboxConfig,
    current: Mutex<Option<Binding>>,
}

impl SandboxService {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            current: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn virtual_root(&self) -> &str {
        &self.config.virtual_root
    }

    /// Whether the first word of `command` is an allowed program.
    pub fn is_command_allowed(&self, command: &str) -> bool {
        command
            .split_whitespace()
            .next()
            .map(|program| self.config.allowed_commands.iter().any(|c| c == program))
            .unwrap_or(false)
    }

    /// Bind `workspace` as the current workspace until the lease drops.
    ///
    /// A newer lease replaces an older one; the older lease then releases
    /// nothing when it drops.
    pub fn bind_workspace(self: &Arc<Self>, workspace: impl Into<PathBuf>) -> WorkspaceLease {
        let lease_id = Uuid::new_v4();
        let workspace = workspace.into();
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = current.as_ref() {
            warn!(
                previous = %previous.workspace.display(),
                next = %workspace.display(),
                "sandbox workspace rebound while another lease is active"
            );
        }
        debug!(workspace = %workspace.display(), "sandbox workspace bound");
        *current = Some(Binding {
            lease_id,
            workspace,
        });
        WorkspaceLease {
            sandbox: Arc::clone(self),
            lease_id,
        }
    }

    pub fn current_workspace(&self) -> Option<PathBuf> {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|b| b.workspace.clone())
    }

    fn release(&self, lease_id: Uuid) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if current.as_ref().map(|b| b.lease_id) == Some(lease_id) {
            debug!("sandbox workspace released");
            *current = None;
        }
    }

    /// Map a tool-supplied path onto the real filesystem under `workspace`.
    ///
    /// Accepts the virtual root and paths below it, or workspace-relative
    /// paths. Any other absolute path, or a `..` climbing out of the
    /// workspace, is an `invalid_path` error.
    pub fn resolve_path(&self, workspace: &Path, raw: &str) -> ToolResult<PathBuf> {
        let raw = raw.trim();
        let root = self.config.virtual_root.trim_end_matches('/');

        let relative = if raw.is_empty() || raw == root {
            ""
        } else if let Some(rest) = raw.strip_prefix(root).and_then(|r| r.strip_prefix('/')) {
            rest
        } else if Path::new(raw).is_absolute() {
            return Err(ToolError::invalid_path(raw, "outside the sandbox workspace"));
        } else {
            raw
        };

        let mut resolved = workspace.to_path_buf();
        let mut depth = 0usize;
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    if depth == 0 {
                        return Err(ToolError::invalid_path(raw, "escapes the sandbox workspace"));
                    }
                    resolved.pop();
                    depth -= 1;
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(ToolError::invalid_path(raw, "outside the sandbox workspace"));
                }
            }
        }
        Ok(resolved)
    }

    /// Whether `raw` addresses something inside the sandbox.
    pub fn contains_path(&self, raw: &str) -> bool {
        self.resolve_path(Path::new(""), raw).is_ok()
    }
}

/// Scoped ownership of the sandbox's current-workspace binding.
#[derive(Debug)]
pub struct WorkspaceLease {
    sandbox: Arc<SandboxService>,
    lease_id: Uuid,
}

impl WorkspaceLease {
    pub fn is_active(&self) -> bool {
        self.sandbox
            .current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|b| b.lease_id)
            == Some(self.lease_id)
    }
}

impl Drop for WorkspaceLease {
    fn drop(&mut self) {
        self.sandbox.release(self.lease_id);
    }
}
