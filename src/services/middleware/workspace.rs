//! Workspace Middleware
//!
//! Allocates the per-task directory tree before the agent starts:
//!
//! ```text
//! {workspace_root}/task_{task_id}/
//!   input/
//!   staging/
//!   output/
//! ```
//!
//! Allocation is idempotent. `cleanup_stale_workspaces` removes old task
//! directories and is meant for maintenance jobs, not the request path.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::context::MiddlewareContext;
use super::pipeline::{Middleware, Phase};
use crate::utils::error::AppResult;

pub const WORKSPACE_SUBDIRS: [&str; 3] = ["input", "staging", "output"];

const TASK_DIR_PREFIX: &str = "task_";

pub struct WorkspaceMiddleware {
    root: PathBuf,
}

impl WorkspaceMiddleware {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn task_dir(&self, task_id: &str) -> PathBuf {
        self.root.join(format!("{TASK_DIR_PREFIX}{task_id}"))
    }
}

#[async_trait]
impl Middleware for WorkspaceMiddleware {
    fn name(&self) -> &str {
        "workspace"
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::BeforeAgent]
    }

    async fn before_agent(&self, ctx: MiddlewareContext) -> AppResult<MiddlewareContext> {
        let task_dir = self.task_dir(&ctx.task_id);
        for sub in WORKSPACE_SUBDIRS {
            tokio::fs::create_dir_all(task_dir.join(sub)).await?;
        }
        debug!(task_id = %ctx.task_id, path = %task_dir.display(), "task workspace ready");
        Ok(ctx.with_workspace_path(task_dir))
    }
}

/// Remove `task_*` directories under `root` last modified more than `max_age` ago.
///
/// Returns how many were removed. Entries that cannot be inspected or
/// removed are skipped.
pub fn cleanup_stale_workspaces(root: &Path, max_age: Duration) -> AppResult<usize> {
    if !root.exists() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut removed = 0;
    for entry in std::fs::read_dir(root)? {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with(TASK_DIR_PREFIX) {
            continue;
        }
        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(_) => continue,
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age < max_age {
            continue;
        }
        match std::fs::remove_dir_all(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %entry.path().display(), error = %e, "failed to remove stale workspace"),
        }
    }

    if removed > 0 {
        info!(removed, root = %root.display(), "removed stale task workspaces");
    }
    Ok(removed)
}
