//! Tool Execution
//!
//! `ToolExecutor` is the seam between the planning loop and tool backends.
//! Execution never fails: every outcome, including bad arguments, missing
//! paths and cancellation, comes back as a `ToolObservation` with `ok=false`.
//!
//! `WorkspaceToolExecutor` is the built-in filesystem backend. Shell, web and
//! delegation backends implement the same trait elsewhere.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ToolError;
use crate::planner_action::ToolAction;
use crate::sandbox::SandboxService;

/// Upper bound on characters returned by `read_file`.
const MAX_READ_CHARS: usize = 20_000;

/// Recorded result of one tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolObservation {
    pub tool: String,
    pub input: Value,
    pub ok: bool,
    pub output: String,
}

impl ToolObservation {
    pub fn success(tool: impl Into<String>, input: Value, output: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            input,
            ok: true,
            output: output.into(),
        }
    }

    pub fn failure(tool: impl Into<String>, input: Value, output: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            input,
            ok: false,
            output: output.into(),
        }
    }

    pub fn from_action(action: &ToolAction, result: Result<String, String>) -> Self {
        match result {
            Ok(output) => Self::success(&action.tool, action.input.clone(), output),
            Err(error) => Self::failure(&action.tool, action.input.clone(), error),
        }
    }
}

/// Name and one-line description of a tool, for planner prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Tools this executor can run.
    fn available_tools(&self) -> Vec<ToolDescriptor>;

    /// Execute one planner tool action inside `workspace_path`.
    async fn execute_planner_tool(
        &self,
        action: &ToolAction,
        sandbox: &SandboxService,
        workspace_path: &Path,
        cancel: &CancellationToken,
    ) -> ToolObservation;
}

/// Filesystem tools scoped to the task workspace.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceToolExecutor;

impl WorkspaceToolExecutor {
    pub fn new() -> Self {
        Self
    }

    async fn execute_list_dir(
        &self,
        input: &Value,
        sandbox: &SandboxService,
        workspace: &Path,
    ) -> Result<String, String> {
        let raw = input
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or(sandbox.virtual_root());
        let path = sandbox.resolve_path(workspace, raw).map_err(|e| e.to_string())?;
        if !path.is_dir() {
            return Err(ToolError::not_found(raw).to_string());
        }

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| format!("failed to list {raw}: {e}"))?;
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| format!("failed to list {raw}: {e}"))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
        }
        entries.sort();

        if entries.is_empty() {
            Ok(format!("{raw} is empty"))
        } else {
            Ok(entries.join("\n"))
        }
    }

    async fn execute_read_file(
        &self,
        input: &Value,
        sandbox: &SandboxService,
        workspace: &Path,
    ) -> Result<String, String> {
        let raw = required_str(input, "read_file", "path")?;
        let path = sandbox.resolve_path(workspace, raw).map_err(|e| e.to_string())?;
        if !path.is_file() {
            return Err(ToolError::not_found(raw).to_string());
        }
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| format!("failed to read {raw}: {e}"))?;

        if content.chars().count() > MAX_READ_CHARS {
            let head: String = content.chars().take(MAX_READ_CHARS).collect();
            Ok(format!("{head}\n... (truncated)"))
        } else {
            Ok(content)
        }
    }

    async fn execute_write_file(
        &self,
        input: &Value,
        sandbox: &SandboxService,
        workspace: &Path,
    ) -> Result<String, String> {
        let raw = required_str(input, "write_file", "path")?;
        let content = required_str(input, "write_file", "content")?;
        let path = sandbox.resolve_path(workspace, raw).map_err(|e| e.to_string())?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("failed to create parent of {raw}: {e}"))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| format!("failed to write {raw}: {e}"))?;
        Ok(format!("wrote {} bytes to {raw}", content.len()))
    }
}

fn required_str<'a>(input: &'a Value, tool: &str, param: &str) -> Result<&'a str, String> {
    input
        .get(param)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("{tool}: missing required parameter: {param}"))
}

#[async_trait]
impl ToolExecutor for WorkspaceToolExecutor {
    fn available_tools(&self) -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new("list_dir", "List entries of a directory. input: {\"path\"}"),
            ToolDescriptor::new("read_file", "Read a UTF-8 text file. input: {\"path\"}"),
            ToolDescriptor::new(
                "write_file",
                "Create or overwrite a text file. input: {\"path\", \"content\"}",
            ),
        ]
    }

    async fn execute_planner_tool(
        &self,
        action: &ToolAction,
        sandbox: &SandboxService,
        workspace_path: &Path,
        cancel: &CancellationToken,
    ) -> ToolObservation {
        if cancel.is_cancelled() {
            return ToolObservation::failure(&action.tool, action.input.clone(), "cancelled");
        }

        debug!(tool = %action.tool, "executing workspace tool");
        let result = match action.tool.as_str() {
            "list_dir" => self.execute_list_dir(&action.input, sandbox, workspace_path).await,
            "read_file" => self.execute_read_file(&action.input, sandbox, workspace_path).await,
            "write_file" => self.execute_write_file(&action.input, sandbox, workspace_path).await,
            other => Err(format!("unsupported tool: {other}")),
        };
        ToolObservation::from_action(action, result)
    }
}
