//! Tool Errors
//!
//! Raised only while resolving sandbox paths. Executors turn these into
//! failed observations; they never escape `execute_planner_tool`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("invalid_path: {path} ({reason})")]
    InvalidPath { path: String, reason: String },

    #[error("path does not exist: {path}")]
    NotFound { path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }
}

pub type ToolResult<T> = Result<T, ToolError>;
