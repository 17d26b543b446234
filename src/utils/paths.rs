//! Cross-Platform Path Utilities
//!
//! Functions for resolving application directories across platforms.
//! Everything lives under `~/.cascade-agent/`.

use std::path::{Path, PathBuf};

use crate::utils::error::{AppError, AppResult};

/// Get the user's home directory
pub fn home_dir() -> AppResult<PathBuf> {
    dirs::home_dir().ok_or_else(|| AppError::config("Could not determine home directory"))
}

/// Get the application directory (~/.cascade-agent/)
pub fn cascade_agent_dir() -> AppResult<PathBuf> {
    Ok(home_dir()?.join(".cascade-agent"))
}

/// Get the settings file path (~/.cascade-agent/settings.json)
pub fn settings_path() -> AppResult<PathBuf> {
    Ok(cascade_agent_dir()?.join("settings.json"))
}

/// Get the default task workspace root (~/.cascade-agent/workspaces/)
pub fn default_workspace_root() -> AppResult<PathBuf> {
    Ok(cascade_agent_dir()?.join("workspaces"))
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> AppResult<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
