//! JSON Configuration Management
//!
//! Handles reading and writing the agent settings file.

use std::fs;
use std::path::{Path, PathBuf};

use crate::models::settings::{AgentSettings, SettingsUpdate};
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::{ensure_dir, settings_path};

/// Configuration service for managing agent settings
#[derive(Debug)]
pub struct ConfigService {
    settings_path: PathBuf,
    settings: AgentSettings,
}

impl ConfigService {
    /// Create a config service at the default location (~/.cascade-agent/settings.json)
    pub fn new() -> AppResult<Self> {
        Self::with_path(settings_path()?)
    }

    /// Create a config service backed by `path`, loading it or writing defaults
    pub fn with_path(path: impl Into<PathBuf>) -> AppResult<Self> {
        let settings_path = path.into();
        if let Some(parent) = settings_path.parent() {
            ensure_dir(parent)?;
        }

        let settings = if settings_path.exists() {
            Self::load_from_file(&settings_path)?
        } else {
            let defaults = AgentSettings::default();
            Self::save_to_file(&settings_path, &defaults)?;
            defaults
        };

        Ok(Self {
            settings_path,
            settings,
        })
    }

    /// Load settings from a file
    fn load_from_file(path: &Path) -> AppResult<AgentSettings> {
        let content = fs::read_to_string(path)?;
        let settings: AgentSettings = serde_json::from_str(&content)?;
        settings.validate().map_err(AppError::validation)?;
        Ok(settings)
    }

    /// Save settings to a file with pretty formatting
    fn save_to_file(path: &Path, settings: &AgentSettings) -> AppResult<()> {
        settings.validate().map_err(AppError::validation)?;
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the current settings
    pub fn get_settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Update the settings with a partial update
    ///
    /// The update is only kept if the result validates and saves.
    pub fn update_settings(&mut self, update: SettingsUpdate) -> AppResult<AgentSettings> {
        let mut next = self.settings.clone();
        next.apply_update(update);
        Self::save_to_file(&self.settings_path, &next)?;
        self.settings = next;
        Ok(self.settings.clone())
    }

    /// Reload settings from disk
    pub fn reload(&mut self) -> AppResult<()> {
        self.settings = Self::load_from_file(&self.settings_path)?;
        Ok(())
    }

    /// Reset settings to defaults
    pub fn reset(&mut self) -> AppResult<()> {
        self.settings = AgentSettings::default();
        Self::save_to_file(&self.settings_path, &self.settings)
    }
}
