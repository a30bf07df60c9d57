use crate::backend::DeploymentMode;
use crate::constants::CONFIG_DIR_NAME;
use crate::conversion::exit_codes::ExitCodeRule;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid config path: {path}")]
    InvalidPath { path: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub auto_check_updates: bool,
    pub last_input_dir: Option<PathBuf>,
    /// Forces development or packaged backend resolution.
    pub deployment_mode: Option<DeploymentMode>,
    /// Backend executable (or `.py` script) tried before the search tables.
    pub backend_override: Option<PathBuf>,
    pub extra_exit_codes: Vec<ExitCodeRule>,
    /// Release feed URL replacing the default GitHub endpoint.
    pub update_feed: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            auto_check_updates: true,
            last_input_dir: None,
            deployment_mode: None,
            backend_override: None,
            extra_exit_codes: Vec::new(),
            update_feed: None,
        }
    }
}

impl AppConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join("config.json"))
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let parent = path.parent().ok_or_else(|| ConfigError::InvalidPath {
            path: path.to_string_lossy().to_string(),
        })?;
        std::fs::create_dir_all(parent)?;
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Shared configuration, written back to disk on every change when backed by a file.
#[derive(Debug)]
pub struct ConfigHandle {
    config: Mutex<AppConfig>,
    path: Option<PathBuf>,
}

impl ConfigHandle {
    /// Loads from the default location, falling back to defaults.
    pub fn load() -> Self {
        match AppConfig::default_path() {
            Some(path) => Self::load_or_default(path),
            None => {
                tracing::warn!("Could not determine config directory, using defaults");
                Self::in_memory(AppConfig::default())
            }
        }
    }

    pub fn load_or_default(path: PathBuf) -> Self {
        let config = if path.exists() {
            match AppConfig::load_from(&path) {
                Ok(config) => {
                    tracing::info!("Config loaded from: {:?}", path);
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to load config file, using defaults: {}", e);
                    AppConfig::default()
                }
            }
        } else {
            tracing::info!("Config file doesn't exist, using defaults");
            AppConfig::default()
        };

        Self {
            config: Mutex::new(config),
            path: Some(path),
        }
    }

    pub fn in_memory(config: AppConfig) -> Self {
        Self {
            config: Mutex::new(config),
            path: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, AppConfig> {
        match self.config.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn get(&self) -> AppConfig {
        self.lock().clone()
    }

    pub fn update<F>(&self, updater: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut AppConfig),
    {
        let snapshot = {
            let mut guard = self.lock();
            updater(&mut guard);
            guard.clone()
        };

        if let Some(path) = &self.path {
            snapshot.save_to(path)?;
            tracing::debug!("Config saved to: {:?}", path);
        }
        Ok(())
    }

    pub fn remember_input_dir(&self, file: &Path) {
        let Some(parent) = file.parent() else {
            return;
        };
        if let Err(e) = self.update(|config| config.last_input_dir = Some(parent.to_path_buf())) {
            tracing::warn!("Failed to save config: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::exit_codes::ExitClass;

    #[test]
    fn missing_fields_take_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"deployment_mode":"packaged"}"#).unwrap();

        assert!(config.auto_check_updates);
        assert_eq!(config.deployment_mode, Some(DeploymentMode::Packaged));
        assert!(config.extra_exit_codes.is_empty());
    }

    #[test]
    fn exit_code_rules_load_from_json() {
        let json = r#"{
            "extra_exit_codes": [
                {"code": 3, "class": "content-error", "message": "Protected workbook"}
            ]
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.extra_exit_codes[0].class, ExitClass::ContentError);
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let handle = ConfigHandle::load_or_default(path);

        assert_eq!(handle.get(), AppConfig::default());
    }

    #[test]
    fn updates_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let handle = ConfigHandle::load_or_default(path.clone());

        handle.remember_input_dir(&dir.path().join("book.xlsx"));

        let reloaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(reloaded.last_input_dir.as_deref(), Some(dir.path()));
    }
}
