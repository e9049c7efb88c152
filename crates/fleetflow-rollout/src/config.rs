//! Rollout configuration
//!
//! Loaded from YAML. Every field has a default, so a missing file is not an
//! error.

use crate::error::{Result, RolloutError};
use crate::labels::DEFAULT_NAMESPACE;
use crate::store::DEFAULT_HISTORY_SIZE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable pointing at a config file
pub const CONFIG_ENV: &str = "FLEET_ROLLOUT_CONFIG";

const CONFIG_FILE: &str = "fleet-rollout.yaml";
const PROJECT_CONFIG: &str = "rollout.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    /// Directory holding images.json, services.json and the lock file
    pub state_dir: PathBuf,

    /// Prefix of service labels
    pub label_namespace: String,

    /// Images kept per application
    pub image_history_size: usize,

    /// Log filter used when RUST_LOG is not set
    pub log_level: String,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".fleetflow"),
            label_namespace: DEFAULT_NAMESPACE.to_string(),
            image_history_size: DEFAULT_HISTORY_SIZE,
            log_level: "info".to_string(),
        }
    }
}

impl RolloutConfig {
    /// Parse a YAML document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load from the first config file found, or defaults
    pub fn load() -> Result<Self> {
        match find_config_file()? {
            Some(path) => {
                tracing::debug!("Loading rollout config from {}", path.display());
                Self::from_file(&path)
            }
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.image_history_size == 0 {
            return Err(RolloutError::ConfigError(
                "image_history_size must be at least 1".to_string(),
            ));
        }
        if self.label_namespace.is_empty() {
            return Err(RolloutError::ConfigError(
                "label_namespace must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Locate the rollout config file
///
/// Search order:
/// 1. `FLEET_ROLLOUT_CONFIG` (must exist when set)
/// 2. `./fleet-rollout.yaml`
/// 3. `./.fleetflow/rollout.yaml`
/// 4. `~/.config/fleetflow/rollout.yaml`
pub fn find_config_file() -> Result<Option<PathBuf>> {
    if let Ok(config_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(RolloutError::ConfigError(format!(
            "{} points to a missing file: {}",
            CONFIG_ENV,
            path.display()
        )));
    }

    let current_dir = std::env::current_dir()?;
    let candidates = [
        current_dir.join(CONFIG_FILE),
        current_dir.join(".fleetflow").join(PROJECT_CONFIG),
    ];
    if let Some(path) = candidates.into_iter().find(|p| p.exists()) {
        return Ok(Some(path));
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("fleetflow").join(PROJECT_CONFIG);
        if global_config.exists() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}
