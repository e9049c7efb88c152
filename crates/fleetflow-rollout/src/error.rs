//! Rollout error types

use thiserror::Error;

/// Rollout errors
#[derive(Error, Debug)]
pub enum RolloutError {
    #[error("no process information found deploying image {image:?}")]
    NoProcesses { image: String },

    #[error("cannot have less than 0 units for process {process:?} (requested {replicas})")]
    InvalidScale { process: String, replicas: i64 },

    #[error("too many units for process {process:?} (requested {replicas}, max {max})", max = u32::MAX)]
    ScaleOverflow { process: String, replicas: i64 },

    #[error("Invalid label: {0}")]
    InvalidLabel(String),

    #[error("Invalid process override: {0}")]
    InvalidOverride(String),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Service not found: {app}[{process}]")]
    ServiceNotFound { app: String, process: String },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, RolloutError>;
