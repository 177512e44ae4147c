//! Error types for Berth

use std::time::Duration;
use thiserror::Error;

/// Result type for Berth operations
pub type Result<T> = std::result::Result<T, BerthError>;

/// Berth error types
#[derive(Error, Debug)]
pub enum BerthError {
    #[error("Container inspect parse error: {0}")]
    Parse(String),

    #[error("Unsupported network mode: {0}")]
    UnsupportedNetworkMode(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Readiness timeout after {timeout:?}; unreachable endpoints: {}", unreachable.join(", "))]
    ReadinessTimeout {
        timeout: Duration,
        unreachable: Vec<String>,
    },

    #[error("Container unhealthy: {0}")]
    ContainerUnhealthy(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(String),
}
