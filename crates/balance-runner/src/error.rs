//! Error types for batch orchestration

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Invalid batch plan: {0}")]
    InvalidPlan(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for batch orchestration operations
pub type Result<T> = std::result::Result<T, RunnerError>;
