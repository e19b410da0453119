//! Error types for balance analysis operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("No input files given")]
    NoInputFiles,

    #[error("No diagnostic files loaded ({attempted} attempted, all failed)")]
    NoFilesLoaded { attempted: usize },

    #[error("Metric '{0}' not found in table columns")]
    MetricNotFound(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for balance analysis operations
pub type Result<T> = std::result::Result<T, AnalysisError>;
