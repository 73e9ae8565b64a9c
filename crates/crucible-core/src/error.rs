//! Error types for Crucible CI.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Dependency errors
    #[error("Dependency not installed: {0}")]
    DependencyMissing(String),

    #[error("No resolved root for dependency: {0}")]
    UnresolvedDependency(String),

    #[error("Invalid dependency identifier: {0}")]
    InvalidIdent(String),

    // Pipeline errors
    #[error("Invalid pipeline definition: {0}")]
    InvalidPipeline(String),

    #[error("Invalid job configuration for '{label}': {message}")]
    InvalidJobConfiguration { label: String, message: String },

    // Execution errors
    #[error("Process failed with exit code {exit_code}")]
    ProcessFailure { exit_code: i32 },

    #[error("Timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
