//! Error types for the Arche CLI.

use thiserror::Error;

/// CLI result type alias.
pub type CliResult<T> = Result<T, CliError>;

/// CLI error type.
#[derive(Error, Debug)]
pub enum CliError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error reported by the compute runtime.
    #[error(transparent)]
    Arche(#[from] arche::ArcheError),

    /// Malformed command-line value.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The kernel cannot be driven by `arche run`.
    #[error("Unsupported kernel: {0}")]
    UnsupportedKernel(String),
}
