//! Error types for the Riptide core.

/// Core error type for Riptide infrastructure.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error with context.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Convenience result type for Riptide operations.
pub type CoreResult<T> = Result<T, CoreError>;
