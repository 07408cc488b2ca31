//! Error types for the core crate.

use thiserror::Error;

/// Core error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Contract status index outside 0..=3.
    #[error("Unknown issue status index: {0} (must be between 0 and 3)")]
    UnknownStatusIndex(u8),

    /// Persisted status string that does not name a status.
    #[error("Unknown issue status: {0}")]
    UnknownStatus(String),
}

/// Result type alias for CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;
