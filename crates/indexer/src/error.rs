//! Error taxonomy for ingestion and reconciliation.

use issuetrack_core::{CoreError, EventKind};
use thiserror::Error;

/// Errors raised while ingesting or applying a chain event.
#[derive(Error, Debug)]
pub enum IndexerError {
    /// The chain provider or a subscription failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A raw log could not be decoded into event arguments.
    #[error("Failed to decode {kind} event: {reason}")]
    Decode {
        /// Event kind being decoded
        kind: EventKind,
        /// What was wrong with the entry
        reason: String,
    },

    /// The contract reported a status index outside 0..=3.
    #[error("Unknown issue status index: {0}")]
    UnknownStatusIndex(u8),

    /// The commit time of a block could not be resolved.
    #[error("Timestamp unavailable for block {block_number}: {reason}")]
    TimestampUnavailable {
        /// Block whose timestamp was requested
        block_number: u64,
        /// Provider failure
        reason: String,
    },

    /// A referenced parent row does not exist.
    #[error("{entity} {id} not found")]
    DependencyNotFound {
        /// Parent entity name
        entity: &'static str,
        /// Parent identifier
        id: String,
    },

    /// A uniqueness or foreign-key constraint rejected the write.
    #[error("Constraint violation on {entity}: {detail}")]
    ConstraintViolation {
        /// Entity being written
        entity: &'static str,
        /// Database message
        detail: String,
    },

    /// Any other database failure.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IndexerError {
    /// Classify a write failure: constraint violations are surfaced as such,
    /// everything else stays a database error.
    pub fn from_write(entity: &'static str, err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation()
                || db_err.is_foreign_key_violation()
                || db_err.is_check_violation()
            {
                return IndexerError::ConstraintViolation {
                    entity,
                    detail: db_err.message().to_string(),
                };
            }
        }
        IndexerError::Database(err)
    }
}

impl From<CoreError> for IndexerError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnknownStatusIndex(index) => IndexerError::UnknownStatusIndex(index),
            CoreError::UnknownStatus(status) => IndexerError::ConstraintViolation {
                entity: "issue",
                detail: format!("unknown status '{status}'"),
            },
        }
    }
}

/// Result type alias for IndexerError.
pub type Result<T> = std::result::Result<T, IndexerError>;
