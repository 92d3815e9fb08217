//! Database error types.

use sitescan_core::{AnalysisStatus, SitescanError};
use thiserror::Error;

/// Database-specific errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to open or create database connection.
    #[error("failed to open database: {0}")]
    Open(String),

    /// Migration execution failed.
    #[error("migration failed: {0}")]
    Migration(String),

    /// Analysis record with the given id does not exist.
    #[error("analysis '{0}' not found")]
    NotFound(String),

    /// A write would move a record backwards in its lifecycle.
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        /// Status currently stored
        from: AnalysisStatus,
        /// Status the caller asked for
        to: AnalysisStatus,
    },

    /// Failed to decode database value.
    #[error("decode error: {0}")]
    Decode(String),

    /// Serialization/deserialization of a JSON column failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Underlying `SQLx` error.
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error during database operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for database operations.
pub type Result<T> = std::result::Result<T, DatabaseError>;

impl From<DatabaseError> for SitescanError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::InvalidTransition { from, to } => Self::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            },
            other => Self::Database(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_error_maps_to_core() {
        let err: SitescanError = DatabaseError::InvalidTransition {
            from: AnalysisStatus::Completed,
            to: AnalysisStatus::InProgress,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "invalid status transition from completed to in-progress"
        );
    }

    #[test]
    fn test_not_found_message() {
        let err = DatabaseError::NotFound("abc".to_string());
        assert_eq!(err.to_string(), "analysis 'abc' not found");
    }
}
