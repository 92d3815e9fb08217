//! Machine-readable errors for command output.

use serde::Serialize;
use sitescan_scanner::ServiceError;
use std::fmt;

/// Serializable error printed by the CLI commands.
#[derive(Debug, Serialize)]
pub struct CommandError {
    /// Error code for scripts (e.g., "HOST_NOT_ALLOWED")
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Optional context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CommandError {
    /// Create a new command error.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Create a command error with details.
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: Some(details),
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CommandError {}

impl From<ServiceError> for CommandError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(msg) => Self::new("VALIDATION_ERROR", msg),
            ServiceError::HostNotAllowed(reason) => Self::with_details(
                "HOST_NOT_ALLOWED",
                "Target host is not allowed",
                serde_json::json!({ "reason": reason.to_string() }),
            ),
            ServiceError::NotFound(id) => Self::with_details(
                "NOT_FOUND",
                "Analysis does not exist",
                serde_json::json!({ "id": id.as_str() }),
            ),
            ServiceError::NotReady { id, status } => Self::with_details(
                "NOT_READY",
                format!("Analysis is {status}"),
                serde_json::json!({ "id": id.as_str(), "status": status.as_str() }),
            ),
            ServiceError::Store(err) => {
                Self::new("DATABASE_ERROR", format!("Database error: {err}"))
            }
            ServiceError::Queue(err) => Self::new("QUEUE_ERROR", format!("Queue error: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitescan_core::{AnalysisId, AnalysisStatus};
    use sitescan_scanner::RejectReason;

    #[test]
    fn test_service_error_codes() {
        let err: CommandError = ServiceError::HostNotAllowed(RejectReason::MissingHost).into();
        assert_eq!(err.code, "HOST_NOT_ALLOWED");
        assert!(err.details.is_some());

        let id = AnalysisId::generate();
        let err: CommandError = ServiceError::NotReady {
            id: id.clone(),
            status: AnalysisStatus::InProgress,
        }
        .into();
        assert_eq!(err.code, "NOT_READY");
        assert_eq!(err.details.unwrap()["status"], "in-progress");
    }

    #[test]
    fn test_serializes_without_empty_details() {
        let err = CommandError::new("VALIDATION_ERROR", "unknown capability 'x'");
        let json = serde_json::to_value(&err).unwrap();
        assert!(json.get("details").is_none());
        assert_eq!(err.to_string(), "VALIDATION_ERROR: unknown capability 'x'");
    }
}
