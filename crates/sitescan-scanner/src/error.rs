use crate::host_validator::RejectReason;
use sitescan_browser::BrowserError;
use sitescan_core::{AnalysisId, AnalysisStatus, SitescanError};
use sitescan_db::DatabaseError;
use sitescan_queue::QueueError;
use thiserror::Error;

/// Failure inside a single capability. Recorded under that capability's key;
/// never fails the analysis.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("required input '{0}' was not provided")]
    MissingInput(&'static str),

    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Failed(String),
}

/// Failure that prevents an analysis from completing at all.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("analysis {0} not found")]
    RecordMissing(AnalysisId),

    #[error("browser session unavailable: {0}")]
    Session(BrowserError),

    #[error("page failed to load: {0}")]
    PageLoad(BrowserError),

    #[error("invalid target URL: {0}")]
    InvalidUrl(String),

    #[error("store error: {0}")]
    Store(#[from] DatabaseError),

    #[error("orchestration panicked: {0}")]
    Panicked(String),
}

impl OrchestrationError {
    /// Whether re-running the whole job could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::RecordMissing(_) | Self::InvalidUrl(_))
    }
}

/// Errors surfaced to the request layer.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("host not allowed: {0}")]
    HostNotAllowed(RejectReason),

    #[error("analysis {0} not found")]
    NotFound(AnalysisId),

    #[error("analysis {id} is {status}, result not ready")]
    NotReady { id: AnalysisId, status: AnalysisStatus },

    #[error(transparent)]
    Store(#[from] DatabaseError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl From<ServiceError> for SitescanError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(msg) => Self::Validation(msg),
            ServiceError::HostNotAllowed(reason) => Self::HostNotAllowed(reason.to_string()),
            ServiceError::Store(e) => e.into(),
            ServiceError::Queue(e) => e.into(),
            other => Self::Validation(other.to_string()),
        }
    }
}

/// Errors raised by the worker loop itself.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("orchestration error: {0}")]
    Orchestration(#[from] OrchestrationError),
}

pub type Result<T> = std::result::Result<T, ScanError>;
