use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("queue storage error: {0}")]
    Storage(String),

    #[error("job {0} is not claimed by this queue")]
    NotClaimed(String),
}

impl From<QueueError> for sitescan_core::SitescanError {
    fn from(err: QueueError) -> Self {
        Self::Queue(err.to_string())
    }
}
