use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("script evaluation failed: {0}")]
    Evaluation(String),

    #[error("screenshot failed: {0}")]
    Screenshot(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("browser pool is closed")]
    PoolClosed,
}

impl From<BrowserError> for sitescan_core::SitescanError {
    fn from(err: BrowserError) -> Self {
        Self::Browser(err.to_string())
    }
}
