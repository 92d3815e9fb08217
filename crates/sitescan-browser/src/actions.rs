use crate::error::Result;
use crate::fingerprint::PageProfile;
use serde_json::Value;
use std::time::Duration;

/// What a successful navigation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedPage {
    /// URL after redirects
    pub final_url: String,
    /// Serialized DOM after the network went idle
    pub html: String,
    /// Document title, if any
    pub title: Option<String>,
}

/// One open browser tab.
#[async_trait::async_trait]
pub trait PageHandle: Send + Sync {
    /// Navigate and wait for the page to settle, bounded by `timeout`.
    async fn load(&self, url: &str, timeout: Duration) -> Result<LoadedPage>;

    /// Evaluate a script in the page and return its JSON result.
    async fn evaluate(&self, script: &str) -> Result<Value>;

    /// Viewport screenshot as JPEG bytes.
    async fn screenshot_jpeg(&self, quality: u8) -> Result<Vec<u8>>;

    /// Close the tab.
    async fn close(&self) -> Result<()>;
}

/// Something that can open tabs.
#[async_trait::async_trait]
pub trait PageProvider: Send + Sync {
    async fn new_page(&self, profile: &PageProfile) -> Result<Box<dyn PageHandle>>;
}
