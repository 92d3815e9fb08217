//! The capability contract and the registry that maps tags to implementations.

use crate::capabilities::{
    AccessibilityCapability, PerformanceCapability, SecurityCapability, SeoCapability,
    TechCapability,
};
use crate::error::CapabilityError;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde_json::Value;
use sitescan_browser::{PageHandle, SessionLease};
use sitescan_core::{AppConfig, Capability, Requirement};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Something the orchestrator can prepare for a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Input {
    /// Serialized DOM of the shared page
    Html,
    /// Response headers of the target URL
    Headers,
    /// Text of the origin's robots.txt
    RobotsTxt,
    /// The shared, already loaded page
    Page,
    /// The job's browser session, for capabilities that open their own tabs
    Session,
}

/// Timeouts and identity used while scanning.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub capability_timeout: Duration,
    pub navigation_timeout: Duration,
    pub robots_timeout: Duration,
    pub http_timeout: Duration,
    pub sitemap_timeout: Duration,
    pub user_agent: String,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl ScanSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            capability_timeout: Duration::from_secs(config.scanning.capability_timeout_secs),
            navigation_timeout: Duration::from_secs(config.browser.navigation_timeout_secs),
            robots_timeout: Duration::from_secs(config.scanning.robots_timeout_secs),
            http_timeout: Duration::from_secs(config.scanning.http_timeout_secs),
            sitemap_timeout: Duration::from_secs(10),
            user_agent: config.scanning.user_agent.clone(),
        }
    }
}

/// Everything a capability may read while it runs.
///
/// Optional inputs are only present when some capability in the job declared
/// them through [`ScanCapability::inputs`].
pub struct ScanContext<'a> {
    pub base_url: &'a Url,
    pub http: &'a reqwest::Client,
    pub settings: &'a ScanSettings,
    html: Option<&'a str>,
    headers: Option<&'a HeaderMap>,
    robots_txt: Option<&'a str>,
    page: Option<&'a dyn PageHandle>,
    session: Option<&'a SessionLease>,
}

impl<'a> ScanContext<'a> {
    pub fn new(base_url: &'a Url, http: &'a reqwest::Client, settings: &'a ScanSettings) -> Self {
        Self {
            base_url,
            http,
            settings,
            html: None,
            headers: None,
            robots_txt: None,
            page: None,
            session: None,
        }
    }

    #[must_use]
    pub fn with_html(mut self, html: Option<&'a str>) -> Self {
        self.html = html;
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: Option<&'a HeaderMap>) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn with_robots_txt(mut self, robots_txt: Option<&'a str>) -> Self {
        self.robots_txt = robots_txt;
        self
    }

    #[must_use]
    pub fn with_page(mut self, page: Option<&'a dyn PageHandle>) -> Self {
        self.page = page;
        self
    }

    #[must_use]
    pub fn with_session(mut self, session: Option<&'a SessionLease>) -> Self {
        self.session = session;
        self
    }

    pub fn html(&self) -> Result<&'a str, CapabilityError> {
        self.html.ok_or(CapabilityError::MissingInput("html"))
    }

    pub fn page(&self) -> Result<&'a dyn PageHandle, CapabilityError> {
        self.page.ok_or(CapabilityError::MissingInput("page"))
    }

    pub fn session(&self) -> Result<&'a SessionLease, CapabilityError> {
        self.session.ok_or(CapabilityError::MissingInput("session"))
    }

    /// Response headers, if they could be fetched.
    pub fn headers(&self) -> Option<&'a HeaderMap> {
        self.headers
    }

    /// robots.txt body; `None` when the origin has none.
    pub fn robots_txt(&self) -> Option<&'a str> {
        self.robots_txt
    }

    /// The shared page, when one was loaded.
    pub fn loaded_page(&self) -> Option<&'a dyn PageHandle> {
        self.page
    }
}

/// One pluggable audit.
#[async_trait]
pub trait ScanCapability: Send + Sync {
    /// Tag this implementation answers to.
    fn capability(&self) -> Capability;

    /// Whether the capability runs on the shared page.
    fn requirement(&self) -> Requirement {
        self.capability().requirement()
    }

    /// Inputs the orchestrator must prepare before calling [`run`](Self::run).
    fn inputs(&self) -> &'static [Input];

    /// Produce this capability's result document.
    async fn run(&self, ctx: &ScanContext<'_>) -> Result<Value, CapabilityError>;
}

/// Capability tag to implementation.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    entries: BTreeMap<Capability, Arc<dyn ScanCapability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The five built-in capabilities.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TechCapability::new()));
        registry.register(Arc::new(SeoCapability::new()));
        registry.register(Arc::new(PerformanceCapability::new()));
        registry.register(Arc::new(AccessibilityCapability::new()));
        registry.register(Arc::new(SecurityCapability::new()));
        registry
    }

    /// Add or replace the implementation for its tag.
    pub fn register(&mut self, capability: Arc<dyn ScanCapability>) {
        self.entries.insert(capability.capability(), capability);
    }

    pub fn get(&self, capability: Capability) -> Option<Arc<dyn ScanCapability>> {
        self.entries.get(&capability).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
