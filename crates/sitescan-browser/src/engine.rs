use crate::actions::{LoadedPage, PageHandle, PageProvider};
use crate::error::{BrowserError, Result};
use crate::fingerprint::PageProfile;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromeConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde_json::Value;
use sitescan_core::BrowserConfig;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

struct Running {
    browser: Browser,
    handler: JoinHandle<()>,
}

/// Chromium process shared by every page the worker opens.
///
/// The browser is launched on first use and relaunched after it fails to
/// open a page, so a crashed browser costs one failed job rather than the
/// whole worker.
pub struct BrowserEngine {
    config: BrowserConfig,
    running: Mutex<Option<Running>>,
}

impl BrowserEngine {
    /// Create an engine; nothing is launched yet.
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config,
            running: Mutex::new(None),
        }
    }

    async fn launch(&self) -> Result<Running> {
        let mut builder = ChromeConfig::builder()
            .no_sandbox()
            .window_size(self.config.window_width, self.config.window_height)
            .request_timeout(Duration::from_secs(self.config.navigation_timeout_secs));
        if !self.config.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::trace!("Browser handler event error: {}", e);
                }
            }
            tracing::debug!("Browser handler loop ended");
        });

        tracing::info!(headless = self.config.headless, "Launched browser");
        Ok(Running { browser, handler })
    }

    async fn open(&self) -> Result<Page> {
        let mut running = self.running.lock().await;
        if running.is_none() {
            *running = Some(self.launch().await?);
        }
        let Some(current) = running.as_ref() else {
            return Err(BrowserError::PoolClosed);
        };

        match current.browser.new_page("about:blank").await {
            Ok(page) => Ok(page),
            Err(e) => {
                tracing::warn!("Browser failed to open a page, discarding it: {}", e);
                if let Some(mut dead) = running.take() {
                    let _ = dead.browser.close().await;
                    dead.handler.abort();
                }
                Err(BrowserError::Launch(e.to_string()))
            }
        }
    }

    /// Shut the browser down if it is running.
    pub async fn shutdown(&self) {
        if let Some(mut running) = self.running.lock().await.take() {
            if let Err(e) = running.browser.close().await {
                tracing::warn!("Failed to close browser: {}", e);
            }
            let _ = running.browser.wait().await;
            running.handler.abort();
            tracing::info!("Browser shut down");
        }
    }
}

#[async_trait::async_trait]
impl PageProvider for BrowserEngine {
    async fn new_page(&self, profile: &PageProfile) -> Result<Box<dyn PageHandle>> {
        let page = self.open().await?;

        page.execute(SetUserAgentOverrideParams::new(profile.user_agent.clone()))
            .await
            .map_err(|e| BrowserError::Launch(format!("set user agent: {e}")))?;
        page.execute(SetDeviceMetricsOverrideParams::new(
            i64::from(profile.viewport_width),
            i64::from(profile.viewport_height),
            1.0,
            false,
        ))
        .await
        .map_err(|e| BrowserError::Launch(format!("set viewport: {e}")))?;

        Ok(Box::new(ChromePage { page }))
    }
}

/// [`PageHandle`] over a chromiumoxide tab.
struct ChromePage {
    page: Page,
}

#[async_trait::async_trait]
impl PageHandle for ChromePage {
    async fn load(&self, url: &str, timeout: Duration) -> Result<LoadedPage> {
        let navigation = async {
            self.page
                .goto(url)
                .await
                .map_err(|e| BrowserError::Navigation(e.to_string()))?;
            self.page
                .wait_for_navigation()
                .await
                .map_err(|e| BrowserError::Navigation(e.to_string()))?;
            Ok::<_, BrowserError>(())
        };
        tokio::time::timeout(timeout, navigation)
            .await
            .map_err(|_| BrowserError::Timeout(format!("loading {url} took over {timeout:?}")))??;

        let html = self
            .page
            .content()
            .await
            .map_err(|e| BrowserError::Navigation(e.to_string()))?;
        let title = self
            .page
            .get_title()
            .await
            .map_err(|e| BrowserError::Navigation(e.to_string()))?;
        let final_url = self
            .page
            .url()
            .await
            .map_err(|e| BrowserError::Navigation(e.to_string()))?
            .unwrap_or_else(|| url.to_string());

        Ok(LoadedPage {
            final_url,
            html,
            title,
        })
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::Evaluation(e.to_string()))?;
        Ok(result.into_value::<Value>().unwrap_or(Value::Null))
    }

    async fn screenshot_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Jpeg)
            .quality(i64::from(quality))
            .full_page(false)
            .build();
        self.page
            .screenshot(params)
            .await
            .map_err(|e| BrowserError::Screenshot(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| BrowserError::Navigation(format!("close page: {e}")))
    }
}
