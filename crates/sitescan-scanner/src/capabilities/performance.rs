//! Load-time audit from the browser's Navigation Timing data.
//!
//! Runs in its own tab so a failure of the shared page does not affect it.

use crate::capability::{Input, ScanCapability, ScanContext};
use crate::error::CapabilityError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sitescan_core::Capability;
use tracing::{debug, warn};

const TIMING_SCRIPT: &str = r"(() => {
    const nav = performance.getEntriesByType('navigation')[0];
    const paint = performance.getEntriesByType('paint')
        .find(e => e.name === 'first-contentful-paint');
    const resources = performance.getEntriesByType('resource');
    return {
        ttfb: nav ? nav.responseStart - nav.requestStart : null,
        fcp: paint ? paint.startTime : null,
        domContentLoaded: nav ? nav.domContentLoadedEventEnd - nav.startTime : null,
        load: nav && nav.loadEventEnd > 0 ? nav.loadEventEnd - nav.startTime : null,
        transferSize: (nav ? nav.transferSize || 0 : 0)
            + resources.reduce((sum, r) => sum + (r.transferSize || 0), 0),
        resourceCount: resources.length
    };
})()";

/// Raw timings in milliseconds and bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Timing {
    pub ttfb: Option<f64>,
    pub fcp: Option<f64>,
    pub dom_content_loaded: Option<f64>,
    pub load: Option<f64>,
    pub transfer_size: Option<f64>,
    pub resource_count: Option<u32>,
}

/// Score and advice derived from a [`Timing`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub score: u8,
    pub metrics: Timing,
    pub recommendations: Vec<String>,
}

struct Band {
    good: f64,
    poor: f64,
    moderate_penalty: u32,
    poor_penalty: u32,
}

impl Band {
    fn penalty(&self, value: f64) -> u32 {
        if value <= self.good {
            0
        } else if value <= self.poor {
            self.moderate_penalty
        } else {
            self.poor_penalty
        }
    }
}

const TTFB: Band = Band { good: 800.0, poor: 1800.0, moderate_penalty: 10, poor_penalty: 20 };
const FCP: Band = Band { good: 1800.0, poor: 3000.0, moderate_penalty: 10, poor_penalty: 25 };
const LOAD: Band = Band { good: 2500.0, poor: 4000.0, moderate_penalty: 10, poor_penalty: 25 };
const TRANSFER_BYTES: Band = Band {
    good: 1_500_000.0,
    poor: 3_000_000.0,
    moderate_penalty: 5,
    poor_penalty: 15,
};
const RESOURCES: Band = Band { good: 50.0, poor: 100.0, moderate_penalty: 5, poor_penalty: 10 };

/// Grade a set of timings on a 0-100 scale.
pub fn score_timing(timing: Timing) -> PerformanceReport {
    let mut penalty = 0u32;
    let mut recommendations = Vec::new();

    let mut check = |value: Option<f64>, band: &Band, advice: &str| {
        if let Some(value) = value {
            let p = band.penalty(value);
            if p > 0 {
                penalty += p;
                recommendations.push(advice.to_string());
            }
        }
    };

    check(
        timing.ttfb,
        &TTFB,
        "Reduce server response time (TTFB) with caching or a CDN",
    );
    check(
        timing.fcp,
        &FCP,
        "Speed up first contentful paint by deferring render-blocking resources",
    );
    check(
        timing.load,
        &LOAD,
        "Shorten total load time by lazy-loading below-the-fold content",
    );
    check(
        timing.transfer_size,
        &TRANSFER_BYTES,
        "Reduce page weight by compressing images and minifying assets",
    );
    check(
        timing.resource_count.map(f64::from),
        &RESOURCES,
        "Reduce the number of requests by bundling scripts and styles",
    );

    let score = 100u32.saturating_sub(penalty);
    PerformanceReport {
        score: u8::try_from(score).unwrap_or(100),
        metrics: timing,
        recommendations,
    }
}

/// Measures the target in a dedicated tab.
#[derive(Debug, Default)]
pub struct PerformanceCapability;

impl PerformanceCapability {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ScanCapability for PerformanceCapability {
    fn capability(&self) -> Capability {
        Capability::Performance
    }

    fn inputs(&self) -> &'static [Input] {
        &[Input::Session]
    }

    async fn run(&self, ctx: &ScanContext<'_>) -> Result<Value, CapabilityError> {
        let session = ctx.session()?;
        let page = session.open_page().await?;

        let measured = async {
            page.load(ctx.base_url.as_str(), ctx.settings.navigation_timeout)
                .await?;
            page.evaluate(TIMING_SCRIPT).await
        }
        .await;

        if let Err(e) = page.release().await {
            warn!(error = %e, "Failed to close performance tab");
        }

        let timing: Timing = serde_json::from_value(measured?)
            .map_err(|e| CapabilityError::Failed(format!("unexpected timing data: {e}")))?;
        debug!(?timing, "Collected navigation timing");

        serde_json::to_value(score_timing(timing))
            .map_err(|e| CapabilityError::Failed(e.to_string()))
    }
}
