//! Runs one analysis job from claim to terminal write.
//!
//! The orchestrator claims the record, checks out a browser session for the
//! job, runs the requested capabilities and writes the aggregated result in a
//! single terminal transition. Capabilities that need the rendered page share
//! one page load and run one after another on it; self-contained capabilities
//! run alongside that group and do not depend on the page loading.
//!
//! A capability that errors, panics or exceeds its timeout only produces an
//! error entry under its own key. Failing to claim the record, to get a
//! browser session or to load the page fails the whole job.

use crate::capability::{CapabilityRegistry, Input, ScanCapability, ScanContext, ScanSettings};
use crate::error::OrchestrationError;
use crate::http::{fetch_headers, fetch_robots};
use crate::notifier::{EventKind, NotificationPublisher};
use crate::page::{capture_screenshot, extract_metadata};
use crate::summary::build_summary;
use futures::future::join_all;
use futures::FutureExt;
use serde_json::Value;
use sitescan_browser::{BrowserError, BrowserPool, SessionLease};
use sitescan_core::{AnalysisId, AnalysisStatus, Capability, Requirement};
use sitescan_db::{
    AnalysisRecord, AnalysisStore, CapabilityOutcome, Claim, Completion, PageMetadata,
};
use sitescan_queue::Job;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

type Results = BTreeMap<Capability, CapabilityOutcome>;

/// What happened to a job that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The record reached `completed`.
    Completed {
        /// Analysis that was processed
        analysis_id: AnalysisId,
        /// Capabilities that ran
        capabilities: usize,
        /// How many of them recorded an error
        errors: usize,
    },
    /// The record was already terminal; nothing was done.
    Skipped {
        /// Analysis that was skipped
        analysis_id: AnalysisId,
        /// Its terminal status
        status: AnalysisStatus,
    },
}

/// Drives analysis jobs through the capability registry.
pub struct AnalysisOrchestrator {
    /// Record store; source of truth for status and results
    store: Arc<dyn AnalysisStore>,
    /// Browser sessions, one checked out per job
    browser: Arc<BrowserPool>,
    /// Capability implementations
    registry: Arc<CapabilityRegistry>,
    /// Optional push channel
    publisher: Arc<dyn NotificationPublisher>,
    /// Client for header, robots and sitemap requests
    http: reqwest::Client,
    /// Timeouts
    settings: ScanSettings,
}

impl AnalysisOrchestrator {
    /// Create a new orchestrator.
    #[must_use]
    pub fn new(
        store: Arc<dyn AnalysisStore>,
        browser: Arc<BrowserPool>,
        registry: Arc<CapabilityRegistry>,
        publisher: Arc<dyn NotificationPublisher>,
        http: reqwest::Client,
        settings: ScanSettings,
    ) -> Self {
        Self {
            store,
            browser,
            registry,
            publisher,
            http,
            settings,
        }
    }

    /// Process one delivery of `job`.
    ///
    /// Safe to call again for the same job: a terminal record is left alone and
    /// an in-progress record is simply processed again.
    pub async fn process(&self, job: &Job) -> Result<ProcessOutcome, OrchestrationError> {
        let analysis_id = &job.analysis_id;

        let record = match self.store.claim(analysis_id).await? {
            Claim::Claimed(record) => record,
            Claim::AlreadyTerminal(status) => {
                info!(analysis_id = %analysis_id, %status, "Analysis already finished, skipping");
                return Ok(ProcessOutcome::Skipped {
                    analysis_id: analysis_id.clone(),
                    status,
                });
            }
            Claim::NotFound => return Err(OrchestrationError::RecordMissing(analysis_id.clone())),
        };

        let base_url = Url::parse(&record.url)
            .map_err(|e| OrchestrationError::InvalidUrl(format!("{}: {e}", record.url)))?;

        info!(
            analysis_id = %analysis_id,
            url = %record.url,
            attempt = job.attempt_count,
            "Processing analysis"
        );
        let started = Instant::now();

        let (results, page) = AssertUnwindSafe(self.execute(&record, &base_url))
            .catch_unwind()
            .await
            .map_err(|panic| OrchestrationError::Panicked(panic_message(panic.as_ref())))??;

        let capabilities = results.len();
        let errors = results.values().filter(|o| o.is_error()).count();
        let completion = Completion::completed(results, page);

        if self.store.finish(analysis_id, &completion).await? {
            let mut finished = record;
            finished.status = completion.status;
            finished.results = completion.results;
            finished.page = completion.page;
            finished.error = None;
            finished.updated_at = chrono::Utc::now();

            info!(
                analysis_id = %analysis_id,
                capabilities,
                errors,
                elapsed_ms = started.elapsed().as_millis(),
                "Analysis completed"
            );
            self.announce(&finished, EventKind::Completed).await;
        }

        Ok(ProcessOutcome::Completed {
            analysis_id: analysis_id.clone(),
            capabilities,
            errors,
        })
    }

    /// Move a record to `failed`, write its summary and announce it.
    ///
    /// Returns `false` if the record is missing or already terminal.
    pub async fn fail(
        &self,
        analysis_id: &AnalysisId,
        message: &str,
    ) -> Result<bool, OrchestrationError> {
        let record = match self.store.claim(analysis_id).await? {
            Claim::Claimed(record) => record,
            Claim::AlreadyTerminal(status) => {
                debug!(analysis_id = %analysis_id, %status, "Not failing a finished analysis");
                return Ok(false);
            }
            Claim::NotFound => {
                warn!(analysis_id = %analysis_id, "Cannot fail a missing analysis");
                return Ok(false);
            }
        };

        let completion = Completion::failed(message);
        if !self.store.finish(analysis_id, &completion).await? {
            return Ok(false);
        }

        let mut failed = record;
        failed.status = AnalysisStatus::Failed;
        failed.results = completion.results;
        failed.page = None;
        failed.error = completion.error;
        failed.updated_at = chrono::Utc::now();

        error!(analysis_id = %analysis_id, error = message, "Analysis failed");
        self.announce(&failed, EventKind::Failed).await;
        Ok(true)
    }

    async fn announce(&self, record: &AnalysisRecord, event: EventKind) {
        let summary = build_summary(record);
        match self.store.insert_recent(&summary).await {
            Ok(true) => {}
            Ok(false) => debug!(analysis_id = %record.id, "Summary already recorded"),
            Err(e) => warn!(analysis_id = %record.id, error = %e, "Failed to record summary"),
        }

        let mut payload = serde_json::Map::new();
        payload.insert("id".into(), Value::String(record.id.to_string()));
        payload.insert("status".into(), Value::String(record.status.to_string()));
        match event {
            EventKind::Completed => {
                let result = serde_json::to_value(record).unwrap_or_else(|e| {
                    warn!(analysis_id = %record.id, error = %e, "Could not serialize result");
                    Value::Null
                });
                payload.insert("result".into(), result);
            }
            EventKind::Failed => {
                payload.insert(
                    "error".into(),
                    record.error.clone().map_or(Value::Null, Value::String),
                );
            }
        }
        let payload = Value::Object(payload);
        self.publisher.publish(&record.id, event, payload);
    }

    async fn execute(
        &self,
        record: &AnalysisRecord,
        base_url: &Url,
    ) -> Result<(Results, Option<PageMetadata>), OrchestrationError> {
        let mut results = Results::new();
        let mut shared = Vec::new();
        let mut independent = Vec::new();

        for capability in record.requested_capabilities.resolve() {
            match self.registry.get(capability) {
                Some(implementation) => match implementation.requirement() {
                    Requirement::RenderedPage => shared.push(implementation),
                    Requirement::SelfContained => independent.push(implementation),
                },
                None => {
                    warn!(%capability, "No implementation registered");
                    results.insert(
                        capability,
                        CapabilityOutcome::error(format!(
                            "capability '{capability}' is not available"
                        )),
                    );
                }
            }
        }

        let needs_session = !shared.is_empty()
            || independent
                .iter()
                .any(|c| c.inputs().contains(&Input::Session));
        let session = if needs_session {
            Some(
                self.browser
                    .acquire()
                    .await
                    .map_err(OrchestrationError::Session)?,
            )
        } else {
            None
        };

        let (independent_results, shared_results) = tokio::join!(
            self.run_independent(&independent, base_url, session.as_ref()),
            self.run_shared(&shared, base_url, session.as_ref()),
        );
        let (shared_results, page) = shared_results?;

        results.extend(independent_results);
        results.extend(shared_results);
        Ok((results, page))
    }

    async fn run_independent(
        &self,
        capabilities: &[Arc<dyn ScanCapability>],
        base_url: &Url,
        session: Option<&SessionLease>,
    ) -> Results {
        let ctx = ScanContext::new(base_url, &self.http, &self.settings).with_session(session);
        let ctx = &ctx;
        let runs = capabilities.iter().map(|capability| async move {
            (
                capability.capability(),
                self.run_capability(capability.as_ref(), ctx).await,
            )
        });
        join_all(runs).await.into_iter().collect()
    }

    async fn run_shared(
        &self,
        capabilities: &[Arc<dyn ScanCapability>],
        base_url: &Url,
        session: Option<&SessionLease>,
    ) -> Result<(Results, Option<PageMetadata>), OrchestrationError> {
        if capabilities.is_empty() {
            return Ok((Results::new(), None));
        }
        let Some(session) = session else {
            return Err(OrchestrationError::Session(BrowserError::PoolClosed));
        };

        let inputs: BTreeSet<Input> = capabilities
            .iter()
            .flat_map(|c| c.inputs().iter().copied())
            .collect();

        let page = session
            .open_page()
            .await
            .map_err(OrchestrationError::Session)?;
        let loaded = page
            .load(base_url.as_str(), self.settings.navigation_timeout)
            .await
            .map_err(OrchestrationError::PageLoad)?;
        debug!(final_url = %loaded.final_url, "Shared page loaded");

        let mut metadata = extract_metadata(&loaded);
        metadata.screenshot = capture_screenshot(&*page).await;

        let (headers, robots_txt) = tokio::join!(
            async {
                if !inputs.contains(&Input::Headers) {
                    return None;
                }
                match fetch_headers(&self.http, base_url).await {
                    Ok(response) => Some(response.headers),
                    Err(e) => {
                        warn!(url = %base_url, error = %e, "Could not fetch response headers");
                        None
                    }
                }
            },
            async {
                if inputs.contains(&Input::RobotsTxt) {
                    fetch_robots(&self.http, base_url, self.settings.robots_timeout).await
                } else {
                    None
                }
            },
        );

        let ctx = ScanContext::new(base_url, &self.http, &self.settings)
            .with_html(Some(&loaded.html))
            .with_headers(headers.as_ref())
            .with_robots_txt(robots_txt.as_deref())
            .with_page(Some(&*page))
            .with_session(Some(session));

        let mut results = Results::new();
        for capability in capabilities {
            let outcome = self.run_capability(capability.as_ref(), &ctx).await;
            results.insert(capability.capability(), outcome);
        }
        drop(ctx);

        if let Err(e) = page.release().await {
            warn!(error = %e, "Failed to close shared page");
        }
        Ok((results, Some(metadata)))
    }

    async fn run_capability(
        &self,
        capability: &dyn ScanCapability,
        ctx: &ScanContext<'_>,
    ) -> CapabilityOutcome {
        let tag = capability.capability();
        let timeout = self.settings.capability_timeout;
        let started = Instant::now();
        let guarded = AssertUnwindSafe(capability.run(ctx)).catch_unwind();

        match tokio::time::timeout(timeout, guarded).await {
            Ok(Ok(Ok(data))) => {
                debug!(
                    capability = %tag,
                    elapsed_ms = started.elapsed().as_millis(),
                    "Capability finished"
                );
                CapabilityOutcome::success(data)
            }
            Ok(Ok(Err(e))) => {
                warn!(capability = %tag, error = %e, "Capability failed");
                CapabilityOutcome::error(e.to_string())
            }
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                error!(capability = %tag, panic = %message, "Capability panicked");
                CapabilityOutcome::error(format!("capability panicked: {message}"))
            }
            Err(_) => {
                warn!(capability = %tag, ?timeout, "Capability timed out");
                CapabilityOutcome::timed_out(format!(
                    "{tag} timed out after {}s",
                    timeout.as_secs()
                ))
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
