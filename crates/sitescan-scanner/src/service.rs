//! Request-layer operations: start an analysis and read it back.
//!
//! Any transport (HTTP handlers, a CLI, tests) goes through
//! [`AnalysisService`]. Starting an analysis validates the host before anything
//! is stored, so a rejected URL leaves no record and no job behind.

use crate::error::ServiceError;
use crate::host_validator::HostValidator;
use serde::Serialize;
use sitescan_core::{AnalysisId, AnalysisStatus, CapabilitySet};
use sitescan_db::{clamp_recent_limit, AnalysisRecord, AnalysisStore, RecentResultSummary};
use sitescan_queue::{Job, JobQueue};
use std::sync::Arc;
use tracing::{info, warn};

/// Acknowledgement returned once an analysis has been queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedAnalysis {
    pub id: AnalysisId,
    pub status: AnalysisStatus,
    pub url: String,
}

/// Entry point for clients of the pipeline.
pub struct AnalysisService {
    validator: HostValidator,
    store: Arc<dyn AnalysisStore>,
    queue: Arc<dyn JobQueue>,
}

impl AnalysisService {
    pub fn new(
        validator: HostValidator,
        store: Arc<dyn AnalysisStore>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            validator,
            store,
            queue,
        }
    }

    /// Validate `url`, store a `pending` record and enqueue its job.
    ///
    /// An empty `capabilities` list requests every capability.
    pub async fn start_analysis<S: AsRef<str>>(
        &self,
        url: &str,
        capabilities: &[S],
    ) -> Result<StartedAnalysis, ServiceError> {
        let requested = CapabilitySet::parse(capabilities)
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        let verdict = self.validator.validate(url).await;
        if let Some(reason) = verdict.reason.filter(|_| !verdict.allowed) {
            warn!(url, %reason, "Rejected analysis request");
            return Err(ServiceError::HostNotAllowed(reason));
        }

        let record = AnalysisRecord::pending(url, requested.clone());
        self.store.create(&record).await?;
        self.queue
            .enqueue(Job::new(record.id.clone(), url, requested))
            .await?;

        info!(analysis_id = %record.id, url, "Analysis queued");
        Ok(StartedAnalysis {
            id: record.id,
            status: record.status,
            url: record.url,
        })
    }

    /// Current status of an analysis.
    pub async fn get_status(&self, id: &AnalysisId) -> Result<AnalysisStatus, ServiceError> {
        Ok(self.load(id).await?.status)
    }

    /// Full record of a finished analysis.
    ///
    /// Failed analyses are returned too; their `error` explains why.
    pub async fn get_result(&self, id: &AnalysisId) -> Result<AnalysisRecord, ServiceError> {
        let record = self.load(id).await?;
        if record.status.is_terminal() {
            Ok(record)
        } else {
            Err(ServiceError::NotReady {
                id: record.id,
                status: record.status,
            })
        }
    }

    /// Most recent finished analyses, newest first.
    pub async fn list_recent(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<RecentResultSummary>, ServiceError> {
        Ok(self.store.list_recent(clamp_recent_limit(limit)).await?)
    }

    async fn load(&self, id: &AnalysisId) -> Result<AnalysisRecord, ServiceError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(id.clone()))
    }
}
