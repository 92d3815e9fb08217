//! Job type definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sitescan_core::{AnalysisId, CapabilitySet};

/// One unit of queued work: analyse `url` for the record `analysis_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    pub analysis_id: AnalysisId,
    pub url: String,
    /// Requested subset; empty means every capability.
    pub capabilities: CapabilitySet,
    pub enqueued_at: DateTime<Utc>,
    /// Deliveries so far. Incremented each time a worker claims the job.
    pub attempt_count: u32,
}

impl Job {
    pub fn new(
        analysis_id: AnalysisId,
        url: impl Into<String>,
        capabilities: CapabilitySet,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            analysis_id,
            url: url.into(),
            capabilities,
            enqueued_at: Utc::now(),
            attempt_count: 0,
        }
    }
}
