//! The record-store contract used by the orchestrator and the request layer.

use crate::analyses::Claim;
use crate::error::Result;
use crate::records::{AnalysisRecord, Completion, RecentResultSummary};
use sitescan_core::AnalysisId;

/// Page size used when the caller does not ask for one.
pub const DEFAULT_RECENT_LIMIT: usize = 20;

/// Largest page of recent results ever returned.
pub const MAX_RECENT_LIMIT: usize = 100;

/// Clamp a requested recent-results page size.
#[must_use]
pub fn clamp_recent_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_RECENT_LIMIT).min(MAX_RECENT_LIMIT)
}

/// Durable storage for analysis records and their recent-result projection.
#[async_trait::async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Persist a new `pending` record.
    async fn create(&self, record: &AnalysisRecord) -> Result<()>;

    /// Fetch a record by id.
    async fn get(&self, id: &AnalysisId) -> Result<Option<AnalysisRecord>>;

    /// Take ownership of a record for processing.
    async fn claim(&self, id: &AnalysisId) -> Result<Claim>;

    /// Apply the terminal write. Returns `false` if the record was already terminal.
    async fn finish(&self, id: &AnalysisId, completion: &Completion) -> Result<bool>;

    /// Append a summary; returns `false` if one already exists for this
    /// analysis and status.
    async fn insert_recent(&self, summary: &RecentResultSummary) -> Result<bool>;

    /// Newest summaries first, at most `limit` (capped at [`MAX_RECENT_LIMIT`]).
    async fn list_recent(&self, limit: usize) -> Result<Vec<RecentResultSummary>>;

    /// Drop summaries older than `retention`. Returns the number removed.
    async fn purge_expired_recent(&self, retention: chrono::Duration) -> Result<u64>;
}
