//! Process-local store used when persistence is switched off.
//!
//! Applies the same lifecycle rules as the SQLite store but forgets
//! everything on restart.

use crate::analyses::Claim;
use crate::error::{DatabaseError, Result};
use crate::records::{AnalysisRecord, Completion, RecentResultSummary};
use crate::store::{AnalysisStore, MAX_RECENT_LIMIT};
use chrono::Utc;
use sitescan_core::{AnalysisId, AnalysisStatus};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct State {
    analyses: HashMap<AnalysisId, AnalysisRecord>,
    recent: Vec<RecentResultSummary>,
}

/// In-memory [`AnalysisStore`].
#[derive(Debug, Default)]
pub struct EphemeralStore {
    state: RwLock<State>,
}

impl EphemeralStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl AnalysisStore for EphemeralStore {
    async fn create(&self, record: &AnalysisRecord) -> Result<()> {
        self.state
            .write()
            .await
            .analyses
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &AnalysisId) -> Result<Option<AnalysisRecord>> {
        Ok(self.state.read().await.analyses.get(id).cloned())
    }

    async fn claim(&self, id: &AnalysisId) -> Result<Claim> {
        let mut state = self.state.write().await;
        let Some(record) = state.analyses.get_mut(id) else {
            return Ok(Claim::NotFound);
        };

        if !record.status.can_transition_to(AnalysisStatus::InProgress) {
            return Ok(Claim::AlreadyTerminal(record.status));
        }
        record.status = AnalysisStatus::InProgress;
        record.updated_at = Utc::now();
        Ok(Claim::Claimed(record.clone()))
    }

    async fn finish(&self, id: &AnalysisId, completion: &Completion) -> Result<bool> {
        let mut state = self.state.write().await;
        let record = state
            .analyses
            .get_mut(id)
            .ok_or_else(|| DatabaseError::NotFound(id.to_string()))?;

        if record.status.is_terminal() {
            tracing::warn!(
                analysis_id = %id,
                status = %record.status,
                "Analysis already terminal, ignoring write"
            );
            return Ok(false);
        }
        if !completion.status.is_terminal() || !record.status.can_transition_to(completion.status) {
            return Err(DatabaseError::InvalidTransition {
                from: record.status,
                to: completion.status,
            });
        }

        record.status = completion.status;
        record.results = completion.results.clone();
        record.page = completion.page.clone();
        record.error = completion.error.clone();
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn insert_recent(&self, summary: &RecentResultSummary) -> Result<bool> {
        let mut state = self.state.write().await;
        let exists = state
            .recent
            .iter()
            .any(|s| s.analysis_id == summary.analysis_id && s.status == summary.status);
        if exists {
            return Ok(false);
        }
        state.recent.push(summary.clone());
        Ok(true)
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<RecentResultSummary>> {
        let state = self.state.read().await;
        let mut recent = state.recent.clone();
        // Stable sort keeps insertion order for equal timestamps; reverse it
        // so the latest insert wins ties.
        recent.reverse();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recent.truncate(limit.min(MAX_RECENT_LIMIT));
        Ok(recent)
    }

    async fn purge_expired_recent(&self, retention: chrono::Duration) -> Result<u64> {
        let cutoff = Utc::now() - retention;
        let mut state = self.state.write().await;
        let before = state.recent.len();
        state.recent.retain(|s| s.created_at >= cutoff);
        Ok((before - state.recent.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitescan_core::CapabilitySet;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_lifecycle() {
        let store = EphemeralStore::new();
        let record = AnalysisRecord::pending("https://example.com", CapabilitySet::empty());
        store.create(&record).await.unwrap();

        assert!(matches!(store.claim(&record.id).await.unwrap(), Claim::Claimed(_)));
        assert!(store
            .finish(&record.id, &Completion::completed(BTreeMap::new(), None))
            .await
            .unwrap());
        assert_eq!(
            store.claim(&record.id).await.unwrap(),
            Claim::AlreadyTerminal(AnalysisStatus::Completed)
        );
        assert!(!store
            .finish(&record.id, &Completion::failed("late"))
            .await
            .unwrap());

        let stored = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AnalysisStatus::Completed);
        assert!(stored.error.is_none());
    }

    #[tokio::test]
    async fn test_finish_without_claim_is_rejected() {
        let store = EphemeralStore::new();
        let record = AnalysisRecord::pending("https://example.com", CapabilitySet::empty());
        store.create(&record).await.unwrap();

        assert!(matches!(
            store.finish(&record.id, &Completion::failed("x")).await,
            Err(DatabaseError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_recent_dedup_order_and_purge() {
        let store = EphemeralStore::new();
        let mut record = AnalysisRecord::pending("https://a.example", CapabilitySet::empty());
        record.status = AnalysisStatus::Failed;

        let mut old = RecentResultSummary::for_record(&record);
        old.created_at = Utc::now() - chrono::Duration::days(40);
        assert!(store.insert_recent(&old).await.unwrap());
        assert!(!store
            .insert_recent(&RecentResultSummary::for_record(&record))
            .await
            .unwrap());

        let other = AnalysisRecord::pending("https://b.example", CapabilitySet::empty());
        let fresh = RecentResultSummary::for_record(&other);
        store.insert_recent(&fresh).await.unwrap();

        let listed = store.list_recent(10).await.unwrap();
        assert_eq!(listed[0].url, "https://b.example");

        let removed = store
            .purge_expired_recent(chrono::Duration::days(30))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.list_recent(10).await.unwrap().len(), 1);
    }
}
