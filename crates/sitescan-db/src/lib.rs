//! Sitescan Database Layer
//!
//! Persists analysis records, the recent-result projection and the durable
//! job queue in `SQLite` through `SQLx`.
//!
//! # Architecture
//!
//! - **Records**: [`AnalysisRecord`] moves `pending → in-progress → {completed | failed}`;
//!   the terminal write carries results and status together
//! - **Projection**: [`RecentResultSummary`] rows are append-only and unique per
//!   terminal transition
//! - **Queue**: [`SqliteJobQueue`] leases jobs so a crashed worker's job is redelivered,
//!   up to the retry policy's attempt bound
//! - **Migrations**: SQL migrations are embedded and versioned using `SQLx`
//!
//! # Example
//!
//! ```ignore
//! use sitescan_db::{AnalysisRecord, AnalysisStore, Database};
//! use sitescan_core::CapabilitySet;
//!
//! let db = Database::new("sitescan.db").await?;
//! db.run_migrations().await?;
//! db.create(&AnalysisRecord::pending("https://example.com", CapabilitySet::empty())).await?;
//! ```
//!
//! When persistence is switched off, [`EphemeralStore`] offers the same
//! [`AnalysisStore`] contract in memory.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod analyses;
pub mod connection;
pub mod ephemeral;
pub mod error;
pub mod job_queue;
pub mod migrations;
pub mod recent_results;
pub mod records;
pub mod store;

// Re-export commonly used types
pub use analyses::Claim;
pub use ephemeral::EphemeralStore;
pub use error::{DatabaseError, Result};
pub use job_queue::SqliteJobQueue;
pub use records::{
    AnalysisRecord, CapabilityOutcome, Completion, PageMetadata, RecentResultSummary,
    TechnologySummary,
};
pub use store::{clamp_recent_limit, AnalysisStore, DEFAULT_RECENT_LIMIT, MAX_RECENT_LIMIT};

use sitescan_core::AnalysisId;
use sqlx::{Pool, Sqlite};
use std::path::Path;

/// High-level database interface.
///
/// Cloning is cheap; clones share the same connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Open (or create) the database at `path`.
    ///
    /// Pass [`connection::IN_MEMORY`] for a private in-memory database.
    ///
    /// # Errors
    /// Returns `DatabaseError` if the database cannot be opened.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let pool = connection::open_pool(path).await?;
        Ok(Self { pool })
    }

    /// Open a fresh in-memory database with the schema applied.
    pub async fn in_memory() -> Result<Self> {
        let db = Self::new(connection::IN_MEMORY).await?;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run all pending database migrations.
    ///
    /// # Errors
    /// Returns `DatabaseError::Migration` if any migration fails.
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run_migrations(&self.pool).await
    }

    /// Get the current schema version.
    pub async fn get_schema_version(&self) -> Result<i64> {
        migrations::get_schema_version(&self.pool).await
    }

    /// Get a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Close the database connection gracefully.
    pub async fn close(self) {
        self.pool.close().await;
        tracing::info!("Database pool closed");
    }
}

#[async_trait::async_trait]
impl AnalysisStore for Database {
    async fn create(&self, record: &AnalysisRecord) -> Result<()> {
        analyses::create_analysis(&self.pool, record).await
    }

    async fn get(&self, id: &AnalysisId) -> Result<Option<AnalysisRecord>> {
        analyses::get_analysis(&self.pool, id).await
    }

    async fn claim(&self, id: &AnalysisId) -> Result<Claim> {
        analyses::claim_analysis(&self.pool, id).await
    }

    async fn finish(&self, id: &AnalysisId, completion: &Completion) -> Result<bool> {
        analyses::finish_analysis(&self.pool, id, completion).await
    }

    async fn insert_recent(&self, summary: &RecentResultSummary) -> Result<bool> {
        recent_results::insert_recent_result(&self.pool, summary).await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<RecentResultSummary>> {
        recent_results::list_recent_results(&self.pool, limit.min(MAX_RECENT_LIMIT)).await
    }

    async fn purge_expired_recent(&self, retention: chrono::Duration) -> Result<u64> {
        let removed =
            recent_results::purge_recent_results_before(&self.pool, chrono::Utc::now() - retention)
                .await?;
        if removed > 0 {
            tracing::info!(removed, "Purged expired recent results");
        }
        Ok(removed)
    }
}
