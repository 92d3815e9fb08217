//! Analysis record queries.
//!
//! Status writes are guarded in SQL so a record only ever moves forward
//! through `pending → in-progress → {completed | failed}`.

use crate::error::{DatabaseError, Result};
use crate::records::{format_timestamp, parse_timestamp, AnalysisRecord, Completion};
use chrono::Utc;
use sitescan_core::{AnalysisId, AnalysisStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

/// Outcome of trying to take ownership of an analysis.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// The record is now `in-progress`.
    Claimed(AnalysisRecord),
    /// The record already finished; the job is stale.
    AlreadyTerminal(AnalysisStatus),
    /// No record with this id.
    NotFound,
}

/// Insert a new analysis record.
pub async fn create_analysis(pool: &Pool<Sqlite>, record: &AnalysisRecord) -> Result<()> {
    sqlx::query(
        "INSERT INTO analyses (id, url, status, requested_capabilities, results, page, error_message, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(record.id.as_str())
    .bind(&record.url)
    .bind(record.status.as_str())
    .bind(serde_json::to_string(&record.requested_capabilities)?)
    .bind(serde_json::to_string(&record.results)?)
    .bind(record.page.as_ref().map(serde_json::to_string).transpose()?)
    .bind(record.error.as_deref())
    .bind(format_timestamp(&record.created_at))
    .bind(format_timestamp(&record.updated_at))
    .execute(pool)
    .await?;

    tracing::debug!(analysis_id = %record.id, url = %record.url, "Created analysis record");
    Ok(())
}

/// Fetch an analysis record by id.
pub async fn get_analysis(pool: &Pool<Sqlite>, id: &AnalysisId) -> Result<Option<AnalysisRecord>> {
    let row = sqlx::query(
        "SELECT id, url, status, requested_capabilities, results, page, error_message, created_at, updated_at
         FROM analyses WHERE id = ?",
    )
    .bind(id.as_str())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(map_analysis_row).transpose()
}

/// Move a `pending` (or redelivered `in-progress`) record to `in-progress`.
pub async fn claim_analysis(pool: &Pool<Sqlite>, id: &AnalysisId) -> Result<Claim> {
    let moved = transition(pool, id, AnalysisStatus::InProgress).await?;

    match get_analysis(pool, id).await? {
        None => Ok(Claim::NotFound),
        Some(record) if moved => Ok(Claim::Claimed(record)),
        Some(record) => Ok(Claim::AlreadyTerminal(record.status)),
    }
}

/// Write the terminal status together with results, page facts and error.
///
/// Returns `false` if the record had already reached a terminal status, in
/// which case nothing was written.
pub async fn finish_analysis(
    pool: &Pool<Sqlite>,
    id: &AnalysisId,
    completion: &Completion,
) -> Result<bool> {
    if !completion.status.is_terminal() {
        return Err(DatabaseError::InvalidTransition {
            from: AnalysisStatus::InProgress,
            to: completion.status,
        });
    }

    let predecessors = AnalysisStatus::predecessors(completion.status);
    let sql = format!(
        "UPDATE analyses SET status = ?, results = ?, page = ?, error_message = ?, updated_at = ?
         WHERE id = ? AND status IN ({})",
        placeholders(predecessors.len())
    );
    let mut query = sqlx::query(&sql)
        .bind(completion.status.as_str())
        .bind(serde_json::to_string(&completion.results)?)
        .bind(completion.page.as_ref().map(serde_json::to_string).transpose()?)
        .bind(completion.error.as_deref())
        .bind(format_timestamp(&Utc::now()))
        .bind(id.as_str());
    for status in predecessors {
        query = query.bind(status.as_str());
    }

    if query.execute(pool).await?.rows_affected() == 1 {
        tracing::debug!(analysis_id = %id, status = %completion.status, "Analysis finished");
        return Ok(true);
    }

    match current_status(pool, id).await? {
        None => Err(DatabaseError::NotFound(id.to_string())),
        Some(status) if status.is_terminal() => {
            tracing::warn!(analysis_id = %id, %status, "Analysis already terminal, ignoring write");
            Ok(false)
        }
        Some(status) => Err(DatabaseError::InvalidTransition {
            from: status,
            to: completion.status,
        }),
    }
}

async fn transition(pool: &Pool<Sqlite>, id: &AnalysisId, next: AnalysisStatus) -> Result<bool> {
    let predecessors = AnalysisStatus::predecessors(next);
    let sql = format!(
        "UPDATE analyses SET status = ?, updated_at = ? WHERE id = ? AND status IN ({})",
        placeholders(predecessors.len())
    );
    let mut query = sqlx::query(&sql)
        .bind(next.as_str())
        .bind(format_timestamp(&Utc::now()))
        .bind(id.as_str());
    for status in predecessors {
        query = query.bind(status.as_str());
    }

    Ok(query.execute(pool).await?.rows_affected() == 1)
}

async fn current_status(pool: &Pool<Sqlite>, id: &AnalysisId) -> Result<Option<AnalysisStatus>> {
    let status: Option<String> = sqlx::query_scalar("SELECT status FROM analyses WHERE id = ?")
        .bind(id.as_str())
        .fetch_optional(pool)
        .await?;

    status.map(|s| decode_status(&s)).transpose()
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

pub(crate) fn decode_status(value: &str) -> Result<AnalysisStatus> {
    value
        .parse()
        .map_err(|e| DatabaseError::Decode(format!("{e}")))
}

pub(crate) fn decode_id(value: String) -> Result<AnalysisId> {
    AnalysisId::new(value).map_err(|e| DatabaseError::Decode(format!("{e}")))
}

fn map_analysis_row(row: &SqliteRow) -> Result<AnalysisRecord> {
    let page: Option<String> = row.try_get("page")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let status: String = row.try_get("status")?;
    let requested: String = row.try_get("requested_capabilities")?;
    let results: String = row.try_get("results")?;

    Ok(AnalysisRecord {
        id: decode_id(row.try_get("id")?)?,
        url: row.try_get("url")?,
        status: decode_status(&status)?,
        requested_capabilities: serde_json::from_str(&requested)?,
        results: serde_json::from_str(&results)?,
        page: page.as_deref().map(serde_json::from_str).transpose()?,
        error: row.try_get("error_message")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{open_pool, IN_MEMORY};
    use crate::migrations::run_migrations;
    use crate::records::{CapabilityOutcome, PageMetadata};
    use serde_json::json;
    use sitescan_core::{Capability, CapabilitySet};
    use std::collections::BTreeMap;

    async fn setup_test_db() -> Pool<Sqlite> {
        let pool = open_pool(IN_MEMORY).await.expect("open pool");
        run_migrations(&pool).await.expect("run migrations");
        pool
    }

    async fn create_pending(pool: &Pool<Sqlite>) -> AnalysisRecord {
        let requested = CapabilitySet::parse(&["seo", "tech"]).unwrap();
        let record = AnalysisRecord::pending("https://example.com", requested);
        create_analysis(pool, &record).await.expect("create");
        record
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let pool = setup_test_db().await;
        let record = create_pending(&pool).await;

        let loaded = get_analysis(&pool, &record.id)
            .await
            .expect("get")
            .expect("record exists");
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let pool = setup_test_db().await;
        let missing = get_analysis(&pool, &AnalysisId::generate()).await.expect("get");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_claim_moves_to_in_progress() {
        let pool = setup_test_db().await;
        let record = create_pending(&pool).await;

        let Claim::Claimed(claimed) = claim_analysis(&pool, &record.id).await.unwrap() else {
            panic!("expected claim");
        };
        assert_eq!(claimed.status, AnalysisStatus::InProgress);

        // Redelivery of the same job may claim again.
        assert!(matches!(
            claim_analysis(&pool, &record.id).await.unwrap(),
            Claim::Claimed(_)
        ));
    }

    #[tokio::test]
    async fn test_claim_missing_record() {
        let pool = setup_test_db().await;
        let claim = claim_analysis(&pool, &AnalysisId::generate()).await.unwrap();
        assert_eq!(claim, Claim::NotFound);
    }

    #[tokio::test]
    async fn test_finish_writes_results_and_status_together() {
        let pool = setup_test_db().await;
        let record = create_pending(&pool).await;
        claim_analysis(&pool, &record.id).await.unwrap();

        let mut results = BTreeMap::new();
        results.insert(Capability::Seo, CapabilityOutcome::success(json!({"hasH1": true})));
        results.insert(Capability::Tech, CapabilityOutcome::error("selector exploded"));
        let page = PageMetadata {
            title: Some("Example".to_string()),
            final_url: "https://example.com/".to_string(),
            ..PageMetadata::default()
        };

        let completion = Completion::completed(results.clone(), Some(page.clone()));
        let written = finish_analysis(&pool, &record.id, &completion).await.unwrap();
        assert!(written);

        let loaded = get_analysis(&pool, &record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, AnalysisStatus::Completed);
        assert_eq!(loaded.results, results);
        assert_eq!(loaded.page, Some(page));
        assert!(loaded.updated_at >= loaded.created_at);
    }

    #[tokio::test]
    async fn test_terminal_record_is_not_reclaimed_or_overwritten() {
        let pool = setup_test_db().await;
        let record = create_pending(&pool).await;
        claim_analysis(&pool, &record.id).await.unwrap();
        finish_analysis(&pool, &record.id, &Completion::failed("page load timed out"))
            .await
            .unwrap();

        assert_eq!(
            claim_analysis(&pool, &record.id).await.unwrap(),
            Claim::AlreadyTerminal(AnalysisStatus::Failed)
        );

        let completion = Completion::completed(BTreeMap::new(), None);
        let rewritten = finish_analysis(&pool, &record.id, &completion).await.unwrap();
        assert!(!rewritten);

        let loaded = get_analysis(&pool, &record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, AnalysisStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("page load timed out"));
    }

    #[tokio::test]
    async fn test_finish_requires_claim() {
        let pool = setup_test_db().await;
        let record = create_pending(&pool).await;

        let completion = Completion::completed(BTreeMap::new(), None);
        let result = finish_analysis(&pool, &record.id, &completion).await;
        assert!(matches!(
            result,
            Err(DatabaseError::InvalidTransition {
                from: AnalysisStatus::Pending,
                to: AnalysisStatus::Completed
            })
        ));
    }

    #[tokio::test]
    async fn test_finish_rejects_non_terminal_status() {
        let pool = setup_test_db().await;
        let record = create_pending(&pool).await;
        let mut completion = Completion::failed("x");
        completion.status = AnalysisStatus::Pending;

        assert!(finish_analysis(&pool, &record.id, &completion).await.is_err());
    }

    #[tokio::test]
    async fn test_finish_missing_record() {
        let pool = setup_test_db().await;
        let result =
            finish_analysis(&pool, &AnalysisId::generate(), &Completion::failed("x")).await;
        assert!(matches!(result, Err(DatabaseError::NotFound(_))));
    }
}
