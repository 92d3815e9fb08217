//! Recent-result projection queries.

use crate::analyses::{decode_id, decode_status};
use crate::error::Result;
use crate::records::{format_timestamp, parse_timestamp, RecentResultSummary};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

/// Insert a summary unless one already exists for the same analysis and
/// terminal status.
///
/// Returns `true` if a row was written.
pub async fn insert_recent_result(
    pool: &Pool<Sqlite>,
    summary: &RecentResultSummary,
) -> Result<bool> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO recent_results
            (id, analysis_id, url, status, title, description, technologies,
             performance_score, accessibility_score, seo_score, error_message, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&summary.id)
    .bind(summary.analysis_id.as_str())
    .bind(&summary.url)
    .bind(summary.status.as_str())
    .bind(summary.title.as_deref())
    .bind(summary.description.as_deref())
    .bind(serde_json::to_string(&summary.technologies)?)
    .bind(summary.performance_score.map(i64::from))
    .bind(summary.accessibility_score.map(i64::from))
    .bind(summary.seo_score.map(i64::from))
    .bind(summary.error.as_deref())
    .bind(format_timestamp(&summary.created_at))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// The `limit` newest summaries, newest first.
pub async fn list_recent_results(
    pool: &Pool<Sqlite>,
    limit: usize,
) -> Result<Vec<RecentResultSummary>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = sqlx::query(
        "SELECT id, analysis_id, url, status, title, description, technologies,
                performance_score, accessibility_score, seo_score, error_message, created_at
         FROM recent_results
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(map_summary_row).collect()
}

/// Delete summaries created before `cutoff`. Returns the number removed.
pub async fn purge_recent_results_before(
    pool: &Pool<Sqlite>,
    cutoff: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query("DELETE FROM recent_results WHERE created_at < ?")
        .bind(format_timestamp(&cutoff))
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

fn score(row: &SqliteRow, column: &str) -> Result<Option<u8>> {
    let value: Option<i64> = row.try_get(column)?;
    Ok(value.map(|v| u8::try_from(v.clamp(0, 100)).unwrap_or(100)))
}

fn map_summary_row(row: &SqliteRow) -> Result<RecentResultSummary> {
    let status: String = row.try_get("status")?;
    let technologies: String = row.try_get("technologies")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(RecentResultSummary {
        id: row.try_get("id")?,
        analysis_id: decode_id(row.try_get("analysis_id")?)?,
        url: row.try_get("url")?,
        status: decode_status(&status)?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        technologies: serde_json::from_str(&technologies)?,
        performance_score: score(row, "performance_score")?,
        accessibility_score: score(row, "accessibility_score")?,
        seo_score: score(row, "seo_score")?,
        error: row.try_get("error_message")?,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{open_pool, IN_MEMORY};
    use crate::migrations::run_migrations;
    use crate::records::{AnalysisRecord, TechnologySummary};
    use chrono::Duration;
    use sitescan_core::{AnalysisStatus, CapabilitySet};

    async fn setup_test_db() -> Pool<Sqlite> {
        let pool = open_pool(IN_MEMORY).await.expect("open pool");
        run_migrations(&pool).await.expect("run migrations");
        pool
    }

    fn summary(url: &str, created_at: DateTime<Utc>) -> RecentResultSummary {
        let mut record = AnalysisRecord::pending(url, CapabilitySet::empty());
        record.status = AnalysisStatus::Completed;
        let mut summary = RecentResultSummary::for_record(&record);
        summary.created_at = created_at;
        summary
    }

    #[tokio::test]
    async fn test_insert_and_list() {
        let pool = setup_test_db().await;
        let mut s = summary("https://example.com", Utc::now());
        s.technologies = vec![TechnologySummary {
            name: "React".to_string(),
            confidence: 0.9,
        }];
        s.seo_score = Some(71);

        assert!(insert_recent_result(&pool, &s).await.unwrap());
        let listed = list_recent_results(&pool, 20).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].technologies[0].name, "React");
        assert_eq!(listed[0].seo_score, Some(71));
        assert_eq!(listed[0].performance_score, None);
    }

    #[tokio::test]
    async fn test_insert_is_idempotent_per_terminal_transition() {
        let pool = setup_test_db().await;
        let s = summary("https://example.com", Utc::now());
        let mut duplicate = s.clone();
        duplicate.id = "another-summary".to_string();

        assert!(insert_recent_result(&pool, &s).await.unwrap());
        assert!(!insert_recent_result(&pool, &duplicate).await.unwrap());
        assert_eq!(list_recent_results(&pool, 20).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_newest_first_with_limit() {
        let pool = setup_test_db().await;
        let now = Utc::now();
        for (i, url) in ["https://a.example", "https://b.example", "https://c.example"]
            .iter()
            .enumerate()
        {
            let offset = Duration::minutes(i64::try_from(i).unwrap());
            insert_recent_result(&pool, &summary(url, now + offset))
                .await
                .unwrap();
        }

        let listed = list_recent_results(&pool, 2).await.unwrap();
        let urls: Vec<_> = listed.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(urls, vec!["https://c.example", "https://b.example"]);
    }

    #[tokio::test]
    async fn test_purge_before_cutoff() {
        let pool = setup_test_db().await;
        let now = Utc::now();
        insert_recent_result(&pool, &summary("https://old.example", now - Duration::days(31)))
            .await
            .unwrap();
        insert_recent_result(&pool, &summary("https://new.example", now))
            .await
            .unwrap();

        let removed = purge_recent_results_before(&pool, now - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let remaining = list_recent_results(&pool, 20).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].url, "https://new.example");
    }
}
