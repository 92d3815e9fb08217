//! Record types persisted by the store.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sitescan_core::{AnalysisId, AnalysisStatus, Capability, CapabilitySet};
use std::collections::BTreeMap;

use crate::error::{DatabaseError, Result};

/// Result of running a single capability.
///
/// A failing capability is recorded in place of its data so sibling results
/// survive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CapabilityOutcome {
    /// The capability returned structured data.
    Success {
        /// Capability-specific payload
        data: Value,
    },
    /// The capability raised an error or ran past its deadline.
    Error {
        /// Human-readable reason
        message: String,
        /// True when the per-capability deadline fired
        #[serde(default)]
        timed_out: bool,
    },
}

impl CapabilityOutcome {
    /// Successful outcome wrapping `data`.
    #[must_use]
    pub fn success(data: Value) -> Self {
        Self::Success { data }
    }

    /// Error outcome with `message`.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            timed_out: false,
        }
    }

    /// Error outcome for a capability that exceeded its deadline.
    pub fn timed_out(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            timed_out: true,
        }
    }

    /// Payload of a successful run.
    #[must_use]
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Success { data } => Some(data),
            Self::Error { .. } => None,
        }
    }

    /// True if the capability failed.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Captured-once facts about the rendered page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    /// Document title
    pub title: Option<String>,
    /// `<meta name="description">` content
    pub description: Option<String>,
    /// Text of the first `<h1>`
    pub h1: Option<String>,
    /// URL after redirects
    pub final_url: String,
    /// Base64 encoded JPEG screenshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

/// Durable record of one analysis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    /// Record identifier
    pub id: AnalysisId,
    /// URL as submitted
    pub url: String,
    /// Lifecycle status
    pub status: AnalysisStatus,
    /// Capabilities the client asked for; empty means all
    pub requested_capabilities: CapabilitySet,
    /// Per-capability outcomes
    pub results: BTreeMap<Capability, CapabilityOutcome>,
    /// Rendered page facts, when a page was loaded
    pub page: Option<PageMetadata>,
    /// Orchestration-level error
    pub error: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl AnalysisRecord {
    /// A fresh `pending` record with a generated id.
    pub fn pending(url: impl Into<String>, requested_capabilities: CapabilitySet) -> Self {
        let now = Utc::now();
        Self {
            id: AnalysisId::generate(),
            url: url.into(),
            status: AnalysisStatus::Pending,
            requested_capabilities,
            results: BTreeMap::new(),
            page: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Final write applied when an analysis reaches a terminal status.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// `completed` or `failed`
    pub status: AnalysisStatus,
    /// Per-capability outcomes
    pub results: BTreeMap<Capability, CapabilityOutcome>,
    /// Rendered page facts
    pub page: Option<PageMetadata>,
    /// Orchestration-level error
    pub error: Option<String>,
}

impl Completion {
    /// Successful completion.
    #[must_use]
    pub fn completed(
        results: BTreeMap<Capability, CapabilityOutcome>,
        page: Option<PageMetadata>,
    ) -> Self {
        Self {
            status: AnalysisStatus::Completed,
            results,
            page,
            error: None,
        }
    }

    /// Orchestration failure.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: AnalysisStatus::Failed,
            results: BTreeMap::new(),
            page: None,
            error: Some(error.into()),
        }
    }
}

/// A detected technology as shown in recent-result listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnologySummary {
    /// Technology name
    pub name: String,
    /// Detection confidence in `[0, 1]`
    pub confidence: f64,
}

/// Denormalized projection of a terminal analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentResultSummary {
    /// Summary identifier
    pub id: String,
    /// Analysis this summary was derived from
    pub analysis_id: AnalysisId,
    /// Analyzed URL
    pub url: String,
    /// `completed` or `failed`
    pub status: AnalysisStatus,
    /// Page title
    pub title: Option<String>,
    /// Page description
    pub description: Option<String>,
    /// Top detected technologies, highest confidence first
    pub technologies: Vec<TechnologySummary>,
    /// Performance score 0..=100
    pub performance_score: Option<u8>,
    /// Accessibility score 0..=100
    pub accessibility_score: Option<u8>,
    /// SEO score 0..=100
    pub seo_score: Option<u8>,
    /// Failure reason for failed analyses
    pub error: Option<String>,
    /// Projection time
    pub created_at: DateTime<Utc>,
}

impl RecentResultSummary {
    /// Summary for `record` with no headline fields filled in.
    #[must_use]
    pub fn for_record(record: &AnalysisRecord) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            analysis_id: record.id.clone(),
            url: record.url.clone(),
            status: record.status,
            title: None,
            description: None,
            technologies: Vec::new(),
            performance_score: None,
            accessibility_score: None,
            seo_score: None,
            error: record.error.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Fixed-width UTC timestamp so stored values sort lexicographically.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Decode(format!("invalid timestamp '{value}': {e}")))
}
