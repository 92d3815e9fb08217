//! Shared types used across the Sitescan workspace.
//!
//! This module defines the identifiers, capability tags and the analysis
//! status state machine that the queue, store and orchestrator agree on.

use crate::error::SitescanError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Newtype for analysis identifiers with validation.
///
/// Analysis IDs are UUID v4 strings. They key the analysis record, the queued
/// job and the notification room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisId(String);

impl AnalysisId {
    /// Create a new `AnalysisId` from a string.
    ///
    /// # Errors
    /// Returns error if the ID is not a valid UUID v4.
    pub fn new(id: impl Into<String>) -> Result<Self, SitescanError> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Create a new random `AnalysisId` using UUID v4.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Room key used by real-time subscribers of this analysis.
    #[must_use]
    pub fn room_key(&self) -> String {
        format!("analysis:{}", self.0)
    }

    fn validate(id: &str) -> Result<(), SitescanError> {
        static UUID_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = UUID_REGEX.get_or_init(|| {
            Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
                .expect("valid regex")
        });

        if regex.is_match(id) {
            Ok(())
        } else {
            Err(SitescanError::Validation(format!(
                "invalid analysis ID: must be a valid UUID v4, got '{id}'"
            )))
        }
    }
}

impl fmt::Display for AnalysisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One independently pluggable audit operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Technology fingerprinting
    Tech,
    /// SEO checks
    Seo,
    /// Performance audit
    Performance,
    /// Accessibility audit
    Accessibility,
    /// Security headers and TLS audit
    Security,
}

/// What a capability needs from the orchestrator before it can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Shares the single rendered page loaded for the job.
    RenderedPage,
    /// Runs on its own and does not need the shared page to load.
    SelfContained,
}

impl Capability {
    /// Every capability, in a stable order.
    pub const ALL: [Capability; 5] = [
        Self::Tech,
        Self::Seo,
        Self::Performance,
        Self::Accessibility,
        Self::Security,
    ];

    /// Tag used on the wire and as the result key.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tech => "tech",
            Self::Seo => "seo",
            Self::Performance => "performance",
            Self::Accessibility => "accessibility",
            Self::Security => "security",
        }
    }

    /// Whether this capability consumes the shared rendered page.
    #[must_use]
    pub fn requirement(&self) -> Requirement {
        match self {
            Self::Tech | Self::Seo | Self::Accessibility => Requirement::RenderedPage,
            Self::Performance | Self::Security => Requirement::SelfContained,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = SitescanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tech" => Ok(Self::Tech),
            "seo" => Ok(Self::Seo),
            "performance" => Ok(Self::Performance),
            "accessibility" => Ok(Self::Accessibility),
            "security" => Ok(Self::Security),
            other => Err(SitescanError::Validation(format!(
                "unknown capability '{other}'"
            ))),
        }
    }
}

/// The set of capabilities requested for one analysis.
///
/// An empty set means "run everything"; use [`CapabilitySet::resolve`] to get
/// the effective selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    /// An empty (run-all) selection.
    #[must_use]
    pub fn empty() -> Self {
        Self(BTreeSet::new())
    }

    /// Parse capability tags as received from a client.
    ///
    /// # Errors
    /// Returns a validation error for the first unknown tag.
    pub fn parse<S: AsRef<str>>(tags: &[S]) -> Result<Self, SitescanError> {
        tags.iter()
            .map(|tag| tag.as_ref().parse::<Capability>())
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Self)
    }

    /// The capabilities that will actually run.
    #[must_use]
    pub fn resolve(&self) -> BTreeSet<Capability> {
        if self.0.is_empty() {
            Capability::ALL.into_iter().collect()
        } else {
            self.0.clone()
        }
    }

    /// True if nothing was requested explicitly.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the explicitly requested capabilities.
    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Lifecycle status of an analysis record.
///
/// Transitions are monotonic: `pending → in-progress → {completed | failed}`.
/// A redelivered job may re-claim a record that is already `in-progress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisStatus {
    /// Created, waiting in the queue
    Pending,
    /// Claimed by a worker
    InProgress,
    /// All requested capabilities ran and were aggregated
    Completed,
    /// Orchestration-level failure
    Failed,
}

impl AnalysisStatus {
    /// Storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Terminal statuses never transition again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self → next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, next: AnalysisStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending | Self::InProgress, Self::InProgress)
                | (Self::InProgress, Self::Completed | Self::Failed)
        )
    }

    /// Statuses from which `next` may be entered.
    #[must_use]
    pub fn predecessors(next: AnalysisStatus) -> &'static [AnalysisStatus] {
        match next {
            Self::Pending => &[],
            Self::InProgress => &[Self::Pending, Self::InProgress],
            Self::Completed | Self::Failed => &[Self::InProgress],
        }
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisStatus {
    type Err = SitescanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in-progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(SitescanError::Validation(format!(
                "unknown analysis status '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_id_valid() {
        let id = "550e8400-e29b-41d4-a716-446655440000";
        let analysis_id = AnalysisId::new(id).expect("valid analysis ID");
        assert_eq!(analysis_id.as_str(), id);
        assert_eq!(analysis_id.room_key(), format!("analysis:{id}"));
    }

    #[test]
    fn test_analysis_id_invalid() {
        let invalid_ids = vec![
            "not-a-uuid",
            "550e8400-e29b-51d4-a716-446655440000", // Wrong version
            "550e8400-e29b-41d4-x716-446655440000", // Invalid hex
            "",
        ];

        for id in invalid_ids {
            assert!(AnalysisId::new(id).is_err());
        }
    }

    #[test]
    fn test_analysis_id_generate() {
        let id1 = AnalysisId::generate();
        let id2 = AnalysisId::generate();
        assert_ne!(id1, id2);
        assert!(AnalysisId::new(id1.as_str()).is_ok());
    }

    #[test]
    fn test_capability_parse() {
        assert_eq!("tech".parse::<Capability>().unwrap(), Capability::Tech);
        assert_eq!(" SEO ".parse::<Capability>().unwrap(), Capability::Seo);
        assert!("lighthouse".parse::<Capability>().is_err());
    }

    #[test]
    fn test_capability_requirement() {
        assert_eq!(Capability::Tech.requirement(), Requirement::RenderedPage);
        assert_eq!(Capability::Seo.requirement(), Requirement::RenderedPage);
        assert_eq!(
            Capability::Accessibility.requirement(),
            Requirement::RenderedPage
        );
        assert_eq!(
            Capability::Performance.requirement(),
            Requirement::SelfContained
        );
        assert_eq!(Capability::Security.requirement(), Requirement::SelfContained);
    }

    #[test]
    fn test_empty_set_resolves_to_all() {
        let set = CapabilitySet::empty();
        assert_eq!(set.resolve().len(), Capability::ALL.len());
    }

    #[test]
    fn test_subset_resolves_to_itself() {
        let set = CapabilitySet::parse(&["tech", "seo", "tech"]).expect("parse tags");
        let resolved = set.resolve();
        assert_eq!(resolved.len(), 2);
        assert!(resolved.contains(&Capability::Tech));
        assert!(resolved.contains(&Capability::Seo));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let result = CapabilitySet::parse(&["tech", "pwa"]);
        assert!(matches!(result, Err(SitescanError::Validation(_))));
    }

    #[test]
    fn test_capability_set_serialization() {
        let set: CapabilitySet = [Capability::Seo, Capability::Tech].into_iter().collect();
        let json = serde_json::to_string(&set).expect("serialize set");
        assert_eq!(json, r#"["tech","seo"]"#);
    }

    #[test]
    fn test_status_transitions() {
        use AnalysisStatus::*;

        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!InProgress.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(InProgress));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Pending));
    }

    #[test]
    fn test_predecessors_match_transitions() {
        for next in [
            AnalysisStatus::Pending,
            AnalysisStatus::InProgress,
            AnalysisStatus::Completed,
            AnalysisStatus::Failed,
        ] {
            for prev in AnalysisStatus::predecessors(next) {
                assert!(prev.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_status_round_trip_str() {
        let status: AnalysisStatus = "in-progress".parse().expect("parse status");
        assert_eq!(status, AnalysisStatus::InProgress);
        assert_eq!(status.to_string(), "in-progress");

        let json = serde_json::to_string(&AnalysisStatus::InProgress).expect("serialize");
        assert_eq!(json, "\"in-progress\"");
    }
}
