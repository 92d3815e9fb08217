//! Headline figures for the recent-results feed.

use serde_json::Value;
use sitescan_core::Capability;
use sitescan_db::{AnalysisRecord, RecentResultSummary, TechnologySummary};

/// Technologies kept on a summary.
pub const TOP_TECHNOLOGIES: usize = 5;

/// Checks that make up the SEO headline score.
pub const SEO_CHECKS: usize = 7;

const DESCRIPTION_LENGTH: std::ops::RangeInclusive<u64> = 50..=160;
const MIN_WORDS: u64 = 300;

fn data<'r>(record: &'r AnalysisRecord, capability: Capability) -> Option<&'r Value> {
    record.results.get(&capability).and_then(|o| o.data())
}

fn clamp_score(value: f64) -> u8 {
    // Clamped to 0..=100 first, so the cast cannot truncate.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let score = value.round().clamp(0.0, 100.0) as u8;
    score
}

/// Share of the SEO checklist that passes, as 0-100.
pub fn seo_score(seo: &Value) -> u8 {
    let non_empty = |key: &str| seo[key].as_str().is_some_and(|s| !s.trim().is_empty());
    let description_len = seo["descriptionLength"].as_u64().unwrap_or(0);

    let checks = [
        non_empty("title"),
        non_empty("description"),
        DESCRIPTION_LENGTH.contains(&description_len),
        seo["hasH1"].as_bool().unwrap_or(false),
        seo["wordCount"].as_u64().unwrap_or(0) >= MIN_WORDS,
        seo["robotsTxtStatus"].as_str() == Some("found"),
        seo["canonical"]["raw"].as_str().is_some(),
    ];
    let passed = checks.iter().filter(|c| **c).count();

    #[allow(clippy::cast_precision_loss)]
    let ratio = passed as f64 / SEO_CHECKS as f64;
    clamp_score(ratio * 100.0)
}

/// 100 minus one point per violated rule.
pub fn accessibility_score(accessibility: &Value) -> u8 {
    let violations = accessibility["violations"]
        .as_array()
        .map_or(0, Vec::len);
    u8::try_from(100usize.saturating_sub(violations)).unwrap_or(0)
}

fn technologies(tech: &Value) -> Vec<TechnologySummary> {
    tech["technologies"]
        .as_array()
        .map(|list| {
            list.iter()
                .filter_map(|t| {
                    Some(TechnologySummary {
                        name: t["name"].as_str()?.to_string(),
                        confidence: t["confidence"].as_f64().unwrap_or(0.0),
                    })
                })
                .take(TOP_TECHNOLOGIES)
                .collect()
        })
        .unwrap_or_default()
}

/// Project a terminal record onto the recent-results feed.
pub fn build_summary(record: &AnalysisRecord) -> RecentResultSummary {
    let mut summary = RecentResultSummary::for_record(record);
    let seo = data(record, Capability::Seo);

    let page = record.page.as_ref();
    summary.title = page
        .and_then(|p| p.title.clone())
        .or_else(|| seo.and_then(|s| s["title"].as_str()).map(ToString::to_string));
    summary.description = page
        .and_then(|p| p.description.clone())
        .or_else(|| seo.and_then(|s| s["description"].as_str()).map(ToString::to_string));

    summary.technologies = data(record, Capability::Tech)
        .map(technologies)
        .unwrap_or_default();
    summary.performance_score = data(record, Capability::Performance)
        .and_then(|p| p["score"].as_f64())
        .map(clamp_score);
    summary.accessibility_score = data(record, Capability::Accessibility).map(accessibility_score);
    summary.seo_score = seo.map(seo_score);
    summary
}
