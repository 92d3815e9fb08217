//! On-page SEO checks plus robots.txt and sitemap discovery.

use crate::capability::{Input, ScanCapability, ScanContext};
use crate::error::CapabilityError;
use crate::http::fetch_text;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Serialize;
use serde_json::Value;
use sitescan_core::Capability;
use std::collections::BTreeSet;
use tracing::debug;
use url::Url;

static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").expect("valid selector"));
static DESCRIPTION: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[name="description"]"#).expect("valid selector"));
static H1: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").expect("valid selector"));
static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").expect("valid selector"));
static CANONICAL: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"link[rel="canonical"]"#).expect("valid selector"));
static JSON_LD: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"script[type="application/ld+json"]"#).expect("valid selector")
});
static HREFLANG: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"link[rel="alternate"][hreflang]"#).expect("valid selector"));

static SITEMAP_DIRECTIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Sitemap:\s*(\S+)").expect("valid regex"));
static URLSET: Lazy<Regex> = Lazy::new(|| Regex::new(r"<urlset[\s>]").expect("valid regex"));
static URL_ENTRY: Lazy<Regex> = Lazy::new(|| Regex::new(r"<url[\s>]").expect("valid regex"));
static SITEMAP_INDEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<sitemapindex[\s>]").expect("valid regex"));
static SITEMAP_ENTRY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<sitemap[\s>]").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Canonical {
    pub raw: Option<String>,
    pub resolved: Option<String>,
    pub same_host: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonLdError {
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonLd {
    pub count: usize,
    pub errors: Vec<JsonLdError>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hreflang {
    pub total: usize,
    pub duplicates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sitemap {
    pub url: Option<String>,
    pub parsed: bool,
    pub url_count: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RobotsTxtStatus {
    Found,
    NotFound,
}

/// Everything the SEO capability reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeoReport {
    pub title: Option<String>,
    pub description: Option<String>,
    pub description_length: usize,
    pub has_h1: bool,
    pub word_count: usize,
    pub robots_txt_status: RobotsTxtStatus,
    pub canonical: Canonical,
    pub json_ld: JsonLd,
    pub hreflang: Hreflang,
    pub sitemap: Sitemap,
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Sitemap location announced in robots.txt, falling back to `/sitemap.xml`.
pub fn discover_sitemap(base: &Url, robots_txt: Option<&str>) -> Option<Url> {
    robots_txt
        .and_then(|text| SITEMAP_DIRECTIVE.captures(text))
        .and_then(|caps| base.join(&caps[1]).ok())
        .or_else(|| base.join("/sitemap.xml").ok())
}

/// Count entries in a sitemap or sitemap index document.
pub fn count_sitemap_entries(xml: &str) -> Result<usize, String> {
    if URLSET.is_match(xml) {
        Ok(URL_ENTRY.find_iter(xml).count())
    } else if SITEMAP_INDEX.is_match(xml) {
        Ok(SITEMAP_ENTRY.find_iter(xml).count())
    } else {
        Err("Unknown sitemap XML structure".to_string())
    }
}

/// Checks that only need the document itself. The sitemap is left unfetched.
pub fn analyze_document(html: &str, base: &Url, robots_txt: Option<&str>) -> SeoReport {
    let document = Html::parse_document(html);

    let title = document
        .select(&TITLE)
        .next()
        .and_then(|el| non_empty(&el.text().collect::<String>()));
    let description = document
        .select(&DESCRIPTION)
        .find_map(|el| el.value().attr("content"))
        .and_then(non_empty);
    let has_h1 = document
        .select(&H1)
        .any(|el| !el.text().collect::<String>().trim().is_empty());
    let word_count = document
        .select(&BODY)
        .next()
        .map_or(0, |body| body.text().flat_map(str::split_whitespace).count());

    let canonical_raw = document
        .select(&CANONICAL)
        .find_map(|el| el.value().attr("href"))
        .and_then(non_empty);
    let canonical_resolved = canonical_raw.as_deref().and_then(|raw| base.join(raw).ok());
    let canonical = Canonical {
        same_host: canonical_resolved
            .as_ref()
            .map(|resolved| resolved.host_str() == base.host_str()),
        resolved: canonical_resolved.map(String::from),
        raw: canonical_raw,
    };

    let mut json_ld = JsonLd {
        count: 0,
        errors: Vec::new(),
    };
    for (index, node) in document.select(&JSON_LD).enumerate() {
        json_ld.count += 1;
        let text: String = node.text().collect();
        if let Err(e) = serde_json::from_str::<Value>(&text) {
            json_ld.errors.push(JsonLdError {
                index,
                message: e.to_string(),
            });
        }
    }

    let langs: Vec<String> = document
        .select(&HREFLANG)
        .filter_map(|el| el.value().attr("hreflang"))
        .filter(|v| !v.is_empty())
        .map(str::to_lowercase)
        .collect();
    let mut seen = BTreeSet::new();
    let duplicates: BTreeSet<String> = langs
        .iter()
        .filter(|lang| !seen.insert(lang.as_str()))
        .cloned()
        .collect();

    let sitemap_url = discover_sitemap(base, robots_txt);

    SeoReport {
        description_length: description.as_ref().map_or(0, |d| d.chars().count()),
        title,
        description,
        has_h1,
        word_count,
        robots_txt_status: if robots_txt.is_some() {
            RobotsTxtStatus::Found
        } else {
            RobotsTxtStatus::NotFound
        },
        canonical,
        json_ld,
        hreflang: Hreflang {
            total: langs.len(),
            duplicates: duplicates.into_iter().collect(),
        },
        sitemap: Sitemap {
            url: sitemap_url.map(String::from),
            parsed: false,
            url_count: 0,
            errors: Vec::new(),
        },
    }
}

/// SEO audit of the shared page.
#[derive(Debug, Default)]
pub struct SeoCapability;

impl SeoCapability {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ScanCapability for SeoCapability {
    fn capability(&self) -> Capability {
        Capability::Seo
    }

    fn inputs(&self) -> &'static [Input] {
        &[Input::Html, Input::RobotsTxt]
    }

    async fn run(&self, ctx: &ScanContext<'_>) -> Result<Value, CapabilityError> {
        let mut report = analyze_document(ctx.html()?, ctx.base_url, ctx.robots_txt());

        let target = report
            .sitemap
            .url
            .as_deref()
            .and_then(|raw| Url::parse(raw).ok());
        if let Some(sitemap_url) = target {
            if sitemap_url.host_str() == ctx.base_url.host_str() {
                match fetch_text(ctx.http, &sitemap_url, ctx.settings.sitemap_timeout).await {
                    Ok(xml) => match count_sitemap_entries(&xml) {
                        Ok(count) => {
                            report.sitemap.parsed = true;
                            report.sitemap.url_count = count;
                        }
                        Err(e) => report.sitemap.errors.push(e),
                    },
                    Err(e) => report.sitemap.errors.push(e.to_string()),
                }
            } else {
                debug!(sitemap = %sitemap_url, "Skipping sitemap on a different host");
                report
                    .sitemap
                    .errors
                    .push("sitemap is hosted on a different host, not fetched".to_string());
            }
        }

        serde_json::to_value(&report).map_err(|e| CapabilityError::Failed(e.to_string()))
    }
}
