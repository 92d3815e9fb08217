//! Technology fingerprinting from markup, headers and page globals.
//!
//! Each rule contributes weighted evidence from three sources: asset URLs and
//! markup patterns, global variable names, and structural indicators. The
//! rule's own confidence scales every contribution and a technology is
//! reported once the sum passes [`DETECTION_THRESHOLD`].

use crate::capability::{Input, ScanCapability, ScanContext};
use crate::error::CapabilityError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::HeaderMap;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sitescan_core::Capability;
use tracing::{debug, warn};

const PATTERN_WEIGHT: f64 = 0.4;
const GLOBAL_VAR_WEIGHT: f64 = 0.4;
const INDICATOR_WEIGHT: f64 = 0.3;

/// Minimum summed confidence for a rule-based detection.
pub const DETECTION_THRESHOLD: f64 = 0.2;

const HEAVY_IMAGE_COUNT: usize = 50;

struct RuleSource {
    name: &'static str,
    category: &'static str,
    patterns: &'static [&'static str],
    global_vars: &'static [&'static str],
    indicators: &'static [&'static str],
    confidence: f64,
}

#[rustfmt::skip]
static RULE_SOURCES: &[RuleSource] = &[
    RuleSource { name: "React", category: "JS Library", patterns: &[r"(?i)react(?:-dom)?(?:\.min)?\.js"], global_vars: &["__REACT_DEVTOOLS_GLOBAL_HOOK__"], indicators: &[r"__reactInternalInstance"], confidence: 0.9 },
    RuleSource { name: "Vue.js", category: "JS Library", patterns: &[r"(?i)vue(?:\.runtime)?(?:\.min)?\.js"], global_vars: &["__VUE_DEVTOOLS_GLOBAL_HOOK__"], indicators: &[r"__vue__"], confidence: 0.9 },
    RuleSource { name: "Angular", category: "JS Framework", patterns: &[r"(?i)angular(?:\.min)?\.js|@angular"], global_vars: &["angular"], indicators: &[r"ng-"], confidence: 0.8 },
    RuleSource { name: "Next.js", category: "JS Framework", patterns: &[r"(?i)__NEXT_DATA__|__NEXT_|nextjs"], global_vars: &["__NEXT_DATA__"], indicators: &[r"_next/static"], confidence: 0.95 },
    RuleSource { name: "Nuxt.js", category: "JS Framework", patterns: &[r"(?i)nuxt(?:\.min)?\.js|@nuxt"], global_vars: &["$nuxt"], indicators: &[r"__NUXT__"], confidence: 0.9 },
    RuleSource { name: "jQuery", category: "JS Library", patterns: &[r"(?i)jquery(?:\.min)?\.js"], global_vars: &["jQuery", "jQ"], indicators: &[r"jQuery\("], confidence: 0.8 },
    RuleSource { name: "Bootstrap", category: "UI Framework", patterns: &[r"(?i)bootstrap(?:\.min)?\.css|bootstrap\.js"], global_vars: &[], indicators: &[r"container-fluid|\.row|\.col-"], confidence: 0.85 },
    RuleSource { name: "Tailwind CSS", category: "UI Framework", patterns: &[r"(?i)tailwind|@tailwind"], global_vars: &[], indicators: &[r"flex|mx-auto|grid-cols|padding-\d|text-\w+-\d"], confidence: 0.8 },
    RuleSource { name: "Material Design", category: "UI Framework", patterns: &[r"(?i)material-design|@material|mdl"], global_vars: &[], indicators: &[r"mdl-|mdc-|mat-"], confidence: 0.8 },
    RuleSource { name: "WordPress", category: "CMS", patterns: &[r"(?i)wp-content|wp-includes|WordPress"], global_vars: &[], indicators: &[r"wp-json|wordpress"], confidence: 0.95 },
    RuleSource { name: "Drupal", category: "CMS", patterns: &[r"(?i)Drupal\.settings|sites/all/modules"], global_vars: &["Drupal"], indicators: &[], confidence: 0.9 },
    RuleSource { name: "Shopify", category: "E-commerce", patterns: &[r"(?i)Shopify|shopify\.app"], global_vars: &["Shopify"], indicators: &[r"/cdn/shop/|Shopify\.theme"], confidence: 0.95 },
    RuleSource { name: "Wix", category: "Site Builder", patterns: &[r"(?i)wix\.com|Wix\.setPagePermissions"], global_vars: &["Wix"], indicators: &[], confidence: 0.9 },
    RuleSource { name: "TypeScript", category: "Language", patterns: &[r"(?i)typescript|\.ts|tsconfig"], global_vars: &[], indicators: &[r"interface\s+\w+|type\s+\w+="], confidence: 0.7 },
    RuleSource { name: "Webpack", category: "Build Tool", patterns: &[r"(?i)webpack|__webpack_"], global_vars: &["__webpack_require__"], indicators: &[], confidence: 0.8 },
    RuleSource { name: "Google Analytics", category: "Analytics", patterns: &[r"(?i)google-analytics|googletagmanager|gtag|ga\("], global_vars: &[], indicators: &[r"GoogleAnalyticsObject|_gaq"], confidence: 0.95 },
    RuleSource { name: "Google Tag Manager", category: "Analytics", patterns: &[r"(?i)googletagmanager\.com/gtm\.js"], global_vars: &[], indicators: &[r"gtag\.js"], confidence: 0.95 },
    RuleSource { name: "Facebook Pixel", category: "Analytics", patterns: &[r"(?i)facebook\.com/en_US/fbevents\.js|facebook\.com/.*fbevents"], global_vars: &[], indicators: &[r"fbq\("], confidence: 0.9 },
    RuleSource { name: "Intercom", category: "Customer Support", patterns: &[r"(?i)intercom\.io/messages\.js|intercom-frame"], global_vars: &["Intercom"], indicators: &[], confidence: 0.9 },
    RuleSource { name: "Hotjar", category: "Analytics", patterns: &[r"(?i)hotjar\.com/\?"], global_vars: &["hj", "hjSiteId"], indicators: &[], confidence: 0.9 },
    RuleSource { name: "Sentry", category: "Monitoring", patterns: &[r"(?i)sentry\.io|Sentry\.init"], global_vars: &["__SENTRY__"], indicators: &[], confidence: 0.85 },
];

struct Rule {
    name: &'static str,
    category: &'static str,
    patterns: Vec<Regex>,
    global_vars: Vec<Regex>,
    indicators: Vec<Regex>,
    confidence: f64,
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    let compile = |sources: &[&str]| -> Vec<Regex> {
        sources
            .iter()
            .map(|s| Regex::new(s).expect("valid regex"))
            .collect()
    };
    RULE_SOURCES
        .iter()
        .map(|source| Rule {
            name: source.name,
            category: source.category,
            patterns: compile(source.patterns),
            global_vars: source
                .global_vars
                .iter()
                .map(|var| {
                    Regex::new(&format!(r"(?i)\b{}\b", regex::escape(var))).expect("valid regex")
                })
                .collect(),
            indicators: compile(source.indicators),
            confidence: source.confidence,
        })
        .collect()
});

static SCRIPT_SRC: Lazy<Selector> =
    Lazy::new(|| Selector::parse("script[src]").expect("valid selector"));
static STYLESHEET: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"link[rel="stylesheet"]"#).expect("valid selector"));
static IMG: Lazy<Selector> = Lazy::new(|| Selector::parse("img").expect("valid selector"));
static GENERATOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[name="generator"]"#).expect("valid selector"));

/// Globals probed in the live page.
const GLOBALS_SCRIPT: &str = r"(() => ({
    chart: typeof window.Chart !== 'undefined',
    jquery: typeof window.jQuery !== 'undefined',
    react: typeof window.React !== 'undefined' || !!window.__REACT_DEVTOOLS_GLOBAL_HOOK__,
    vue: typeof window.Vue !== 'undefined',
    angular: typeof window.angular !== 'undefined',
    next: typeof window.__NEXT_DATA__ !== 'undefined'
}))()";

/// Runtime globals observed in the page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PageGlobals {
    pub chart: bool,
    pub jquery: bool,
    pub react: bool,
    pub vue: bool,
    pub angular: bool,
    pub next: bool,
}

impl PageGlobals {
    fn defines_global_for(&self, rule: &str) -> bool {
        match rule {
            "React" => self.react,
            "Vue.js" => self.vue,
            "Angular" => self.angular,
            "Next.js" => self.next,
            "jQuery" => self.jquery,
            _ => false,
        }
    }
}

/// One detected technology.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Technology {
    pub name: String,
    pub category: String,
    pub confidence: f64,
    pub evidence: String,
}

fn round_confidence(value: f64) -> f64 {
    ((value * 100.0).round() / 100.0).min(1.0)
}

fn header_value<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Apply every rule to a page.
pub fn detect_technologies(
    html: &str,
    headers: Option<&HeaderMap>,
    globals: &PageGlobals,
) -> Vec<Technology> {
    let document = Html::parse_document(html);
    let attr_list = |selector: &Selector, attr: &str| -> String {
        document
            .select(selector)
            .filter_map(|el| el.value().attr(attr))
            .collect::<Vec<_>>()
            .join(" ")
    };
    let scripts = attr_list(&SCRIPT_SRC, "src");
    let stylesheets = attr_list(&STYLESHEET, "href");
    let all_text = format!("{html}{scripts}{stylesheets}");

    let mut found = Vec::new();

    for rule in RULES.iter() {
        let mut confidence = 0.0;
        let mut evidence = Vec::new();

        if rule.patterns.iter().any(|p| p.is_match(&all_text)) {
            confidence += PATTERN_WEIGHT * rule.confidence;
            evidence.push("Script/CSS pattern detected");
        }
        if rule.global_vars.iter().any(|g| g.is_match(html))
            || globals.defines_global_for(rule.name)
        {
            confidence += GLOBAL_VAR_WEIGHT * rule.confidence;
            evidence.push("Global variable detected");
        }
        if rule.indicators.iter().any(|i| i.is_match(html)) {
            confidence += INDICATOR_WEIGHT * rule.confidence;
            evidence.push("HTML indicator detected");
        }

        if confidence > DETECTION_THRESHOLD {
            found.push(Technology {
                name: rule.name.to_string(),
                category: rule.category.to_string(),
                confidence: round_confidence(confidence),
                evidence: evidence.join("; "),
            });
        }
    }

    if let Some(generator) = document
        .select(&GENERATOR)
        .find_map(|el| el.value().attr("content"))
        .map(str::trim)
        .filter(|g| !g.is_empty())
    {
        found.push(Technology {
            name: format!("Generator: {generator}"),
            category: "Generator".to_string(),
            confidence: 0.8,
            evidence: "meta generator tag".to_string(),
        });
    }

    if let Some(headers) = headers {
        if let Some(server) = header_value(headers, "server") {
            found.push(Technology {
                name: format!("Server: {server}"),
                category: "Web Server".to_string(),
                confidence: 0.7,
                evidence: format!("HTTP header: Server: {server}"),
            });
        }
        if let Some(powered_by) = header_value(headers, "x-powered-by") {
            found.push(Technology {
                name: format!("X-Powered-By: {powered_by}"),
                category: "Platform".to_string(),
                confidence: 0.6,
                evidence: "HTTP X-Powered-By header".to_string(),
            });
        }
    }

    let images = document.select(&IMG).count();
    if images > HEAVY_IMAGE_COUNT {
        found.push(Technology {
            name: "Heavy image usage".to_string(),
            category: "Performance".to_string(),
            confidence: 0.4,
            evidence: format!("{images} <img> tags detected"),
        });
    }

    if globals.chart {
        found.push(Technology {
            name: "Chart.js".to_string(),
            category: "JS Library".to_string(),
            confidence: 0.9,
            evidence: "window.Chart global variable".to_string(),
        });
    }

    found.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    found
}

/// Fingerprints the shared page.
#[derive(Debug, Default)]
pub struct TechCapability;

impl TechCapability {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ScanCapability for TechCapability {
    fn capability(&self) -> Capability {
        Capability::Tech
    }

    fn inputs(&self) -> &'static [Input] {
        &[Input::Html, Input::Headers, Input::Page]
    }

    async fn run(&self, ctx: &ScanContext<'_>) -> Result<Value, CapabilityError> {
        let html = ctx.html()?;

        let globals = match ctx.loaded_page() {
            Some(page) => match page.evaluate(GLOBALS_SCRIPT).await {
                Ok(value) => serde_json::from_value(value).unwrap_or_default(),
                Err(e) => {
                    warn!(error = %e, "Could not probe page globals");
                    PageGlobals::default()
                }
            },
            None => PageGlobals::default(),
        };

        let technologies = detect_technologies(html, ctx.headers(), &globals);
        debug!(count = technologies.len(), "Technology detection finished");
        Ok(json!({ "technologies": technologies }))
    }
}
