//! Response header hygiene and TLS certificate audit.

use super::tls::{inspect_certificate, CertificateReport};
use crate::capability::{Input, ScanCapability, ScanContext};
use crate::error::CapabilityError;
use crate::http::fetch_headers;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Serialize;
use serde_json::{json, Value};
use sitescan_core::Capability;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Security headers every response should carry.
pub const SECURITY_HEADERS: [&str; 8] = [
    "Content-Security-Policy",
    "Strict-Transport-Security",
    "X-Frame-Options",
    "X-Content-Type-Options",
    "X-XSS-Protection",
    "Referrer-Policy",
    "Permissions-Policy",
    "X-Permitted-Cross-Domain-Policies",
];

/// Headers that reveal server software.
pub const LEAKAGE_HEADERS: [&str; 3] = ["Server", "X-Powered-By", "X-AspNet-Version"];

const HTTPS_PENALTY: usize = 30;
const MISSING_HEADER_PENALTY: usize = 6;
const LEAK_PENALTY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Exposure {
    Exposed,
    Hidden,
}

/// Result of checking a set of response headers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderAudit {
    pub headers: BTreeMap<String, String>,
    pub missing_headers: Vec<String>,
    pub leakage_headers: BTreeMap<String, Exposure>,
    pub cors_status: String,
    #[serde(rename = "isHTTPS")]
    pub is_https: bool,
    pub security_score: u8,
    pub recommendations: Vec<String>,
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get(name)
        .map(|v| v.to_str().unwrap_or("[invalid UTF-8]"))
        .filter(|v| !v.is_empty())
}

/// Grade a response's headers.
pub fn audit_headers(headers: &HeaderMap, is_https: bool) -> HeaderAudit {
    let mut present = BTreeMap::new();
    let mut missing = Vec::new();
    for name in SECURITY_HEADERS {
        match header_str(headers, name) {
            Some(value) => {
                present.insert(name.to_string(), value.to_string());
            }
            None => {
                present.insert(name.to_string(), "Missing".to_string());
                missing.push(name.to_string());
            }
        }
    }

    let leakage: BTreeMap<String, Exposure> = LEAKAGE_HEADERS
        .iter()
        .map(|name| {
            let exposure = if header_str(headers, name).is_some() {
                Exposure::Exposed
            } else {
                Exposure::Hidden
            };
            ((*name).to_string(), exposure)
        })
        .collect();
    let leaks = leakage.values().filter(|e| **e == Exposure::Exposed).count();

    let cors_status = match header_str(headers, "access-control-allow-origin") {
        Some("*") => "Potentially Misconfigured (*)".to_string(),
        Some(origin) => format!("Configured: {origin}"),
        None => "Not Set".to_string(),
    };

    let https_penalty = if is_https { 0 } else { HTTPS_PENALTY };
    let penalty = https_penalty + MISSING_HEADER_PENALTY * missing.len() + LEAK_PENALTY * leaks;
    let security_score = u8::try_from(100usize.saturating_sub(penalty)).unwrap_or(0);

    let mut recommendations = Vec::new();
    if !is_https {
        recommendations
            .push("CRITICAL: Enable HTTPS/TLS encryption (HTTP is insecure)".to_string());
    }
    let is_missing = |name: &str| missing.iter().any(|m| m == name);
    if is_missing("Strict-Transport-Security") {
        recommendations
            .push("Add an HSTS header to force HTTPS and prevent downgrade attacks".to_string());
    }
    if is_missing("Content-Security-Policy") {
        recommendations.push("Implement a Content-Security-Policy to mitigate XSS".to_string());
    }
    if is_missing("X-Frame-Options") {
        recommendations.push("Set X-Frame-Options to prevent clickjacking".to_string());
    }
    if leakage.get("Server") == Some(&Exposure::Exposed) {
        recommendations.push("Hide the Server header to prevent version enumeration".to_string());
    }
    if leakage.get("X-Powered-By") == Some(&Exposure::Exposed) {
        recommendations
            .push("Remove the X-Powered-By header to reduce information disclosure".to_string());
    }
    if cors_status.contains('*') {
        recommendations.push("Avoid the wildcard (*) in Access-Control-Allow-Origin".to_string());
    }
    if recommendations.is_empty() {
        recommendations.push("Good security practices detected. Continue monitoring.".to_string());
    }

    HeaderAudit {
        headers: present,
        missing_headers: missing,
        leakage_headers: leakage,
        cors_status,
        is_https,
        security_score,
        recommendations,
    }
}

fn ssl_section(result: Option<Result<CertificateReport, String>>) -> Value {
    match result {
        None => json!({
            "status": "not-https",
            "message": "Website does not use HTTPS",
            "isValid": false,
            "score": 0,
        }),
        Some(Ok(report)) => {
            let mut value = serde_json::to_value(&report).unwrap_or_default();
            value["status"] = json!("success");
            value
        }
        Some(Err(message)) => json!({
            "status": "error",
            "message": message,
            "isValid": false,
            "score": 0,
        }),
    }
}

/// Header and certificate audit. Needs no browser.
#[derive(Debug, Default)]
pub struct SecurityCapability;

impl SecurityCapability {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ScanCapability for SecurityCapability {
    fn capability(&self) -> Capability {
        Capability::Security
    }

    fn inputs(&self) -> &'static [Input] {
        &[]
    }

    async fn run(&self, ctx: &ScanContext<'_>) -> Result<Value, CapabilityError> {
        let target = ctx.base_url;
        let is_https = target.scheme() == "https";

        let response = fetch_headers(ctx.http, target).await?;
        let audit = audit_headers(&response.headers, is_https);
        debug!(
            score = audit.security_score,
            missing = audit.missing_headers.len(),
            "Header audit finished"
        );

        let certificate = match (is_https, target.host_str()) {
            (true, Some(host)) => {
                let host = host.trim_start_matches('[').trim_end_matches(']');
                let port = target.port_or_known_default().unwrap_or(443);
                let result = inspect_certificate(host, port, ctx.settings.http_timeout).await;
                if let Err(e) = &result {
                    warn!(host, error = %e, "Certificate inspection failed");
                }
                Some(result)
            }
            _ => None,
        };

        let mut value =
            serde_json::to_value(&audit).map_err(|e| CapabilityError::Failed(e.to_string()))?;
        value["status"] = json!("success");
        value["finalUrl"] = json!(response.final_url.as_str());
        value["ssl"] = ssl_section(certificate);
        Ok(value)
    }
}
