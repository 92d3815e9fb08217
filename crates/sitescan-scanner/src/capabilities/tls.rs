//! Certificate inspection for https targets.

use chrono::{DateTime, Utc};
use native_tls::TlsConnector;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tokio::task::spawn_blocking;
use tracing::debug;
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;

const EXPIRY_WARNING_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateDetails {
    pub subject: String,
    pub issuer: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub days_until_expiry: i64,
    pub is_expired: bool,
    pub expiry_warning: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostnameCheck {
    pub requested: String,
    pub common_name: String,
    pub subject_alt_names: Vec<String>,
    pub is_valid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyInfo {
    pub size: usize,
    pub algorithm: String,
    pub strength: KeyStrength,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStrength {
    Excellent,
    Good,
    Weak,
    Critical,
}

impl KeyStrength {
    fn rate(algorithm: &str, bits: usize) -> Self {
        let bits = if algorithm == "EC" {
            // An EC key of n bits is on par with an RSA key of roughly 12n bits.
            bits * 12
        } else {
            bits
        };
        match bits {
            b if b >= 4096 => Self::Excellent,
            b if b >= 2048 => Self::Good,
            b if b >= 1024 => Self::Weak,
            _ => Self::Critical,
        }
    }

    fn acceptable(self) -> bool {
        matches!(self, Self::Excellent | Self::Good)
    }
}

/// What the TLS handshake revealed about the served certificate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateReport {
    pub is_valid: bool,
    pub certificate: CertificateDetails,
    pub hostname: HostnameCheck,
    pub key_info: KeyInfo,
    pub score: u8,
    pub recommendations: Vec<String>,
}

/// Match a certificate name (possibly `*.example.com`) against a host.
pub fn wildcard_match(pattern: &str, hostname: &str) -> bool {
    if pattern.is_empty() || hostname.is_empty() {
        return false;
    }
    let source = format!(
        "(?i)^{}$",
        regex::escape(pattern).replace(r"\*", "[^.]+")
    );
    Regex::new(&source).is_ok_and(|re| re.is_match(hostname))
}

static SELF_SIGNED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)self").expect("valid regex"));

/// Score a certificate on a 0-100 scale.
pub fn score_certificate(
    details: &CertificateDetails,
    hostname_valid: bool,
    strength: KeyStrength,
) -> (u8, Vec<String>) {
    let mut score: i32 = 100;
    let mut recommendations = Vec::new();

    if details.is_expired {
        score -= 50;
        recommendations.push("Renew the expired certificate immediately".to_string());
    } else if details.days_until_expiry < 7 {
        score -= 30;
        recommendations.push(format!(
            "Certificate expires in {} days, renew it now",
            details.days_until_expiry
        ));
    } else if details.days_until_expiry < EXPIRY_WARNING_DAYS {
        score -= 15;
        recommendations.push(format!(
            "Certificate expires in {} days, schedule a renewal",
            details.days_until_expiry
        ));
    }

    if !hostname_valid {
        score -= 25;
        recommendations.push("Certificate does not cover the requested hostname".to_string());
    }
    if !strength.acceptable() {
        score -= 20;
        recommendations.push("Use a stronger key (RSA 2048+ or ECDSA P-256+)".to_string());
    }
    if SELF_SIGNED.is_match(&details.issuer) || details.issuer == details.subject {
        score -= 20;
        recommendations
            .push("Replace the self-signed certificate with a CA-issued one".to_string());
    }

    (u8::try_from(score.clamp(0, 100)).unwrap_or(0), recommendations)
}

fn to_utc(time: &ASN1Time) -> DateTime<Utc> {
    DateTime::from_timestamp(time.timestamp(), 0).unwrap_or_default()
}

fn inspect_blocking(host: &str, port: u16, timeout: Duration) -> Result<CertificateReport, String> {
    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .map_err(|e| format!("TLS connector error: {e}"))?;

    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| format!("address lookup failed: {e}"))?
        .next()
        .ok_or_else(|| format!("no address for {host}"))?;
    let stream = TcpStream::connect_timeout(&addr, timeout)
        .map_err(|e| format!("TCP connection failed: {e}"))?;
    stream
        .set_read_timeout(Some(timeout))
        .and_then(|()| stream.set_write_timeout(Some(timeout)))
        .map_err(|e| format!("socket setup failed: {e}"))?;

    debug!(host, port, "Performing TLS handshake");
    let tls = connector
        .connect(host, stream)
        .map_err(|e| format!("TLS handshake failed: {e}"))?;
    let cert = tls
        .peer_certificate()
        .map_err(|e| format!("could not read peer certificate: {e}"))?
        .ok_or_else(|| "server presented no certificate".to_string())?;
    let der = cert
        .to_der()
        .map_err(|e| format!("could not encode certificate: {e}"))?;
    let (_, x509) =
        parse_x509_certificate(&der).map_err(|e| format!("X.509 parse error: {e}"))?;

    let common_name = x509
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string();
    let issuer = x509
        .issuer()
        .iter_organization()
        .next()
        .or_else(|| x509.issuer().iter_common_name().next())
        .and_then(|attr| attr.as_str().ok())
        .unwrap_or("Unknown")
        .to_string();

    let subject_alt_names: Vec<String> = match x509.subject_alternative_name() {
        Ok(Some(ext)) => ext
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some((*dns).to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    let hostname_valid = subject_alt_names.iter().any(|san| wildcard_match(san, host))
        || wildcard_match(&common_name, host);

    let (algorithm, size) = match x509.public_key().parsed() {
        Ok(PublicKey::RSA(rsa)) => ("RSA", rsa.key_size()),
        Ok(PublicKey::EC(ec)) => ("EC", ec.key_size()),
        Ok(_) => ("other", 0),
        Err(_) => ("unknown", 0),
    };
    let strength = KeyStrength::rate(algorithm, size);

    let now = Utc::now();
    let validity = x509.validity();
    let valid_from = to_utc(&validity.not_before);
    let valid_until = to_utc(&validity.not_after);
    let days_until_expiry = valid_until.signed_duration_since(now).num_days();
    let is_expired = now > valid_until;

    let certificate = CertificateDetails {
        subject: if common_name.is_empty() {
            "Unknown".to_string()
        } else {
            common_name.clone()
        },
        issuer,
        valid_from,
        valid_until,
        days_until_expiry,
        is_expired,
        expiry_warning: days_until_expiry < EXPIRY_WARNING_DAYS,
    };
    let (score, recommendations) = score_certificate(&certificate, hostname_valid, strength);

    Ok(CertificateReport {
        is_valid: !is_expired && now >= valid_from && hostname_valid,
        certificate,
        hostname: HostnameCheck {
            requested: host.to_string(),
            common_name,
            subject_alt_names,
            is_valid: hostname_valid,
        },
        key_info: KeyInfo {
            size,
            algorithm: algorithm.to_string(),
            strength,
        },
        score,
        recommendations,
    })
}

/// Connect to `host:port`, complete a handshake and inspect the certificate.
pub async fn inspect_certificate(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<CertificateReport, String> {
    let host = host.to_string();
    spawn_blocking(move || inspect_blocking(&host, port, timeout))
        .await
        .map_err(|e| format!("certificate inspection task failed: {e}"))?
}
