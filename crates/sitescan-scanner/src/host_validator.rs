//! Request forgery guard for user-supplied URLs.
//!
//! A URL is allowed only if its scheme is http(s), it is not absurdly long, and
//! every address its host maps to is publicly routable. Resolution failures
//! reject the URL: an unknown answer is treated as a bad answer.

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use url::{Host, Url};

/// Where an address sits in the address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressClass {
    Public,
    Loopback,
    Private,
    LinkLocal,
    Unspecified,
    Multicast,
    Reserved,
    UniqueLocal,
}

impl AddressClass {
    /// Everything except `Public` is off limits.
    #[must_use]
    pub fn is_blocked(self) -> bool {
        self != Self::Public
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Loopback => "loopback",
            Self::Private => "private",
            Self::LinkLocal => "link-local",
            Self::Unspecified => "unspecified",
            Self::Multicast => "multicast",
            Self::Reserved => "reserved",
            Self::UniqueLocal => "unique-local",
        }
    }
}

impl fmt::Display for AddressClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a single address.
#[must_use]
pub fn classify_ip(ip: IpAddr) -> AddressClass {
    match ip {
        IpAddr::V4(v4) => classify_v4(v4),
        IpAddr::V6(v6) => classify_v6(v6),
    }
}

fn classify_v4(ip: Ipv4Addr) -> AddressClass {
    let [a, b, _, _] = ip.octets();
    match (a, b) {
        (0, _) => AddressClass::Unspecified,
        (127, _) => AddressClass::Loopback,
        (10, _) | (192, 168) => AddressClass::Private,
        (172, b) if (16..=31).contains(&b) => AddressClass::Private,
        // Carrier-grade NAT shared space
        (100, b) if (64..=127).contains(&b) => AddressClass::Private,
        (169, 254) => AddressClass::LinkLocal,
        (224..=239, _) => AddressClass::Multicast,
        (240..=255, _) => AddressClass::Reserved,
        _ => AddressClass::Public,
    }
}

fn classify_v6(ip: Ipv6Addr) -> AddressClass {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return classify_v4(v4);
    }
    if ip.is_loopback() {
        return AddressClass::Loopback;
    }
    if ip.is_unspecified() {
        return AddressClass::Unspecified;
    }

    let first = ip.segments()[0];
    if first & 0xfe00 == 0xfc00 {
        AddressClass::UniqueLocal
    } else if first & 0xffc0 == 0xfe80 {
        AddressClass::LinkLocal
    } else if first & 0xff00 == 0xff00 {
        AddressClass::Multicast
    } else {
        AddressClass::Public
    }
}

/// Why a URL was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    InvalidUrl(String),
    UnsupportedScheme(String),
    TooLong { len: usize, max: usize },
    MissingHost,
    BlockedAddress { ip: IpAddr, class: AddressClass },
    ResolutionFailed(String),
    NoAddresses,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl(e) => write!(f, "invalid URL: {e}"),
            Self::UnsupportedScheme(s) => write!(f, "unsupported scheme '{s}'"),
            Self::TooLong { len, max } => {
                write!(f, "URL is {len} characters long, limit is {max}")
            }
            Self::MissingHost => f.write_str("URL has no host"),
            Self::BlockedAddress { ip, class } => {
                write!(f, "host resolves to {class} address {ip}")
            }
            Self::ResolutionFailed(e) => write!(f, "host could not be resolved: {e}"),
            Self::NoAddresses => f.write_str("host resolved to no addresses"),
        }
    }
}

/// Outcome of [`HostValidator::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub allowed: bool,
    pub reason: Option<RejectReason>,
}

impl Verdict {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn reject(reason: RejectReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ResolveError(pub String);

/// Name to address lookup.
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError>;
}

/// DNS lookup through the system resolver configuration.
pub struct SystemResolver {
    resolver: TokioAsyncResolver,
}

impl SystemResolver {
    pub fn new() -> Self {
        let mut opts = ResolverOpts::default();
        opts.attempts = 1;
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), opts),
        }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError> {
        let lookup = self
            .resolver
            .lookup_ip(host)
            .await
            .map_err(|e| ResolveError(e.to_string()))?;
        Ok(lookup.iter().collect())
    }
}

/// Fixed name table. Unknown names fail to resolve.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    entries: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_host(mut self, host: &str, addrs: &[IpAddr]) -> Self {
        self.entries
            .insert(host.to_ascii_lowercase(), addrs.to_vec());
        self
    }
}

#[async_trait]
impl HostResolver for StaticResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError> {
        self.entries
            .get(&host.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| ResolveError(format!("NXDOMAIN for {host}")))
    }
}

/// Decides whether a URL may be fetched by the workers.
#[derive(Clone)]
pub struct HostValidator {
    resolver: Arc<dyn HostResolver>,
    max_url_length: usize,
}

impl HostValidator {
    pub fn new(resolver: Arc<dyn HostResolver>, max_url_length: usize) -> Self {
        Self {
            resolver,
            max_url_length,
        }
    }

    /// Validator backed by the system DNS configuration.
    pub fn system(max_url_length: usize) -> Self {
        Self::new(Arc::new(SystemResolver::new()), max_url_length)
    }

    /// Check `raw` and every address its host maps to.
    pub async fn validate(&self, raw: &str) -> Verdict {
        let verdict = self.check(raw.trim()).await;
        match &verdict.reason {
            Some(reason) => warn!(url = %raw, %reason, "Rejected target URL"),
            None => debug!(url = %raw, "Target URL allowed"),
        }
        verdict
    }

    async fn check(&self, raw: &str) -> Verdict {
        let len = raw.chars().count();
        if len > self.max_url_length {
            return Verdict::reject(RejectReason::TooLong {
                len,
                max: self.max_url_length,
            });
        }

        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(e) => return Verdict::reject(RejectReason::InvalidUrl(e.to_string())),
        };

        if !matches!(url.scheme(), "http" | "https") {
            return Verdict::reject(RejectReason::UnsupportedScheme(url.scheme().to_string()));
        }

        let addrs = match url.host() {
            None => return Verdict::reject(RejectReason::MissingHost),
            Some(Host::Ipv4(ip)) => vec![IpAddr::V4(ip)],
            Some(Host::Ipv6(ip)) => vec![IpAddr::V6(ip)],
            Some(Host::Domain(name)) => {
                let name = name.trim_end_matches('.');
                if name.is_empty() {
                    return Verdict::reject(RejectReason::MissingHost);
                }
                if name.eq_ignore_ascii_case("localhost")
                    || name.to_ascii_lowercase().ends_with(".localhost")
                {
                    return Verdict::reject(RejectReason::BlockedAddress {
                        ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
                        class: AddressClass::Loopback,
                    });
                }
                match self.resolver.resolve(name).await {
                    Ok(addrs) => addrs,
                    Err(e) => return Verdict::reject(RejectReason::ResolutionFailed(e.0)),
                }
            }
        };

        if addrs.is_empty() {
            return Verdict::reject(RejectReason::NoAddresses);
        }

        for ip in addrs {
            let class = classify_ip(ip);
            if class.is_blocked() {
                return Verdict::reject(RejectReason::BlockedAddress { ip, class });
            }
        }

        Verdict::allow()
    }
}
