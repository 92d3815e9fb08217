//! Plain HTTP access for capabilities that do not need a browser.

use crate::capability::ScanSettings;
use crate::host_validator::classify_ip;
use reqwest::header::HeaderMap;
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;
use url::{Host, Url};

const MAX_REDIRECTS: usize = 5;

/// Build the shared client.
///
/// Redirects are followed up to five hops and never to a literal non-public
/// address.
pub fn build_client(settings: &ScanSettings) -> reqwest::Result<Client> {
    let policy = Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        if redirects_to_blocked_literal(attempt.url()) {
            return attempt.stop();
        }
        attempt.follow()
    });

    Client::builder()
        .user_agent(settings.user_agent.clone())
        .timeout(settings.http_timeout)
        .redirect(policy)
        .build()
}

fn redirects_to_blocked_literal(url: &Url) -> bool {
    let ip = match url.host() {
        Some(Host::Ipv4(ip)) => IpAddr::V4(ip),
        Some(Host::Ipv6(ip)) => IpAddr::V6(ip),
        _ => return false,
    };
    classify_ip(ip).is_blocked()
}

/// Status line and headers of a GET request; the body is discarded.
#[derive(Debug, Clone)]
pub struct HeadResponse {
    pub status: StatusCode,
    pub final_url: Url,
    pub headers: HeaderMap,
}

pub async fn fetch_headers(client: &Client, url: &Url) -> reqwest::Result<HeadResponse> {
    let response = client.get(url.clone()).send().await?;
    Ok(HeadResponse {
        status: response.status(),
        final_url: response.url().clone(),
        headers: response.headers().clone(),
    })
}

/// Body of a successful GET, bounded by `timeout`.
pub async fn fetch_text(client: &Client, url: &Url, timeout: Duration) -> reqwest::Result<String> {
    client
        .get(url.clone())
        .timeout(timeout)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await
}

/// `robots.txt` for the origin of `base`. Any failure means "not found".
pub async fn fetch_robots(client: &Client, base: &Url, timeout: Duration) -> Option<String> {
    let mut robots = base.clone();
    robots.set_path("/robots.txt");
    robots.set_query(None);
    robots.set_fragment(None);

    match fetch_text(client, &robots, timeout).await {
        Ok(body) => Some(body),
        Err(e) => {
            debug!(url = %robots, error = %e, "robots.txt unavailable");
            None
        }
    }
}
