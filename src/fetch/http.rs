//! Guarded outbound HTTP.
//!
//! Every fetch the crate makes goes through one client: 20 second total
//! timeout, at most 10 redirects, a stable user agent, and SSRF checks
//! on the target and on every redirect hop. The "be safe" switch is
//! process-wide and on by default; tests against local servers turn it
//! off.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{LazyLock, Mutex, RwLock};
use std::time::Duration;

use reqwest::{redirect, Client, Response};
use url::{Host, Url};

use crate::error::{RecastError, Result};

/// Total request timeout in seconds.
const TOTAL_TIMEOUT_SECS: u64 = 20;

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 10;

/// User agent string for all outbound requests.
const USER_AGENT: &str = "recast-fetcher/0.1";

/// Give up backing off once the delay passes this many seconds.
const MAX_BACKOFF_SECS: u64 = 130;

static BE_SAFE: AtomicBool = AtomicBool::new(true);

/// Toggle the loopback/private-address guard. On by default.
pub fn set_be_safe(on: bool) {
    BE_SAFE.store(on, Ordering::Relaxed);
}

pub fn be_safe() -> bool {
    BE_SAFE.load(Ordering::Relaxed)
}

static CLIENT: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(TOTAL_TIMEOUT_SECS))
        .redirect(redirect::Policy::custom(|attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                return attempt.error("too many redirects");
            }
            if be_safe() {
                if let Err(e) = check_target(attempt.url()) {
                    return attempt.error(e.to_string());
                }
            }
            attempt.follow()
        }))
        .user_agent(USER_AGENT)
        .build()
        .expect("failed to build HTTP client")
});

/// Process-wide url -> canonical-url cache, so canonicalizing a feed is
/// one fetch per process, not one per store operation.
static CANON_CACHE: LazyLock<RwLock<HashMap<String, String>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Process-wide per-URL starting delays for hosts that throttle hard.
static PRESET_DELAYS: LazyLock<Mutex<HashMap<String, u64>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Synchronous check of scheme, hostname, and literal-IP targets.
fn check_target(url: &Url) -> Result<()> {
    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(RecastError::Transport(format!(
                "unsupported URL scheme: {scheme}"
            )))
        }
    }
    match url.host() {
        None => Err(RecastError::Transport("URL has no host".into())),
        Some(Host::Domain(domain)) => {
            if is_forbidden_hostname(domain) {
                Err(RecastError::Transport(format!("banned host: {domain}")))
            } else {
                Ok(())
            }
        }
        Some(Host::Ipv4(ip)) => {
            if is_private_ip(&IpAddr::V4(ip)) {
                Err(RecastError::Transport(format!("banned address: {ip}")))
            } else {
                Ok(())
            }
        }
        Some(Host::Ipv6(ip)) => {
            if is_private_ip(&IpAddr::V6(ip)) {
                Err(RecastError::Transport(format!("banned address: {ip}")))
            } else {
                Ok(())
            }
        }
    }
}

/// Resolve a domain target and refuse it if any address comes back
/// loopback or private.
async fn check_resolved(url: &Url) -> Result<()> {
    if let Some(Host::Domain(domain)) = url.host() {
        let port = url.port_or_known_default().unwrap_or(80);
        let addrs = tokio::net::lookup_host((domain, port))
            .await
            .map_err(|e| RecastError::Transport(format!("lookup of {domain} failed: {e}")))?;
        for addr in addrs {
            if is_private_ip(&addr.ip()) {
                return Err(RecastError::Transport(format!(
                    "{domain} resolves to banned address {}",
                    addr.ip()
                )));
            }
        }
    }
    Ok(())
}

fn is_forbidden_hostname(host: &str) -> bool {
    let host = host.to_lowercase();
    if host == "localhost" {
        return true;
    }
    [".local", ".localhost", ".internal", ".intranet", ".corp", ".home", ".lan"]
        .iter()
        .any(|suffix| host.ends_with(suffix))
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, _, _] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || (a == 192 && b == 0)
                || (a == 198 && b == 51)
                || (a == 203 && b == 0)
        }
        IpAddr::V6(v6) => {
            let seg0 = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (seg0 & 0xfe00) == 0xfc00 // unique local fc00::/7
                || (seg0 & 0xffc0) == 0xfe80 // link local fe80::/10
        }
    }
}

/// GET a URL through the guarded client.
pub async fn get(url: &str) -> Result<Response> {
    let parsed =
        Url::parse(url).map_err(|e| RecastError::Transport(format!("invalid URL {url}: {e}")))?;
    if be_safe() {
        check_target(&parsed)?;
        check_resolved(&parsed).await?;
    }
    Ok(CLIENT.get(url).send().await?)
}

/// GET at most `max_bytes` of a body. The boolean reports truncation.
pub async fn limited_body(url: &str, max_bytes: usize) -> Result<(Vec<u8>, bool)> {
    let mut resp = get(url).await?;
    let mut data = Vec::new();
    while let Some(chunk) = resp.chunk().await? {
        if data.len() + chunk.len() >= max_bytes {
            data.extend_from_slice(&chunk[..max_bytes - data.len()]);
            return Ok((data, true));
        }
        data.extend_from_slice(&chunk);
    }
    Ok((data, false))
}

/// Canonicalize a URL by following its redirects once; the answer is
/// cached for the life of the process.
pub async fn canonical_url(url: &str) -> Result<String> {
    if let Some(hit) = CANON_CACHE.read().expect("canon cache lock").get(url) {
        return Ok(hit.clone());
    }
    let resp = get(url).await?;
    if resp.status().as_u16() >= 400 {
        return Err(RecastError::Transport(format!(
            "HTTP {} canonicalizing {url}",
            resp.status()
        )));
    }
    let canonical = resp.url().to_string();
    CANON_CACHE
        .write()
        .expect("canon cache lock")
        .insert(url.to_string(), canonical.clone());
    Ok(canonical)
}

/// Record a canonical mapping observed out-of-band (e.g. the final URL
/// of a fetch that followed redirects).
pub fn record_canonical(url: &str, canonical: &str) {
    CANON_CACHE
        .write()
        .expect("canon cache lock")
        .insert(url.to_string(), canonical.to_string());
}

/// GET with HTTP validators attached: `If-None-Match` when an etag is
/// known, else `If-Modified-Since` when a modification date is.
pub async fn get_with_validators(
    url: &str,
    etag: Option<&str>,
    last_modified: Option<&str>,
) -> Result<Response> {
    let parsed =
        Url::parse(url).map_err(|e| RecastError::Transport(format!("invalid URL {url}: {e}")))?;
    if be_safe() {
        check_target(&parsed)?;
        check_resolved(&parsed).await?;
    }
    let mut req = CLIENT.get(url);
    if let Some(etag) = etag.filter(|e| !e.is_empty()) {
        req = req.header("If-None-Match", etag);
    } else if let Some(modified) = last_modified.filter(|m| !m.is_empty()) {
        req = req.header("If-Modified-Since", modified);
    }
    Ok(req.send().await?)
}

/// Cache-only canonical lookup. A URL the fetch layer has never touched
/// passes through unchanged.
pub fn cached_canonical(url: &str) -> String {
    CANON_CACHE
        .read()
        .expect("canon cache lock")
        .get(url)
        .cloned()
        .unwrap_or_else(|| url.to_string())
}

/// The preset starting delay for a URL, if one has been recorded.
pub fn preset_delay(url: &str) -> Option<u64> {
    PRESET_DELAYS
        .lock()
        .expect("preset delay lock")
        .get(url)
        .copied()
}

pub fn set_preset_delay(url: &str, secs: u64) {
    PRESET_DELAYS
        .lock()
        .expect("preset delay lock")
        .insert(url.to_string(), secs);
}

/// Fetch a body with no starting delay.
pub async fn bytes_from_url(url: &str) -> Result<Vec<u8>> {
    let (bytes, _) = bytes_from_url_with_delay(url, 0).await?;
    Ok(bytes)
}

/// Fetch a body, sleeping `delay` seconds first and backing off on
/// HTTP 429: the delay starts at one second and doubles, and we give up
/// once it passes 130 seconds. Returns the delay that worked so callers
/// walking many pages can carry it forward.
pub async fn bytes_from_url_with_delay(url: &str, delay: u64) -> Result<(Vec<u8>, u64)> {
    let url = rewrite_wayback(url);
    let mut delay = delay;
    loop {
        if delay > 0 {
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }
        let resp = get(&url).await?;
        let status = resp.status();
        if status.is_success() {
            return Ok((resp.bytes().await?.to_vec(), delay));
        }
        if status.as_u16() == 429 && delay < MAX_BACKOFF_SECS {
            delay = if delay == 0 { 1 } else { delay * 2 };
            continue;
        }
        return Err(RecastError::Transport(format!("HTTP {status} fetching {url}")));
    }
}

/// Archived pages come back wrapped in the Wayback replay chrome unless
/// the timestamp carries the `if_` flag. Splice it in.
fn rewrite_wayback(url: &str) -> String {
    if url.starts_with("https://web.archive.org") {
        if let Some(pos) = url.find("/http") {
            return format!("{}if_{}", &url[..pos], &url[pos..]);
        }
    }
    url.to_string()
}
