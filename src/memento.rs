//! RFC 7089 mementos and timemaps.
//!
//! A timemap is served in the RFC 5988 link syntax: comma-separated
//! `<url>; key="value"; ...` entries, possibly wrapped across lines.
//! Archives link timemaps to further timemaps, so rebuilding the full
//! snapshot list means spidering them.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::datetime::{format_rfc1123, parse_memento_datetime};
use crate::error::{RecastError, Result};
use crate::fetch::http;

static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<([^>]*)>(.*)").expect("link regex compiles"));
static KEYVAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\w+)="([^"]*)""#).expect("keyval regex compiles"));

/// One link entry: a URL plus its `rel`/`datetime`/... parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Memento {
    pub url: String,
    pub params: HashMap<String, String>,
}

impl Memento {
    pub fn rel(&self) -> &str {
        self.params.get("rel").map(String::as_str).unwrap_or("")
    }

    /// The parsed `datetime` parameter, if present and valid.
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        self.params
            .get("datetime")
            .and_then(|s| parse_memento_datetime(s).ok())
    }

    fn is_memento(&self) -> bool {
        self.rel().ends_with("memento")
    }

    fn is_timemap(&self) -> bool {
        self.rel() == "timemap"
    }
}

/// An unordered pile of link entries.
#[derive(Debug, Clone, Default)]
pub struct TimeMap {
    pub links: Vec<Memento>,
}

impl TimeMap {
    /// Parse the link-format body of a timemap.
    ///
    /// Entries are accumulated line by line and flushed whenever the
    /// buffer ends with the comma that delimits entries, so an entry may
    /// span lines.
    pub fn parse(text: &str) -> Result<TimeMap> {
        let mut links = Vec::new();
        let mut agg = String::new();
        for line in text.lines() {
            agg.push_str(line);
            if agg.trim_end().ends_with(',') {
                links.push(parse_link(&agg)?);
                agg.clear();
            }
        }
        if !agg.trim().is_empty() {
            links.push(parse_link(&agg)?);
        }
        Ok(TimeMap { links })
    }

    /// The entries whose rel ends in "memento" ("memento", "first
    /// memento", "last memento", ...).
    pub fn mementos(&self) -> Vec<Memento> {
        self.links.iter().filter(|l| l.is_memento()).cloned().collect()
    }

    /// The entries pointing at further timemaps.
    pub fn timemaps(&self) -> Vec<Memento> {
        self.links.iter().filter(|l| l.is_timemap()).cloned().collect()
    }
}

/// Parse one `<url>; key="value"; ...` entry. Tolerates newlines inside
/// the entry and any amount of whitespace between parameters. A
/// `datetime` parameter is canonicalized to RFC 1123; an unparseable one
/// rejects the entry.
pub fn parse_link(s: &str) -> Result<Memento> {
    let caps = LINK_RE
        .captures(s)
        .ok_or_else(|| RecastError::Format(format!("unparseable link entry: {s}")))?;
    let url = caps.get(1).map(|m| m.as_str()).unwrap_or("");
    if url.is_empty() {
        return Err(RecastError::Format("link entry with empty url".into()));
    }
    let mut params = HashMap::new();
    for segment in caps.get(2).map(|m| m.as_str()).unwrap_or("").split(';') {
        if let Some(kv) = KEYVAL_RE.captures(segment) {
            params.insert(kv[1].to_string(), kv[2].to_string());
        }
    }
    if let Some(datetime) = params.get("datetime") {
        let canonical = format_rfc1123(parse_memento_datetime(datetime)?);
        params.insert("datetime".to_string(), canonical);
    }
    Ok(Memento {
        url: url.to_string(),
        params,
    })
}

/// Fetch and parse one timemap document.
pub async fn fetch_timemap(url: &str) -> Result<TimeMap> {
    let resp = http::get(url).await?;
    if !resp.status().is_success() {
        return Err(RecastError::Transport(format!(
            "timemap fetch returned {}",
            resp.status()
        )));
    }
    let text = resp.text().await?;
    TimeMap::parse(&text)
}

/// Follow every linked timemap, merging what they know.
///
/// The result carries all mementos found anywhere, de-duplicated by URL
/// and sorted newest first, with no timemap entries left in it. Visited
/// URLs are tracked so linked timemaps can't send us in circles.
pub async fn spider_timemap(url: &str) -> Result<TimeMap> {
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(url.to_string());
    let mut queue = vec![url.to_string()];
    let mut links = Vec::new();
    while let Some(next) = queue.pop() {
        let tm = fetch_timemap(&next).await?;
        for link in tm.links {
            if link.is_timemap() {
                if visited.insert(link.url.clone()) {
                    queue.push(link.url);
                }
            } else {
                links.push(link);
            }
        }
    }
    Ok(merge_links(links))
}

/// Order and de-duplicate spidered links: non-memento entries first in
/// arrival order, then mementos strictly newest-first, one per URL.
fn merge_links(links: Vec<Memento>) -> TimeMap {
    let mut others = Vec::new();
    let mut mementos = Vec::new();
    for link in links {
        if link.is_memento() {
            mementos.push(link);
        } else if !link.is_timemap() {
            others.push(link);
        }
    }
    mementos.sort_by_key(|m| std::cmp::Reverse(m.datetime().unwrap_or(DateTime::UNIX_EPOCH)));
    let mut seen = HashSet::new();
    mementos.retain(|m| seen.insert(m.url.clone()));
    others.extend(mementos);
    TimeMap { links: others }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_link_basic() {
        let mem = parse_link(
            "<http://example.com/foo/bar>; rel=\"original\"; \
             datetime=\"Fri, 02 Jun 2017 21:27:18 GMT\",",
        )
        .unwrap();
        assert_eq!(mem.url, "http://example.com/foo/bar");
        assert_eq!(mem.rel(), "original");
        assert_eq!(
            mem.params.get("datetime").unwrap(),
            "Fri, 02 Jun 2017 21:27:18 GMT"
        );
    }

    #[test]
    fn test_parse_link_newline_and_spacing() {
        let mem = parse_link("<http://example.com/bar/bar>;\n rel=\"original\";       foo=\"bar\"")
            .unwrap();
        assert_eq!(mem.url, "http://example.com/bar/bar");
        assert_eq!(mem.rel(), "original");
        assert_eq!(mem.params.get("foo").unwrap(), "bar");
    }

    #[test]
    fn test_parse_link_no_url() {
        assert!(parse_link("<>; rel=\"original\"").is_err());
        assert!(parse_link("no angle brackets at all").is_err());
    }

    #[test]
    fn test_parse_link_canonicalizes_datetime() {
        let mem = parse_link(
            "<http://a.test/x>; rel=\"memento\"; datetime=\"Fri, 2 Jun 2017, 21:27:18 GMT\"",
        )
        .unwrap();
        assert_eq!(
            mem.params.get("datetime").unwrap(),
            "Fri, 02 Jun 2017 21:27:18 GMT"
        );
    }

    #[test]
    fn test_parse_link_rejects_bad_datetime() {
        assert!(
            parse_link("<http://a.test/x>; rel=\"memento\"; datetime=\"June the 2nd\"").is_err()
        );
    }

    fn sample_timemap() -> String {
        "<http://example.com>; rel=\"original\",\n\
         <http://tg.test/example.com>; rel=\"timegate\",\n\
         <http://tm.test/2/example.com>; rel=\"timemap\",\n\
         <http://arc.test/1>; rel=\"first memento\"; datetime=\"Mon, 02 Apr 2018 00:00:00 GMT\",\n\
         <http://arc.test/2>; rel=\"memento\";\n datetime=\"Tue, 03 Apr 2018 00:00:00 GMT\",\n\
         <http://arc.test/3>; rel=\"last memento\"; datetime=\"Wed, 04 Apr 2018 00:00:00 GMT\"\n"
            .to_string()
    }

    #[test]
    fn test_parse_timemap_counts() {
        let tm = TimeMap::parse(&sample_timemap()).unwrap();
        assert_eq!(tm.links.len(), 6);
        assert_eq!(tm.mementos().len(), 3);
        assert_eq!(tm.timemaps().len(), 1);
    }

    #[test]
    fn test_parse_timemap_entry_across_lines() {
        let tm = TimeMap::parse(&sample_timemap()).unwrap();
        let split_entry = tm
            .links
            .iter()
            .find(|l| l.url == "http://arc.test/2")
            .unwrap();
        assert_eq!(
            split_entry.params.get("datetime").unwrap(),
            "Tue, 03 Apr 2018 00:00:00 GMT"
        );
    }

    #[test]
    fn test_merge_links_sorts_and_dedupes() {
        let tm = TimeMap::parse(&sample_timemap()).unwrap();
        let mut links = tm.links.clone();
        // a duplicate of the newest memento, as a second timemap would
        // report it
        links.push(links[5].clone());
        let merged = merge_links(links);
        let mems = merged.mementos();
        assert_eq!(mems.len(), 3);
        let urls: Vec<&str> = mems.iter().map(|m| m.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["http://arc.test/3", "http://arc.test/2", "http://arc.test/1"]
        );
        // strictly newest first
        for pair in mems.windows(2) {
            assert!(pair[0].datetime().unwrap() > pair[1].datetime().unwrap());
        }
        // no timemap entries survive the merge
        assert!(merged.links.iter().all(|l| !l.is_timemap()));
    }
}
