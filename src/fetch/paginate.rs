//! The generic paginated history walker.
//!
//! Every paginated feed source works the same way: fetch the live feed,
//! then keep asking for the next-older page until a page brings nothing
//! new. Only the "what is the next page's URL" rule differs per
//! generator, so that rule is a parameter.

use std::collections::HashSet;

use crate::error::Result;
use crate::feed::{Feed, Item};
use crate::fetch::http;

/// What a next-URL rule gets to look at.
pub struct PageContext<'a> {
    /// The seed URL the walk started from.
    pub base: &'a str,
    /// How many pages have been fetched so far (the seed counts).
    pub pages_fetched: u64,
    /// Everything accumulated so far, newest first.
    pub aggregate: &'a Feed,
    /// The most recently fetched page.
    pub last_page: &'a Feed,
}

/// Compute the next page URL, or `None` to stop walking.
pub type NextUrlFn = fn(&PageContext<'_>) -> Result<Option<String>>;

/// Walk a paginated source until it runs dry.
///
/// Pages are assumed newest-first; each page is trimmed of its overlap
/// with what we already hold (everything down to the aggregate's oldest
/// GUID, plus any stray duplicates) and the remainder appended. An empty
/// remainder ends the walk.
pub async fn walk(seed_url: &str, initial_delay: u64, next_url: NextUrlFn) -> Result<Feed> {
    let (bytes, mut delay) = http::bytes_from_url_with_delay(seed_url, initial_delay).await?;
    let mut aggregate = Feed::parse(&bytes)?;
    if aggregate.len_items() == 0 {
        return Ok(aggregate);
    }
    let mut last_page = aggregate.clone();
    let mut pages_fetched: u64 = 1;

    loop {
        let next = {
            let ctx = PageContext {
                base: seed_url,
                pages_fetched,
                aggregate: &aggregate,
                last_page: &last_page,
            };
            next_url(&ctx)?
        };
        let Some(next) = next else { break };

        let (bytes, new_delay) = http::bytes_from_url_with_delay(&next, delay).await?;
        delay = new_delay;
        let page = Feed::parse(&bytes)?;
        pages_fetched += 1;

        let fresh = trim_overlap(&aggregate, page.items());
        if fresh.is_empty() {
            break;
        }
        aggregate.append_items(fresh);
        last_page = page;
    }
    Ok(aggregate)
}

/// Drop the page's head down to and including the aggregate's oldest
/// GUID, then anything else already held.
fn trim_overlap(aggregate: &Feed, page_items: &[Item]) -> Vec<Item> {
    let oldest_guid = aggregate
        .item(aggregate.len_items() - 1)
        .guid()
        .unwrap_or_default();
    let mut fresh: Vec<Item> = page_items.to_vec();
    if let Some(pos) = fresh
        .iter()
        .position(|it| it.guid().map(|g| g == oldest_guid).unwrap_or(false))
    {
        fresh.drain(..=pos);
    }
    let seen: HashSet<String> = aggregate
        .items()
        .iter()
        .filter_map(|it| it.guid().ok())
        .collect();
    fresh.retain(|it| it.guid().map(|g| !seen.contains(&g)).unwrap_or(true));
    fresh
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_with_guids(guids: &[u32]) -> Feed {
        let mut body = String::from("<rss version=\"2.0\"><channel><title>t</title>");
        for g in guids {
            body.push_str(&format!(
                "<item><title>post {g}</title><guid>{g}</guid></item>"
            ));
        }
        body.push_str("</channel></rss>");
        Feed::parse(body.as_bytes()).unwrap()
    }

    #[test]
    fn test_trim_overlap_cuts_through_oldest_guid() {
        let aggregate = feed_with_guids(&[10, 9, 8]);
        let page = feed_with_guids(&[9, 8, 7, 6]);
        let fresh = trim_overlap(&aggregate, page.items());
        let guids: Vec<String> = fresh.iter().map(|it| it.guid().unwrap()).collect();
        assert_eq!(guids, vec!["7", "6"]);
    }

    #[test]
    fn test_trim_overlap_drops_stray_duplicates() {
        let aggregate = feed_with_guids(&[10, 9, 8]);
        // no item matches the oldest guid, but 9 is already held
        let page = feed_with_guids(&[9, 7, 6]);
        let fresh = trim_overlap(&aggregate, page.items());
        let guids: Vec<String> = fresh.iter().map(|it| it.guid().unwrap()).collect();
        assert_eq!(guids, vec!["7", "6"]);
    }

    #[test]
    fn test_trim_overlap_fully_redundant_page() {
        let aggregate = feed_with_guids(&[10, 9, 8]);
        let page = feed_with_guids(&[10, 9, 8]);
        assert!(trim_overlap(&aggregate, page.items()).is_empty());
    }
}
