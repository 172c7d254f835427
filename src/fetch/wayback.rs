//! Rebuilding a feed's history from a web archive's mementos.
//!
//! Adjacent snapshots of a living feed overlap heavily, so fetching
//! every memento wastes most of its work. The walker fetches the newest
//! snapshot as the seed, then binary-subdivides the remaining range:
//! while the oldest fetched snapshot shares nothing with what we hold,
//! recurse into the newer half to close the gap. The split point is
//! biased high so the very last memento is eventually consumed, which
//! forces an overlap and terminates the walk.

use futures::future::BoxFuture;

use crate::error::{RecastError, Result};
use crate::feed::{Feed, Item};
use crate::fetch::http;
use crate::memento::{spider_timemap, Memento};

/// Rebuild the full feed behind a timemap URL.
pub async fn feed_from_archive(url: &str) -> Result<Feed> {
    let tm = spider_timemap(url).await?;
    let mems = tm.mementos();
    let Some((latest, rest)) = mems.split_first() else {
        return Err(RecastError::NotFound(format!("mementos for {url}")));
    };

    let bytes = http::bytes_from_url(&latest.url).await?;
    let mut feed = Feed::parse(&bytes)?;
    let merged = items_from_mementos(feed.items().to_vec(), rest).await?;

    // the merged list opens with the seed's own items; keep only what
    // comes after the seed's oldest
    let mut extra = merged;
    if feed.len_items() > 0 {
        let last_guid = feed
            .item(feed.len_items() - 1)
            .guid()
            .unwrap_or_default();
        if let Some(pos) = extra
            .iter()
            .rposition(|it| it.guid().unwrap_or_default() == last_guid)
        {
            extra.drain(..=pos);
        }
    }
    feed.append_items(extra);
    Ok(feed)
}

/// Merge the items of `mems` (newest first) onto `prefix`, skipping
/// redundant fetches where the overlap lets us.
fn items_from_mementos<'a>(
    prefix: Vec<Item>,
    mems: &'a [Memento],
) -> BoxFuture<'a, Result<Vec<Item>>> {
    Box::pin(async move {
        if mems.is_empty() {
            return Ok(prefix);
        }
        if mems.len() == 1 {
            let items = items_from_url(&mems[0].url).await?;
            return Ok(uniq(prefix, items));
        }

        // prefix holds everything newer than some point; postfix is the
        // oldest snapshot in range
        let postfix = items_from_url(&mems[mems.len() - 1].url).await?;
        let mut prefix = prefix;
        let mut mems = mems;
        while uniq_len(&prefix, &postfix) == prefix.len() + postfix.len() {
            let mid = (mems.len() + 1) / 2;
            let stride = &mems[..mid];
            mems = &mems[mid..];
            if mems.is_empty() {
                // the stride was just the last memento; its items are
                // already in postfix
                break;
            }
            prefix = items_from_mementos(prefix, stride).await?;
        }
        Ok(uniq(prefix, postfix))
    })
}

/// Append every item of `b` whose GUID is absent from `a`, preserving
/// order on both sides.
fn uniq(mut a: Vec<Item>, b: Vec<Item>) -> Vec<Item> {
    let guids: std::collections::HashSet<String> =
        a.iter().map(|it| it.guid().unwrap_or_default()).collect();
    for item in b {
        if !guids.contains(&item.guid().unwrap_or_default()) {
            a.push(item);
        }
    }
    a
}

/// What `uniq(a, b).len()` would be, without building the merge.
fn uniq_len(a: &[Item], b: &[Item]) -> usize {
    let guids: std::collections::HashSet<String> =
        a.iter().map(|it| it.guid().unwrap_or_default()).collect();
    a.len()
        + b.iter()
            .filter(|it| !guids.contains(&it.guid().unwrap_or_default()))
            .count()
}

async fn items_from_url(url: &str) -> Result<Vec<Item>> {
    let bytes = http::bytes_from_url(url).await?;
    let feed = Feed::parse(&bytes)?;
    Ok(feed.items().to_vec())
}
