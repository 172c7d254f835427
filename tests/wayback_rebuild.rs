//! Rebuilding a feed from archive mementos, against local servers.

mod common;

use std::collections::HashMap;

use common::{serve_bodies, start_date, timemap_text, TestRss};
use recast::fetch::http;
use recast::fetch::wayback::feed_from_archive;
use recast::Feed;

/// Datetimes descending with index, so memento /m0 sorts newest.
fn memento_datetime(idx: usize) -> String {
    let day = chrono::NaiveDate::from_ymd_opt(2018, 3, 30).unwrap() - chrono::Days::new(idx as u64);
    recast::datetime::format_rfc1123(recast::datetime::utc_midnight(day))
}

/// Stand up memento servers holding the given documents (newest first)
/// plus a timemap listing them, and return the timemap URL.
async fn archive_of(documents: Vec<String>) -> String {
    let mut bodies = HashMap::new();
    let mut mementos = Vec::new();
    for (i, document) in documents.iter().enumerate() {
        bodies.insert(format!("/m{i}"), document.clone());
        mementos.push((format!("/m{i}"), i));
    }
    let base = serve_bodies(bodies).await;

    let memento_entries: Vec<(String, String)> = mementos
        .iter()
        .map(|(path, i)| (format!("{base}{path}"), memento_datetime(*i)))
        .collect();
    let entry_refs: Vec<(String, &str)> = memento_entries
        .iter()
        .map(|(url, dt)| (url.clone(), dt.as_str()))
        .collect();
    let tm = timemap_text(
        "http://example.com",
        "http://tg.example/example.com",
        &[],
        &entry_refs,
    );
    let tm_base = serve_bodies(HashMap::from([("/tm".to_string(), tm)])).await;
    format!("{tm_base}/tm")
}

fn check_items(feed: &Feed, count: usize) {
    assert_eq!(feed.len_items(), count);
    let mut seen = std::collections::HashSet::new();
    for item in feed.items() {
        let guid = item.guid().expect("item has a guid");
        assert!(seen.insert(guid.clone()), "item duplicated: {guid}");
    }
}

#[tokio::test]
async fn test_fetch_one_memento() {
    http::set_be_safe(false);
    let items = TestRss::populated(10, start_date()).items().to_vec();
    let url = archive_of(vec![TestRss::document_of(&items)]).await;
    let feed = feed_from_archive(&url).await.unwrap();
    check_items(&feed, 10);
}

#[tokio::test]
async fn test_fetch_mementos_no_redundancy() {
    http::set_be_safe(false);
    let items = TestRss::populated(20, start_date()).items().to_vec();
    let url = archive_of(vec![
        TestRss::document_of(&items[..10]),
        TestRss::document_of(&items[10..]),
    ])
    .await;
    let feed = feed_from_archive(&url).await.unwrap();
    check_items(&feed, 20);
}

#[tokio::test]
async fn test_fetch_mementos_with_redundancies() {
    http::set_be_safe(false);
    let items = TestRss::populated(20, start_date()).items().to_vec();
    let url = archive_of(vec![
        TestRss::document_of(&items[..14]),
        TestRss::document_of(&items[10..]),
    ])
    .await;
    let feed = feed_from_archive(&url).await.unwrap();
    check_items(&feed, 20);
}

#[tokio::test]
async fn test_fetch_mementos_all_redundant() {
    http::set_be_safe(false);
    let items = TestRss::populated(10, start_date()).items().to_vec();
    let url = archive_of(vec![TestRss::document_of(&items), TestRss::document_of(&items)]).await;
    let feed = feed_from_archive(&url).await.unwrap();
    check_items(&feed, 10);
}

#[tokio::test]
async fn test_overlapping_ranges_merge_to_unique_items() {
    http::set_be_safe(false);
    // three snapshots covering items 15..9, 11..5, 7..1 (newest first)
    let items = TestRss::populated(15, start_date()).items().to_vec();
    let url = archive_of(vec![
        TestRss::document_of(&items[..7]),
        TestRss::document_of(&items[4..11]),
        TestRss::document_of(&items[8..]),
    ])
    .await;
    let feed = feed_from_archive(&url).await.unwrap();
    check_items(&feed, 15);
}

#[tokio::test]
async fn test_redundant_middle_memento_is_skipped() {
    http::set_be_safe(false);
    let items = TestRss::populated(15, start_date()).items().to_vec();
    // the middle snapshot is poison: fetching it would fail the parse,
    // failing the test; the overlap between the ends makes it skippable
    let url = archive_of(vec![
        TestRss::document_of(&items[..10]),
        "this is not xml at all <<<".to_string(),
        TestRss::document_of(&items[7..]),
    ])
    .await;
    let feed = feed_from_archive(&url).await.unwrap();
    check_items(&feed, 15);
}

#[tokio::test]
async fn test_perfect_split_still_terminates() {
    http::set_be_safe(false);
    // no overlap between any snapshots; the bias-high split must still
    // consume every memento and converge
    let items = TestRss::populated(15, start_date()).items().to_vec();
    let url = archive_of(vec![
        TestRss::document_of(&items[..5]),
        TestRss::document_of(&items[5..10]),
        TestRss::document_of(&items[10..]),
    ])
    .await;
    let feed = feed_from_archive(&url).await.unwrap();
    check_items(&feed, 15);
}
