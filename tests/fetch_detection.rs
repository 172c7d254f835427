//! Fetcher detection heuristics and the self-linking walker, against
//! local servers.

mod common;

use std::collections::HashMap;

use common::{serve_bodies, start_date, TestRss};
use recast::fetch::http;
use recast::{select_fetcher, Fetcher, RecastError};

fn rss_with_channel_extras(extras: &str, items: &[String]) -> String {
    format!(
        "<rss version=\"2.0\"><channel><title>t</title>{extras}{}</channel></rss>",
        items.join("")
    )
}

#[tokio::test]
async fn test_generator_selects_squarespace() {
    http::set_be_safe(false);
    let items = TestRss::populated(3, start_date()).items().to_vec();
    let body = rss_with_channel_extras("<generator>Site-Server v6.5.1</generator>", &items);
    let base = serve_bodies(HashMap::from([("/feed".to_string(), body)])).await;

    let detection = select_fetcher(&format!("{base}/feed")).await.unwrap();
    assert_eq!(detection.fetcher, Fetcher::Squarespace);
    assert!(!detection.trusted);
}

#[tokio::test]
async fn test_generator_selects_libsyn() {
    http::set_be_safe(false);
    let items = TestRss::populated(3, start_date()).items().to_vec();
    let body = rss_with_channel_extras("<generator>Libsyn WebEngine 2.0</generator>", &items);
    let base = serve_bodies(HashMap::from([("/feed".to_string(), body)])).await;

    let detection = select_fetcher(&format!("{base}/feed")).await.unwrap();
    assert_eq!(detection.fetcher, Fetcher::Libsyn);
    assert!(detection.trusted);
}

#[tokio::test]
async fn test_rel_next_selects_self_linking_walker() {
    http::set_be_safe(false);
    let items = TestRss::populated(3, start_date()).items().to_vec();
    let body = rss_with_channel_extras(
        "<atom:link xmlns:atom=\"http://www.w3.org/2005/Atom\" rel=\"next\" \
         href=\"http://example.com/page2\"/>",
        &items,
    );
    let base = serve_bodies(HashMap::from([("/feed".to_string(), body)])).await;

    let detection = select_fetcher(&format!("{base}/feed")).await.unwrap();
    assert_eq!(detection.fetcher, Fetcher::SelfLinking);
}

#[tokio::test]
async fn test_plain_feed_fails_detection() {
    http::set_be_safe(false);
    let items = TestRss::populated(3, start_date()).items().to_vec();
    let body = rss_with_channel_extras("", &items);
    let base = serve_bodies(HashMap::from([("/feed".to_string(), body)])).await;

    let result = select_fetcher(&format!("{base}/feed")).await;
    assert!(matches!(result, Err(RecastError::DetectFailed(_))));
}

#[tokio::test]
async fn test_non_feed_body_is_a_format_error() {
    http::set_be_safe(false);
    let base = serve_bodies(HashMap::from([(
        "/page".to_string(),
        "<html><body>hello</body></html>".to_string(),
    )]))
    .await;

    let result = select_fetcher(&format!("{base}/page")).await;
    assert!(matches!(result, Err(RecastError::Format(_))));
}

#[tokio::test]
async fn test_self_linking_walker_follows_next_links() {
    http::set_be_safe(false);
    let items = TestRss::populated(8, start_date()).items().to_vec();

    // bind first so the pages can point at each other
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let next_link = |path: &str| {
        format!(
            "<atom:link xmlns:atom=\"http://www.w3.org/2005/Atom\" rel=\"next\" \
             href=\"http://{addr}{path}\"/>"
        )
    };
    // pages overlap by one item, newest page first
    let page1 = rss_with_channel_extras(&next_link("/page2"), &items[..3]);
    let page2 = rss_with_channel_extras(&next_link("/page3"), &items[2..6]);
    let page3 = rss_with_channel_extras("", &items[5..]);

    let mut bodies = HashMap::new();
    bodies.insert("/page1".to_string(), page1);
    bodies.insert("/page2".to_string(), page2);
    bodies.insert("/page3".to_string(), page3);
    let shared = std::sync::Arc::new(bodies);
    let app = axum::Router::new().fallback(move |req: axum::extract::Request| {
        let shared = std::sync::Arc::clone(&shared);
        async move {
            use axum::response::IntoResponse;
            match shared.get(req.uri().path()) {
                Some(body) => (axum::http::StatusCode::OK, body.clone()).into_response(),
                None => axum::http::StatusCode::NOT_FOUND.into_response(),
            }
        }
    });
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    let feed = Fetcher::SelfLinking
        .run(&format!("http://{addr}/page1"))
        .await
        .unwrap();
    assert_eq!(feed.len_items(), 8);
    let guids: Vec<String> = feed
        .items()
        .iter()
        .map(|it| it.guid().unwrap())
        .collect();
    assert_eq!(guids, vec!["8", "7", "6", "5", "4", "3", "2", "1"]);
}
