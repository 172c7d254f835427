//! Shared fixtures for integration tests: canned feeds and a tiny
//! static-body HTTP server.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Router;
use chrono::{Days, NaiveDate};

use recast::datetime::{format_rfc822, utc_midnight};

pub fn start_date() -> NaiveDate {
    // arbitrarily, March 19, 2015 (a Thursday)
    NaiveDate::from_ymd_opt(2015, 3, 19).unwrap()
}

/// A hand-rolled RSS document builder, item strings newest first.
#[derive(Debug, Clone, Default)]
pub struct TestRss {
    items: Vec<String>,
}

impl TestRss {
    /// `n` posts, weekly, newest first, guids n down to 1.
    pub fn populated(n: usize, start: NaiveDate) -> TestRss {
        let mut rss = TestRss::default();
        for i in (1..=n).rev() {
            let pubdate = format_rfc822(utc_midnight(start + Days::new(7 * (i as u64 - 1))));
            rss.add_post(&format!(
                "<title>post number {i}</title>\
                 <pubDate>{pubdate}</pubDate>\
                 <guid>{i}</guid>\
                 <description>originally published {pubdate}</description>"
            ));
        }
        rss
    }

    pub fn add_post(&mut self, body: &str) {
        self.items.push(format!("<item>{body}</item>"));
    }

    /// The raw item strings, newest first.
    pub fn items(&self) -> &[String] {
        &self.items
    }

    /// A document holding only the given item strings.
    pub fn document_of(items: &[String]) -> String {
        TestRss {
            items: items.to_vec(),
        }
        .text()
    }

    pub fn text(&self) -> String {
        format!(
            "<rss version=\"2.0\"><channel><title>foo</title>\n\
             <link>http://example.com</link>\n\
             <description>Foobity foo bar.</description>\n\
             {}\n</channel></rss>\n",
            self.items.join("\n")
        )
    }
}

/// Serve fixed bodies keyed by request path from an ephemeral local
/// port; returns the base URL.
pub async fn serve_bodies(bodies: HashMap<String, String>) -> String {
    let shared = Arc::new(bodies);
    let app = Router::new().fallback(move |req: Request| {
        let shared = Arc::clone(&shared);
        async move {
            match shared.get(req.uri().path()) {
                Some(body) => (StatusCode::OK, body.clone()).into_response(),
                None => (StatusCode::NOT_FOUND, String::new()).into_response(),
            }
        }
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test server");
    let addr = listener.local_addr().expect("test server addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server");
    });
    format!("http://{addr}")
}

/// Render a timemap document in link format: original and timegate
/// first, then linked timemaps, then mementos newest first.
pub fn timemap_text(
    original: &str,
    timegate: &str,
    timemaps: &[String],
    mementos: &[(String, &str)],
) -> String {
    let mut out = format!(
        "<{original}>; rel=\"original\",\n<{timegate}>; rel=\"timegate\",\n"
    );
    for tm in timemaps {
        out.push_str(&format!("<{tm}>; rel=\"timemap\",\n"));
    }
    for (url, datetime) in mementos {
        out.push_str(&format!(
            "<{url}>; rel=\"memento\"; datetime=\"{datetime}\",\n"
        ));
    }
    out
}
