//! Demo web service: build a feed record, preview the replay, serve the
//! replayed feed, take quality grades.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{NaiveDate, Utc, Weekday};
use clap::Parser;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use recast::fetch::http;
use recast::store::grades::{
    is_user_grade, user_may_overwrite, warrants_caution, GRADE_AUTO_SUSPECT, GRADE_AUTO_TRUSTED,
    GRADE_BUILDING, GRADE_FAILED,
};
use recast::store::{FeedStore, META_GRADE, META_WRAPPER};
use recast::{select_fetcher, Config, DateSource, Detection, Fetcher, Item, RecastError, RenderItem};

const CAUTION_NO_FETCHER: &str = "No auto-builder known. \
The server did not auto-detect a method to build up the entire history of \
the feed, and has fallen back to using just the current feed available. \
This could still work, but it's quite possible that it is missing some of \
the earlier items.";

const CAUTION_SKETCHY_FETCHER: &str = "Best-guess auto-builder. \
The server has made an attempt to re-build the entire history of the feed, \
but the method used is known to sometimes have problems. Most likely, if \
there's an issue, it will be with the earlier items.";

const CAUTION_QUALITY_ISSUE: &str = "Potential feed quality issues. \
A user has flagged a quality issue with this feed. Proceed with caution.";

/// How many items the served replay feed carries.
const SERVED_WINDOW: usize = 5;

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Sun,
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
];

#[derive(Parser, Debug)]
#[command(name = "recast-server", about = "Feed replay demo service")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: String,
    /// Override the store root directory.
    #[arg(long)]
    store: Option<String>,
}

struct AppState {
    root: PathBuf,
}

impl AppState {
    fn store(&self) -> Result<FeedStore, ApiError> {
        FeedStore::new(&self.root).map_err(|e| {
            error!(error = %e, "store unavailable");
            ApiError::internal("store unavailable")
        })
    }
}

/// An error already shaped for the wire.
struct ApiError {
    status: StatusCode,
    body: serde_json::Value,
}

impl ApiError {
    fn new(status: StatusCode, msg: &str) -> ApiError {
        ApiError {
            status,
            body: json!({ "err": msg }),
        }
    }

    fn bad_request(msg: &str) -> ApiError {
        ApiError::new(StatusCode::BAD_REQUEST, msg)
    }

    fn not_found(msg: &str) -> ApiError {
        ApiError::new(StatusCode::NOT_FOUND, msg)
    }

    fn internal(msg: &str) -> ApiError {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    fn rerun(e: &RecastError) -> ApiError {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: json!({ "err": "rerunerr", "msg": e.to_string() }),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Parse a schedule like "02" (Sunday and Tuesday) into weekdays.
fn parse_sched(digits: &str) -> Vec<Weekday> {
    digits
        .chars()
        .take(7)
        .filter_map(|c| c.to_digit(10))
        .filter(|d| *d < 7)
        .map(|d| WEEKDAYS[d as usize])
        .collect()
}

fn render_map(item: &RenderItem) -> serde_json::Value {
    json!({
        "pubdate": item.pub_date,
        "title": item.title,
        "description": item.description,
        "guid": item.guid,
        "url": item.url,
        "enclosure": item.enclosure,
    })
}

/// GET /api/build?url= creates the record and rebuilds the history.
async fn build_api(
    State(state): State<Arc<AppState>>,
    Query(q): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let raw = q
        .get("url")
        .ok_or_else(|| ApiError::bad_request("no URL provided to build a feed"))?;
    let url = http::canonical_url(raw).await.unwrap_or_else(|_| raw.clone());

    let store = state.store()?;
    if store.create_index(&url).is_err() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "feedexists"));
    }
    let _ = store.set_info(&url, META_GRADE, GRADE_BUILDING);

    let (detection, mut caution) = match select_fetcher(&url).await {
        Ok(detection) => (detection, ""),
        Err(RecastError::DetectFailed(_)) => (
            Detection {
                fetcher: Fetcher::Plain,
                url: url.clone(),
                trusted: false,
            },
            CAUTION_NO_FETCHER,
        ),
        Err(e) => {
            let _ = store.set_info(&url, META_GRADE, GRADE_FAILED);
            return Err(ApiError::rerun(&e));
        }
    };
    if caution.is_empty() && !detection.trusted {
        caution = CAUTION_SKETCHY_FETCHER;
    }
    let grade = if detection.trusted {
        GRADE_AUTO_TRUSTED
    } else {
        GRADE_AUTO_SUSPECT
    };

    let feed = match detection.fetcher.run(&detection.url).await {
        Ok(feed) => feed,
        Err(e) => {
            let _ = store.set_info(&url, META_GRADE, GRADE_FAILED);
            return Err(ApiError::rerun(&e));
        }
    };

    let n_items = feed.len_items();
    let mut items: Vec<Item> = feed.items().to_vec();
    items.reverse();
    store.update(&url, &items).map_err(|e| {
        let _ = store.set_info(&url, META_GRADE, GRADE_FAILED);
        ApiError::rerun(&e)
    })?;
    let _ = store.set_info(
        &url,
        META_WRAPPER,
        &String::from_utf8_lossy(&feed.wrapper()),
    );

    if n_items < 2 {
        let _ = store.set_info(&url, META_GRADE, GRADE_AUTO_SUSPECT);
        return Err(ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: json!({ "err": "rerunerr", "msg": "that feed, as rebuilt, looks broken." }),
        });
    }
    let _ = store.set_info(&url, META_GRADE, grade);
    info!(url, n_items, grade, "feed built");

    Ok(Json(json!({
        "nItems": n_items,
        "first": render_map(&feed.item(n_items - 1).render()),
        "last": render_map(&feed.item(0).render()),
        "url": url,
        "caution": caution,
        "askgrade": grade != GRADE_AUTO_TRUSTED,
    })))
}

/// GET /api/preview?url=&sched= lists what a replay started a week ago
/// would have shown so far.
async fn preview_api(
    State(state): State<Arc<AppState>>,
    Query(q): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let sched = parse_sched(q.get("sched").map(String::as_str).unwrap_or(""));
    if sched.is_empty() {
        return Err(ApiError::bad_request(
            "need at least one day in your schedule",
        ));
    }
    let url = q
        .get("url")
        .ok_or_else(|| ApiError::not_found("we don't have that feed yet, try another?"))?;
    let store = state.store()?;
    if !store.contains(url) {
        return Err(ApiError::not_found("we don't have that feed yet, try another?"));
    }

    let today = Utc::now().date_naive();
    let start = today - chrono::Days::new(7);
    let mut ds = DateSource::new(start, sched.clone());
    let mut n = ds.dates_in_range(start, today) as usize;
    n = n.min(store.num_items(url));
    if n == 0 {
        return Err(ApiError::bad_request("nothing to preview yet"));
    }

    let mut items = store.get(url, 0, n).map_err(|e| {
        error!(url, error = %e, "preview read failed");
        ApiError::internal("could not read the archive")
    })?;

    let mut listing = Vec::with_capacity(n);
    for item in items.iter_mut() {
        let old_date = item
            .pub_date()
            .map(|d| d.format("%a %b %e %Y").to_string())
            .unwrap_or_default();
        let new_date = ds.next_date().map_err(|e| {
            warn!(url, error = %e, "schedule ran dry");
            ApiError::bad_request("bad schedule")
        })?;
        let _ = item.set_pub_date(recast::datetime::utc_midnight(new_date));
        listing.push(json!({
            "title": item.render().title,
            "link": item.guid().unwrap_or_default(),
            "new_date": new_date.format("%a %b %e %Y").to_string(),
            "old_date": old_date,
        }));
    }
    listing.reverse();

    let grade = store.get_info(url, META_GRADE).unwrap_or_default();
    let warning = if grade == GRADE_AUTO_SUSPECT {
        CAUTION_SKETCHY_FETCHER
    } else if warrants_caution(&grade) {
        CAUTION_QUALITY_ISSUE
    } else {
        ""
    };

    let sched_digits: String = q.get("sched").cloned().unwrap_or_default();
    let feed_link = format!(
        "/api/feed?url={}&start={}&sched={}",
        urlencode(url),
        start.format("%Y%m%d"),
        sched_digits,
    );

    Ok(Json(json!({
        "url": url,
        "weekdays": sched.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
        "feed_link": feed_link,
        "warning": warning,
        "items": listing,
    })))
}

/// GET /api/feed?url=&start=YYYYMMDD&sched= serves the replayed feed as XML.
async fn feed_api(
    State(state): State<Arc<AppState>>,
    Query(q): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let (Some(url), Some(start), Some(sched)) = (q.get("url"), q.get("start"), q.get("sched"))
    else {
        return Err(ApiError::bad_request(
            "not enough params (need url, start, and sched)",
        ));
    };
    let store = state.store()?;
    if !store.contains(url) {
        return Err(ApiError::not_found("that feed is not in the store"));
    }
    let start = NaiveDate::parse_from_str(start, "%Y%m%d")
        .map_err(|_| ApiError::bad_request("invalid date passed as start"))?;
    let sched = parse_sched(sched);
    if sched.is_empty() {
        return Err(ApiError::bad_request("invalid schedule"));
    }

    let mut stored = store.feed_for(url).map_err(|e| {
        error!(url, error = %e, "no renderable wrapper");
        ApiError::internal("that feed has no stored envelope")
    })?;
    // don't let the original publisher redirect subscribers away
    stored.feed_mut().strip_new_feed_url();

    let mut ds = DateSource::new(start, sched);
    let items = stored
        .shifted_at(SERVED_WINDOW, Utc::now().date_naive(), &mut ds)
        .map_err(|e| match e {
            RecastError::Schedule(_) => ApiError::bad_request("that replay has not started yet"),
            e => {
                error!(url, error = %e, "projection failed");
                ApiError::internal("could not project the feed")
            }
        })?;

    let body = stored.bytes_with_items(&items);
    Ok(([(header::CONTENT_TYPE, "text/xml; charset=utf-8")], body).into_response())
}

/// GET /api/grade?url=&grade= records a user quality grade.
async fn grade_api(
    State(state): State<Arc<AppState>>,
    Query(q): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (Some(url), Some(grade)) = (q.get("url"), q.get("grade")) else {
        return Err(ApiError::bad_request("not enough params (need url, grade)"));
    };
    let store = state.store()?;
    let previous = store
        .get_info(url, META_GRADE)
        .map_err(|_| ApiError::not_found("that feed is not in the store"))?;
    if !user_may_overwrite(&previous) {
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "trying to override a non-user grade",
        ));
    }
    if !is_user_grade(grade) {
        return Err(ApiError::bad_request(
            "trying to set a non-user or invalid grade",
        ));
    }
    store
        .set_info(url, META_GRADE, grade)
        .map_err(|_| ApiError::internal("could not record the grade"))?;
    Ok(Json(json!({ "status": "ok" })))
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

pub fn router(root: PathBuf) -> Router {
    let state = Arc::new(AppState { root });
    Router::new()
        .route("/api/build", get(build_api))
        .route("/api/preview", get(preview_api))
        .route("/api/feed", get(feed_api))
        .route("/api/grade", get(grade_api))
        .with_state(state)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let mut config = Config::load_or_default(&args.config);
    if let Some(store) = args.store {
        config.store.root = store;
    }
    if let Err(e) = recast::logging::init(&config.logging) {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(1);
    }
    http::set_be_safe(config.fetch.be_safe);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr, error = %e, "could not bind");
            std::process::exit(1);
        }
    };
    info!(addr, store = %config.store.root, "serving");
    if let Err(e) = axum::serve(listener, router(PathBuf::from(config.store.root))).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}
