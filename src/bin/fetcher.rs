//! Bulk-refresh every feed in an OPML list into the store.

use std::collections::HashMap;

use clap::Parser;
use tracing::{error, info, warn};

use recast::config::LoggingConfig;
use recast::fetch::http;
use recast::store::{FeedStore, META_ETAG, META_LAST_MODIFIED, META_WRAPPER};
use recast::{parse_opml, Feed, Item, Result};

#[derive(Parser, Debug)]
#[command(name = "recast-fetcher", about = "Refresh a store from an OPML feed list")]
struct Args {
    /// Feed list in OPML format.
    #[arg(long)]
    opml: String,
    /// Directory of the feed store.
    #[arg(long)]
    store: String,
    /// File to append logs into.
    #[arg(long)]
    logfile: Option<String>,
    /// Only report errors.
    #[arg(short, long)]
    quiet: bool,
    /// Report info, warn, errors.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Default)]
struct Stats {
    http_codes: HashMap<u16, usize>,
    items: usize,
    new_items: usize,
    parse_errors: usize,
    store_errors: usize,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let logging = LoggingConfig {
        level: recast::logging::level_from_flags(args.quiet, args.verbose).to_string(),
        file: args.logfile.clone(),
    };
    if let Err(e) = recast::logging::init(&logging) {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run(&args).await {
        error!("run failed: {e}");
        std::process::exit(1);
    }
}

/// Fetch a feed URL, using stored validators so an unchanged feed costs
/// a 304 instead of a body. New validators are recorded as they appear.
async fn maybe_fetch(store: &FeedStore, url: &str) -> Result<(u16, Vec<u8>)> {
    let etag = store.get_info(url, META_ETAG).unwrap_or_default();
    let last_modified = store.get_info(url, META_LAST_MODIFIED).unwrap_or_default();
    let resp = http::get_with_validators(url, Some(&etag), Some(&last_modified)).await?;

    let status = resp.status().as_u16();
    http::record_canonical(url, resp.url().as_str());

    if status != 304 {
        // some servers don't return validators on a 304, so only
        // re-record them on a full response
        let new_etag = resp
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.strip_prefix("W/").unwrap_or(v).to_string())
            .unwrap_or_default();
        let new_modified = resp
            .headers()
            .get("last-modified")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_default();
        if store.contains(url) {
            store.set_info(url, META_ETAG, &new_etag)?;
            store.set_info(url, META_LAST_MODIFIED, &new_modified)?;
        }
    }
    let body = resp.bytes().await?;
    Ok((status, body.to_vec()))
}

async fn run(args: &Args) -> Result<()> {
    let store = FeedStore::new(&args.store)?;
    let opml = parse_opml(&std::fs::read(&args.opml)?)?;
    info!(
        opml_file = %args.opml,
        store_directory = %args.store,
        feeds = opml.outlines.len(),
        "starting run"
    );

    let mut stats = Stats::default();
    for outline in &opml.outlines {
        let url = outline.url.trim();
        if url.is_empty() {
            continue;
        }
        let (code, data) = match maybe_fetch(&store, url).await {
            Ok(result) => result,
            Err(e) => {
                warn!(url, error = %e, "fetching error");
                continue;
            }
        };
        *stats.http_codes.entry(code).or_default() += 1;
        info!(url, code, bytes = data.len(), "URL fetched");
        if code != 200 {
            continue;
        }

        let feed = match Feed::parse(&data) {
            Ok(feed) => feed,
            Err(e) => {
                stats.parse_errors += 1;
                error!(url, error = %e, "feed parse error");
                continue;
            }
        };
        stats.items += feed.len_items();

        let precount = store.num_items(url);
        if precount == 0 && !store.contains(url) {
            if let Err(e) = store.create_index(url) {
                stats.store_errors += 1;
                error!(url, error = %e, "index creation failed");
                continue;
            }
        }

        // flip to oldest-first for storage
        let mut items: Vec<Item> = feed.items().to_vec();
        items.reverse();
        if let Err(e) = store.update(url, &items) {
            stats.store_errors += 1;
            error!(url, error = %e, items = items.len(), "store update failed");
            continue;
        }
        store.set_info(
            url,
            META_WRAPPER,
            &String::from_utf8_lossy(&feed.wrapper()),
        )?;

        let postcount = store.num_items(url);
        stats.new_items += postcount - precount;
        info!(
            url,
            items = feed.len_items(),
            new_items = postcount - precount,
            "store updated"
        );
    }

    info!(
        parse_errors = stats.parse_errors,
        store_errors = stats.store_errors,
        items_fetched = stats.items,
        new_items_stored = stats.new_items,
        http_codes = ?stats.http_codes,
        "run complete"
    );
    Ok(())
}
