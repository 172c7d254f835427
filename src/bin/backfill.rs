//! Detect and run the history fetcher for one or more feed URLs.

use clap::Parser;
use tracing::{info, warn};

use recast::config::LoggingConfig;
use recast::{select_fetcher, Fetcher, Item, Result};

#[derive(Parser, Debug)]
#[command(name = "recast-backfill", about = "Rebuild full feed histories")]
struct Args {
    /// Target URL.
    #[arg(long)]
    url: Option<String>,
    /// File with URLs to fetch, one per line.
    #[arg(long)]
    file: Option<String>,
    /// If the only option is the web archive, use it.
    #[arg(long)]
    from_archive: bool,
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

    let mut urls = Vec::new();
    if let Some(file) = &args.file {
        match read_urls(file) {
            Ok(mut from_file) => urls.append(&mut from_file),
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        }
    }
    if let Some(url) = &args.url {
        urls.push(url.clone());
    }
    if urls.is_empty() {
        eprintln!("pass --url or --file");
        std::process::exit(1);
    }

    for url in &urls {
        let detection = match select_fetcher(url).await {
            Ok(detection) => detection,
            Err(e) => {
                warn!(url, error = %e, "error detecting feed fetcher");
                continue;
            }
        };
        info!(
            url,
            fetcher = detection.fetcher.name(),
            trusted = detection.trusted,
            "feed detected"
        );
        if detection.fetcher == Fetcher::Wayback && !args.from_archive {
            info!(url, "not fetching from the archive without --from-archive");
            continue;
        }

        let feed = match detection.fetcher.run(&detection.url).await {
            Ok(feed) => feed,
            Err(e) => {
                warn!(url, error = %e, "error building feed");
                continue;
            }
        };
        let n_items = feed.len_items();
        if n_items == 0 {
            warn!(url, "feed parsed into 0 items");
        } else {
            info!(
                url,
                n_items,
                oldest = title_or_guid(feed.item(n_items - 1)),
                recent = title_or_guid(feed.item(0)),
                "feed rebuilt"
            );
        }
    }
}

fn title_or_guid(item: &Item) -> String {
    let rendered = item.render();
    if !rendered.title.is_empty() {
        return rendered.title;
    }
    item.guid()
        .unwrap_or_else(|_| "no detected title or GUID".to_string())
}

fn read_urls(path: &str) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}
