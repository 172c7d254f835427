//! recast - rebuild the full history of a syndication feed and replay
//! it on a weekday schedule.
//!
//! Three subsystems do the work: the fetchers walk paginated feed
//! endpoints or web-archive mementos to reconstruct a feed's complete
//! item history; the store archives those items chunked and indexed on
//! disk, de-duplicated by GUID; and the projector maps archived items
//! onto a replay schedule and renders them back out as a well-formed
//! feed with rewritten publication dates.

pub mod config;
pub mod datetime;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod logging;
pub mod memento;
pub mod opml;
pub mod replay;
pub mod schedule;
pub mod store;
pub mod xml;

pub use config::Config;
pub use error::{RecastError, Result};
pub use feed::{Feed, FeedKind, Item, RenderItem};
pub use fetch::{select_fetcher, Detection, Fetcher};
pub use memento::{spider_timemap, Memento, TimeMap};
pub use opml::{parse_opml, Opml, Outline};
pub use replay::{shifted_at, ReplaySource};
pub use schedule::DateSource;
pub use store::{FeedRecord, FeedStore, StoredFeed};
