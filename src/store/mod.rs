//! The on-disk feed archive.
//!
//! Feeds we monitor are stored already broken into items so we never
//! parse a document more often than necessary. The layout is plain JSON
//! plus raw XML snippets, one directory per feed:
//!
//! ```text
//! <root>/<hash>/index.json    record: url, count, hash, guids, others, meta
//! <root>/<hash>/offsets.json  item ordinal -> byte offset in its chunk
//! <root>/<hash>/0.xml         items 0-9, oldest first, one per line
//! <root>/<hash>/1.xml         items 10-19
//! ```
//!
//! The directory name is the MD5 of the canonical URL; colliding URLs
//! get a `-k` suffix and a forwarding entry in the collision head's
//! `others` map. Items are append-only and de-duplicated by GUID;
//! metadata may be rewritten freely. index.json and offsets.json are
//! replaced via temp-file-and-rename only after chunk bytes are synced,
//! so a concurrent reader sees the old state or the new one, never a
//! torn file.

pub mod grades;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::error::{RecastError, Result};
use crate::feed::{Feed, Item};
use crate::fetch::http;
use crate::replay::{shifted_at, ReplaySource};
use crate::schedule::DateSource;

/// Items per chunk file.
const CHUNK_SIZE: usize = 10;

/// Reserved metadata keys.
pub const META_WRAPPER: &str = "wrapper";
pub const META_ETAG: &str = "etag";
pub const META_LAST_MODIFIED: &str = "last-modified";
pub const META_GRADE: &str = "grade";

type KeyFn = fn(&str) -> String;
type CanonFn = Arc<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// The per-feed index record, as serialized into `index.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedRecord {
    pub url: String,
    pub count: usize,
    pub hash: String,
    pub guids: Vec<String>,
    #[serde(default)]
    pub others: HashMap<String, String>,
    #[serde(default)]
    pub meta: HashMap<String, String>,
    /// Lives in offsets.json, not index.json.
    #[serde(skip)]
    offsets: HashMap<String, u64>,
}

/// A directory of archived feeds.
pub struct FeedStore {
    root: PathBuf,
    key: KeyFn,
    canon: CanonFn,
}

fn md5_hex(url: &str) -> String {
    hex::encode(Md5::digest(url.as_bytes()))
}

impl FeedStore {
    /// A store rooted at `root`. The directory is created if missing.
    pub fn new(root: impl Into<PathBuf>) -> Result<FeedStore> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(FeedStore {
            root,
            key: md5_hex,
            canon: Arc::new(|url| Ok(http::cached_canonical(url))),
        })
    }

    /// Swap the url-to-directory key function. Tests use this to force
    /// collisions.
    pub fn with_key(mut self, key: KeyFn) -> Self {
        self.key = key;
        self
    }

    /// Swap the canonicalization function.
    pub fn with_canon<F>(mut self, canon: F) -> Self
    where
        F: Fn(&str) -> Result<String> + Send + Sync + 'static,
    {
        self.canon = Arc::new(canon);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, hash: &str) -> PathBuf {
        self.root.join(hash)
    }

    fn index_path(&self, hash: &str) -> PathBuf {
        self.dir(hash).join("index.json")
    }

    fn offsets_path(&self, hash: &str) -> PathBuf {
        self.dir(hash).join("offsets.json")
    }

    fn chunk_path(&self, hash: &str, ordinal: usize) -> PathBuf {
        self.dir(hash).join(format!("{}.xml", ordinal / CHUNK_SIZE))
    }

    fn canonicalize(&self, url: &str) -> Result<String> {
        (self.canon)(url)
    }

    /// Load the record stored under a directory hash.
    fn record_for_hash(&self, hash: &str) -> Result<FeedRecord> {
        let index = match fs::read(self.index_path(hash)) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RecastError::NotFound(format!("record {hash}")));
            }
            Err(e) => return Err(e.into()),
        };
        let mut record: FeedRecord = serde_json::from_slice(&index)?;
        let offsets = fs::read(self.offsets_path(hash))?;
        record.offsets = serde_json::from_slice(&offsets)?;
        Ok(record)
    }

    /// Load the record for an already-canonical URL, following a
    /// collision-head forward if needed.
    fn record_for_canonical(&self, url: &str) -> Result<FeedRecord> {
        let record = self.record_for_hash(&(self.key)(url))?;
        if record.url == url {
            return Ok(record);
        }
        match record.others.get(url) {
            Some(hash) => self.record_for_hash(hash),
            None => Err(RecastError::NotFound(url.to_string())),
        }
    }

    fn record_for(&self, url: &str) -> Result<FeedRecord> {
        let url = self.canonicalize(url)?;
        self.record_for_canonical(&url)
    }

    /// Is this URL archived?
    pub fn contains(&self, url: &str) -> bool {
        self.record_for(url).is_ok()
    }

    /// The URLs of every archived feed.
    pub fn list(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut urls = Vec::new();
        for entry in entries.flatten() {
            let Some(hash) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            if let Ok(record) = self.record_for_hash(&hash) {
                urls.push(record.url);
            }
        }
        urls
    }

    /// Create the index for a new feed. Errors if the canonical URL is
    /// already archived.
    pub fn create_index(&self, url: &str) -> Result<FeedRecord> {
        let url = self.canonicalize(url)?;
        if self.record_for_canonical(&url).is_ok() {
            return Err(RecastError::Conflict(format!(
                "index already exists for {url}"
            )));
        }

        let hash = (self.key)(&url);
        let mut record = FeedRecord {
            url: url.clone(),
            ..FeedRecord::default()
        };
        match self.record_for_hash(&hash) {
            Ok(mut head) => {
                // the primary hash is taken; suffix ours and register
                // the forward on the collision head
                record.hash = format!("{}-{}", head.hash, head.others.len());
                head.others.insert(url, record.hash.clone());
                self.save_record(&head)?;
            }
            Err(_) => record.hash = hash,
        }
        fs::create_dir_all(self.dir(&record.hash))?;
        self.save_record(&record)?;
        Ok(record)
    }

    /// Items `[start, end)` for a feed, oldest first.
    pub fn get(&self, url: &str, start: usize, end: usize) -> Result<Vec<Item>> {
        let record = self.record_for(url)?;
        self.get_range(&record, start, end)
    }

    fn get_range(&self, record: &FeedRecord, start: usize, end: usize) -> Result<Vec<Item>> {
        if end <= start || end > record.count {
            return Err(RecastError::NotFound(format!(
                "invalid range {start}..{end} of {}",
                record.count
            )));
        }

        let mut out = Vec::with_capacity(end - start);
        let mut loaded: Option<(usize, Vec<u8>)> = None;
        for i in start..end {
            let chunk_no = i / CHUNK_SIZE;
            if loaded.as_ref().map(|(n, _)| *n) != Some(chunk_no) {
                loaded = Some((chunk_no, fs::read(self.chunk_path(&record.hash, i))?));
            }
            let (_, ftxt) = loaded.as_ref().expect("chunk just loaded");

            let start_byte = *record
                .offsets
                .get(&i.to_string())
                .ok_or_else(|| RecastError::Format(format!("offset table missing item {i}")))?
                as usize;
            // a zero (or absent) next offset means item i runs to the
            // end of its chunk file
            let end_byte = match record.offsets.get(&(i + 1).to_string()) {
                Some(&b) if b > 0 => b as usize,
                _ => ftxt.len(),
            };
            if end_byte > ftxt.len() || start_byte >= end_byte {
                return Err(RecastError::Format(format!(
                    "offset table inconsistent with chunk file at item {i}"
                )));
            }
            // drop the newline appended when the item was stored
            out.push(Item::parse(&ftxt[start_byte..end_byte - 1])?);
        }
        Ok(out)
    }

    /// How many items are archived for a URL (0 if it isn't).
    pub fn num_items(&self, url: &str) -> usize {
        self.record_for(url).map(|r| r.count).unwrap_or(0)
    }

    /// Append items to a feed's archive. Items must be passed oldest
    /// first; anything whose GUID is already stored is skipped.
    pub fn update(&self, url: &str, items: &[Item]) -> Result<()> {
        let mut record = self.record_for(url)?;
        let mut guid_set: HashSet<String> = record.guids.iter().cloned().collect();
        let mut last_ordinal: i64 = record.count as i64 - 1;

        let mut chunk: Option<fs::File> = None;
        let mut position: u64 = 0;
        if record.count > 0 {
            let path = self.chunk_path(&record.hash, record.count - 1);
            let file = fs::OpenOptions::new().append(true).create(true).open(path)?;
            position = file.metadata()?.len();
            chunk = Some(file);
        }

        for item in items {
            let guid = item.guid()?;
            if !guid_set.insert(guid.clone()) {
                continue;
            }

            last_ordinal += 1;
            if (last_ordinal as usize) % CHUNK_SIZE == 0 {
                if let Some(file) = chunk.take() {
                    file.sync_all()?;
                }
                chunk = Some(fs::File::create(
                    self.chunk_path(&record.hash, last_ordinal as usize),
                )?);
                position = 0;
            }

            let payload = format!("{}\n", item.to_xml());
            chunk
                .as_mut()
                .expect("chunk file open before first write")
                .write_all(payload.as_bytes())?;
            record.guids.push(guid);
            record.offsets.insert(last_ordinal.to_string(), position);
            position += payload.len() as u64;
        }

        if let Some(file) = chunk {
            file.sync_all()?;
        }
        record.count = (last_ordinal + 1) as usize;
        self.save_record(&record)
    }

    /// Read a metadata value; an unset key reads as empty.
    pub fn get_info(&self, url: &str, key: &str) -> Result<String> {
        let record = self.record_for(url)?;
        Ok(record.meta.get(key).cloned().unwrap_or_default())
    }

    /// Write a metadata value.
    pub fn set_info(&self, url: &str, key: &str, value: &str) -> Result<()> {
        let mut record = self.record_for(url)?;
        record.meta.insert(key.to_string(), value.to_string());
        self.save_record(&record)
    }

    /// A feed view over the archive, rendering the stored wrapper.
    pub fn feed_for(&self, url: &str) -> Result<StoredFeed<'_>> {
        let record = self.record_for(url)?;
        let wrapper = record.meta.get(META_WRAPPER).cloned().unwrap_or_default();
        if wrapper.is_empty() {
            return Err(RecastError::NotFound(format!("wrapper metadata for {url}")));
        }
        let feed = Feed::parse(wrapper.as_bytes())?;
        Ok(StoredFeed {
            feed,
            record,
            store: self,
        })
    }

    fn save_record(&self, record: &FeedRecord) -> Result<()> {
        write_atomic(
            &self.index_path(&record.hash),
            &serde_json::to_vec(record)?,
        )?;
        write_atomic(
            &self.offsets_path(&record.hash),
            &serde_json::to_vec(&record.offsets)?,
        )
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// A read-only feed backed by the store: the archived wrapper plus
/// items loaded from chunk files on demand.
pub struct StoredFeed<'a> {
    feed: Feed,
    record: FeedRecord,
    store: &'a FeedStore,
}

impl StoredFeed<'_> {
    pub fn feed(&self) -> &Feed {
        &self.feed
    }

    pub fn feed_mut(&mut self) -> &mut Feed {
        &mut self.feed
    }

    pub fn wrapper(&self) -> Vec<u8> {
        self.feed.wrapper()
    }

    pub fn bytes_with_items(&self, items: &[Item]) -> Vec<u8> {
        self.feed.bytes_with_items(items)
    }

    /// The replay window at day `t`: up to `n` items, re-dated.
    pub fn shifted_at(&self, n: usize, t: NaiveDate, ds: &mut DateSource) -> Result<Vec<Item>> {
        shifted_at(n, t, self, ds)
    }
}

impl ReplaySource for StoredFeed<'_> {
    fn len_items(&self) -> usize {
        self.record.count
    }

    fn item_at(&self, idx: usize) -> Result<Item> {
        let mut items = self.store.get_range(&self.record, idx, idx + 1)?;
        Ok(items.remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn empty_store() -> (TempDir, FeedStore) {
        let dir = TempDir::new().unwrap();
        let store = FeedStore::new(dir.path().join("store")).unwrap();
        (dir, store)
    }

    /// `n` items oldest first, guids 1..=n, weekly pubdates.
    fn make_items(n: usize) -> Vec<Item> {
        let mut body = String::from("<rss version=\"2.0\"><channel><title>foo</title>\n");
        for i in (1..=n).rev() {
            body.push_str(&format!(
                "<item><title>post number {i}</title>\
                 <guid>{i}</guid>\
                 <description>originally published week {i}</description></item>\n"
            ));
        }
        body.push_str("</channel></rss>");
        let feed = Feed::parse(body.as_bytes()).unwrap();
        let mut items = feed.items().to_vec();
        items.reverse();
        items
    }

    #[test]
    fn test_store_and_count() {
        let (_dir, store) = empty_store();
        let url = "test://testurl.whatever";
        assert_eq!(store.num_items(url), 0);
        store.create_index(url).unwrap();
        store.update(url, &make_items(15)).unwrap();
        assert_eq!(store.num_items(url), 15);
    }

    #[test]
    fn test_create_index_twice_conflicts() {
        let (_dir, store) = empty_store();
        store.create_index("test://a").unwrap();
        assert!(matches!(
            store.create_index("test://a"),
            Err(RecastError::Conflict(_))
        ));
    }

    #[test]
    fn test_round_trip_guids() {
        let (_dir, store) = empty_store();
        let url = "test://testurl.whatevs";
        let items = make_items(25);
        store.create_index(url).unwrap();
        store.update(url, &items).unwrap();

        for start in 0..25 {
            for end in (start + 1)..=25 {
                let got = store.get(url, start, end).unwrap();
                assert_eq!(got.len(), end - start);
                for (offset, item) in got.iter().enumerate() {
                    assert_eq!(
                        item.guid().unwrap(),
                        items[start + offset].guid().unwrap(),
                        "mismatch at [{start}, {end}) + {offset}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_chunk_files_on_disk() {
        let (_dir, store) = empty_store();
        let url = "test://chunks";
        let record = store.create_index(url).unwrap();
        store.update(url, &make_items(25)).unwrap();

        for chunk in ["0.xml", "1.xml", "2.xml"] {
            assert!(store.dir(&record.hash).join(chunk).exists(), "{chunk}");
        }
        assert!(!store.dir(&record.hash).join("3.xml").exists());
        let tail = fs::read_to_string(store.dir(&record.hash).join("2.xml")).unwrap();
        assert_eq!(tail.lines().count(), 5);
    }

    #[test]
    fn test_update_extends_and_dedupes() {
        let (_dir, store) = empty_store();
        let url = "test://testurl.whatevs";
        let items = make_items(30);
        store.create_index(url).unwrap();
        store.update(url, &items[..22]).unwrap();
        store.update(url, &items[..25]).unwrap();
        store.update(url, &items).unwrap();
        assert_eq!(store.num_items(url), 30);

        let got = store.get(url, 0, 30).unwrap();
        for (i, item) in got.iter().enumerate() {
            assert_eq!(item.guid().unwrap(), items[i].guid().unwrap());
        }
        let tail = store.get(url, 3, 30).unwrap();
        assert_eq!(tail.len(), 27);
        assert_eq!(tail[0].guid().unwrap(), items[3].guid().unwrap());
    }

    #[test]
    fn test_update_is_idempotent() {
        let (_dir, store) = empty_store();
        let url = "test://idempotent";
        let items = make_items(12);
        store.create_index(url).unwrap();
        store.update(url, &items).unwrap();
        let record_once = store.record_for(url).unwrap();
        store.update(url, &items).unwrap();
        let record_twice = store.record_for(url).unwrap();
        assert_eq!(record_once.count, record_twice.count);
        assert_eq!(record_once.guids, record_twice.guids);
        assert_eq!(record_once.offsets, record_twice.offsets);
    }

    #[test]
    fn test_get_invalid_ranges() {
        let (_dir, store) = empty_store();
        let url = "test://ranges";
        store.create_index(url).unwrap();
        store.update(url, &make_items(5)).unwrap();
        assert!(store.get(url, 3, 3).is_err());
        assert!(store.get(url, 4, 2).is_err());
        assert!(store.get(url, 0, 6).is_err());
        assert!(store.get(url, 0, 5).is_ok());
    }

    #[test]
    fn test_hash_collisions() {
        let (_dir, store) = empty_store();
        let store = store.with_key(|_| "hashed".to_string());
        let url = "test://testurl.whatevs";
        let aggressor = "test://break.stuff";
        store.create_index(url).unwrap();
        let second = store.create_index(aggressor).unwrap();
        assert_eq!(second.hash, "hashed-0");

        let head = store.record_for_hash("hashed").unwrap();
        assert_eq!(head.others.get(aggressor).unwrap(), "hashed-0");

        store.update(aggressor, &make_items(5)).unwrap();
        store.update(url, &make_items(3)).unwrap();
        assert_eq!(store.num_items(url), 3);
        assert_eq!(store.num_items(aggressor), 5);
    }

    #[test]
    fn test_meta_values() {
        let (_dir, store) = empty_store();
        let url = "test://meta";
        store.create_index(url).unwrap();
        assert_eq!(store.get_info(url, "foo").unwrap(), "");
        store.set_info(url, "bar", "baz").unwrap();
        assert_eq!(store.get_info(url, "foo").unwrap(), "");
        assert_eq!(store.get_info(url, "bar").unwrap(), "baz");
        store.set_info(url, "bar", "quux").unwrap();
        assert_eq!(store.get_info(url, "bar").unwrap(), "quux");
    }

    #[test]
    fn test_items_without_declared_guids() {
        let (_dir, store) = empty_store();
        let url = "test://noguid";
        let mut body = String::from("<rss version=\"2.0\"><channel><title>t</title>");
        for i in (1..=12).rev() {
            body.push_str(&format!(
                "<item><title>post {i}</title><link>http://x/{i}</link></item>"
            ));
        }
        body.push_str("</channel></rss>");
        let feed = Feed::parse(body.as_bytes()).unwrap();
        let mut items = feed.items().to_vec();
        items.reverse();

        store.create_index(url).unwrap();
        store.update(url, &items).unwrap();
        assert_eq!(store.num_items(url), 12);
    }

    #[test]
    fn test_update_rejects_unusable_items() {
        let (_dir, store) = empty_store();
        let url = "test://badguid";
        store.create_index(url).unwrap();
        let feed = Feed::parse(
            b"<rss version=\"2.0\"><channel><title>t</title>\
              <item><title>title but no link</title></item></channel></rss>",
        )
        .unwrap();
        assert!(matches!(
            store.update(url, feed.items()),
            Err(RecastError::Guid(_))
        ));
    }

    #[test]
    fn test_contains_and_list() {
        let (_dir, store) = empty_store();
        store.create_index("test://one").unwrap();
        store.create_index("test://two").unwrap();
        assert!(store.contains("test://one"));
        assert!(!store.contains("test://three"));
        let mut urls = store.list();
        urls.sort();
        assert_eq!(urls, vec!["test://one", "test://two"]);
    }

    #[test]
    fn test_index_json_shape() {
        let (_dir, store) = empty_store();
        let url = "test://shape";
        let record = store.create_index(url).unwrap();
        store.update(url, &make_items(3)).unwrap();
        store.set_info(url, META_GRADE, "auto-trusted").unwrap();

        let raw = fs::read(store.index_path(&record.hash)).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(parsed["url"], url);
        assert_eq!(parsed["count"], 3);
        assert_eq!(parsed["hash"], record.hash);
        assert_eq!(parsed["guids"].as_array().unwrap().len(), 3);
        assert!(parsed["others"].is_object());
        assert_eq!(parsed["meta"]["grade"], "auto-trusted");

        let raw = fs::read(store.offsets_path(&record.hash)).unwrap();
        let offsets: HashMap<String, u64> = serde_json::from_slice(&raw).unwrap();
        assert_eq!(offsets.len(), 3);
        assert_eq!(offsets["0"], 0);
    }

    #[test]
    fn test_stored_feed_replay() {
        use chrono::Weekday;

        let (_dir, store) = empty_store();
        let url = "test://replay";
        store.create_index(url).unwrap();
        let items = make_items(10);
        store.update(url, &items).unwrap();
        let wrapper = "<rss version=\"2.0\"><channel><title>foo</title>\
                       <item/></channel></rss>";
        store.set_info(url, META_WRAPPER, wrapper).unwrap();

        let stored = store.feed_for(url).unwrap();
        assert_eq!(ReplaySource::len_items(&stored), 10);

        let start = NaiveDate::from_ymd_opt(2015, 3, 19).unwrap();
        let mut ds = DateSource::new(start, vec![Weekday::Sun, Weekday::Tue]);
        let t = start + chrono::Days::new(100);
        let shifted = stored.shifted_at(5, t, &mut ds).unwrap();
        assert_eq!(shifted.len(), 5);
        // newest first: guids 10 down to 6
        let guids: Vec<String> = shifted.iter().map(|it| it.guid().unwrap()).collect();
        assert_eq!(guids, vec!["10", "9", "8", "7", "6"]);

        let rendered = stored.bytes_with_items(&shifted);
        let reparsed = Feed::parse(&rendered).unwrap();
        assert_eq!(reparsed.len_items(), 5);
    }
}
