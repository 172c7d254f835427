//! A single feed entry, RSS `<item>` or Atom `<entry>`.
//!
//! Terminology is normalized on the RSS side (items, pubdates). The only
//! thing we ever rewrite is the publication date; everything else rides
//! along as parsed XML.

use chrono::{DateTime, Utc};

use crate::datetime::{format_rfc822, parse_date};
use crate::error::{RecastError, Result};
use crate::xml::{Document, Element};

/// Spellings of the RSS publication date tag seen in the wild.
const RSS_DATE_TAGS: &[&str] = &["pubDate", "pubdate", "PubDate", "PUBDATE"];

/// One archived feed entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Rss(Element),
    Atom(Element),
}

/// Best-effort displayable projection of an item, for previews.
#[derive(Debug, Clone, Default)]
pub struct RenderItem {
    pub pub_date: String,
    pub title: String,
    pub description: String,
    pub guid: String,
    pub url: String,
    pub enclosure: String,
}

impl Item {
    /// Parse a standalone item subtree, dispatching on the root name.
    pub fn parse(bytes: &[u8]) -> Result<Item> {
        let doc = Document::parse(bytes)?;
        Item::from_element(doc.root)
    }

    /// Wrap an already-parsed element.
    pub fn from_element(el: Element) -> Result<Item> {
        match el.local_name() {
            "item" => Ok(Item::Rss(el)),
            "entry" => Ok(Item::Atom(el)),
            other => Err(RecastError::Format(format!(
                "not an item or entry: <{other}>"
            ))),
        }
    }

    pub fn element(&self) -> &Element {
        match self {
            Item::Rss(el) | Item::Atom(el) => el,
        }
    }

    pub fn into_element(self) -> Element {
        match self {
            Item::Rss(el) | Item::Atom(el) => el,
        }
    }

    /// The published date of the item.
    pub fn pub_date(&self) -> Result<DateTime<Utc>> {
        match self {
            Item::Rss(el) => {
                for tag in RSS_DATE_TAGS {
                    if let Some(child) = el.child(tag) {
                        return parse_date(&child.text());
                    }
                }
                Err(RecastError::Format("no pubdate".into()))
            }
            Item::Atom(el) => {
                let child = el
                    .child_local("published")
                    .ok_or_else(|| RecastError::Format("no <published> tag found".into()))?;
                parse_date(&child.text())
            }
        }
    }

    /// Rewrite the published date in place. This is how the rerun happens.
    pub fn set_pub_date(&mut self, date: DateTime<Utc>) -> Result<()> {
        let text = format_rfc822(date);
        match self {
            Item::Rss(el) => {
                for tag in RSS_DATE_TAGS {
                    if let Some(child) = el.child_mut(tag) {
                        child.set_text(&text);
                        return Ok(());
                    }
                }
                Err(RecastError::Format("no pubdate tag".into()))
            }
            Item::Atom(el) => match el.child_local_mut("published") {
                Some(child) => {
                    child.set_text(&text);
                    Ok(())
                }
                None => Err(RecastError::Format("no <published> tag found".into())),
            },
        }
    }

    /// The declared GUID, or one made up from title and link.
    pub fn guid(&self) -> Result<String> {
        match self {
            Item::Rss(el) => {
                if let Some(guid) = el.child("guid") {
                    let text = guid.text();
                    if !text.is_empty() {
                        return Ok(text);
                    }
                }
                let title = el.child("title").map(|t| t.text()).unwrap_or_default();
                let link = el.child("link").map(|l| l.text()).unwrap_or_default();
                if title.is_empty() || link.is_empty() {
                    return Err(RecastError::Guid("can't build a guid".into()));
                }
                Ok(format!("{title} - {link}"))
            }
            Item::Atom(el) => match el.child_local("id") {
                Some(id) => Ok(id.text()),
                None => Err(RecastError::Guid("no <id> tag found".into())),
            },
        }
    }

    /// Canonical serialization of the item subtree.
    pub fn to_xml(&self) -> String {
        self.element().to_xml()
    }

    /// Do our best to get something displayable out of the item.
    pub fn render(&self) -> RenderItem {
        let pub_date = self
            .pub_date()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        match self {
            Item::Rss(el) => {
                let mut title = child_text(el, "title");
                if title.is_empty() {
                    title = child_text(el, "description");
                    if title.chars().count() > 150 {
                        title = title.chars().take(147).collect::<String>() + "...";
                    }
                }
                RenderItem {
                    pub_date,
                    title,
                    description: child_text(el, "description"),
                    guid: child_text(el, "guid"),
                    url: child_text(el, "link"),
                    enclosure: el
                        .child("enclosure")
                        .and_then(|e| e.attr("url"))
                        .unwrap_or_default(),
                }
            }
            Item::Atom(el) => {
                let mut description = child_text(el, "content");
                if description.is_empty() {
                    description = child_text(el, "summary");
                }
                let id = child_text(el, "id");
                let enclosure = el
                    .elements()
                    .filter(|e| e.local_name() == "link")
                    .find(|e| e.attr("rel").as_deref() == Some("enclosure"))
                    .and_then(|e| e.attr("href"))
                    .unwrap_or_default();
                RenderItem {
                    pub_date,
                    title: child_text(el, "title"),
                    description,
                    guid: id.clone(),
                    url: id,
                    enclosure,
                }
            }
        }
    }
}

fn child_text(el: &Element, local: &str) -> String {
    el.child_local(local).map(|c| c.text()).unwrap_or_default()
}
