//! Parsed feed documents: the envelope, the items, and the placeholder
//! trick that lets one wrapper be re-rendered with any item list.
//!
//! On parse, every `<item>`/`<entry>` is detached from the tree and an
//! empty element of the same name is left at the position of the first
//! one. The tree with that single placeholder is the wrapper; rendering
//! clones the wrapper and splices an item list in where the placeholder
//! sits, so channel metadata, namespaces, and unknown tags all survive.

pub mod item;

pub use item::{Item, RenderItem};

use crate::error::{RecastError, Result};
use crate::xml::{Document, Element, Node};

/// Which syndication dialect a feed speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Rss,
    Atom,
}

/// A feed document, split into wrapper and items.
///
/// Items are kept in document order. That isn't necessarily
/// chronological, but we should hope it's most recent first.
#[derive(Debug, Clone)]
pub struct Feed {
    doc: Document,
    kind: FeedKind,
    items: Vec<Item>,
}

impl Feed {
    /// Parse bytes as RSS 2.0 or Atom, dispatching on the root element.
    pub fn parse(bytes: &[u8]) -> Result<Feed> {
        let mut doc = Document::parse(bytes)?;
        match doc.root.local_name() {
            "rss" => {
                let channels = doc
                    .root
                    .elements()
                    .filter(|e| e.local_name() == "channel")
                    .count();
                if channels == 0 {
                    return Err(RecastError::Format("no <channel> tag for RSS feed".into()));
                }
                if channels > 1 {
                    // RSS 2.0 doesn't allow this; no reason to believe it
                    // doesn't exist though
                    return Err(RecastError::Format(
                        "too many <channel> tags for RSS feed".into(),
                    ));
                }
                let channel = doc
                    .root
                    .child_local_mut("channel")
                    .expect("channel presence just checked");
                let mut detached = Vec::new();
                let mut placed = false;
                detach_items(channel, "item", false, &mut detached, &mut placed);
                let items = detached.into_iter().map(Item::Rss).collect();
                Ok(Feed {
                    doc,
                    kind: FeedKind::Rss,
                    items,
                })
            }
            "feed" => {
                let mut detached = Vec::new();
                let mut placed = false;
                detach_items(&mut doc.root, "entry", true, &mut detached, &mut placed);
                let items = detached.into_iter().map(Item::Atom).collect();
                Ok(Feed {
                    doc,
                    kind: FeedKind::Atom,
                    items,
                })
            }
            other => Err(RecastError::Format(format!(
                "<{other}> is neither an RSS nor an Atom feed root"
            ))),
        }
    }

    pub fn kind(&self) -> FeedKind {
        self.kind
    }

    /// Items in document order.
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn len_items(&self) -> usize {
        self.items.len()
    }

    pub fn item(&self, idx: usize) -> &Item {
        &self.items[idx]
    }

    /// Extend the in-memory item list; used by the history walkers.
    pub fn append_items(&mut self, items: Vec<Item>) {
        self.items.extend(items);
    }

    /// The document with a single empty item/entry placeholder and no
    /// content items.
    pub fn wrapper(&self) -> Vec<u8> {
        self.doc.to_xml().into_bytes()
    }

    /// Render the document with `items` in place of the placeholder.
    ///
    /// The feed itself is not touched, so repeated calls with different
    /// item lists all start from the same wrapper.
    pub fn bytes_with_items(&self, items: &[Item]) -> Vec<u8> {
        let mut doc = self.doc.clone();
        let local = match self.kind {
            FeedKind::Rss => "item",
            FeedKind::Atom => "entry",
        };
        let target = match self.kind {
            FeedKind::Rss => doc.root.child_local_mut("channel"),
            FeedKind::Atom => Some(&mut doc.root),
        };
        if let Some(target) = target {
            splice_at_placeholder(target, local, items, self.kind == FeedKind::Atom);
        }
        doc.to_xml().into_bytes()
    }

    /// The channel element (RSS) or the feed root (Atom).
    pub fn container(&self) -> &Element {
        match self.kind {
            FeedKind::Rss => self
                .doc
                .root
                .child_local("channel")
                .expect("RSS feed always has a channel"),
            FeedKind::Atom => &self.doc.root,
        }
    }

    /// The feed generator string, if the envelope declares one.
    pub fn generator(&self) -> Option<String> {
        let gen = self.container().child_local("generator")?;
        let text = gen.text();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// The `<link rel="next">` href under the envelope, if any.
    pub fn rel_next(&self) -> Option<String> {
        self.container()
            .elements()
            .filter(|e| e.local_name() == "link")
            .find(|e| e.attr("rel").as_deref() == Some("next"))
            .and_then(|e| e.attr("href"))
    }

    /// Remove channel-level `new-feed-url` tags so a replayed feed can't
    /// be redirected away by the original publisher.
    pub fn strip_new_feed_url(&mut self) {
        let container = match self.kind {
            FeedKind::Rss => self.doc.root.child_local_mut("channel"),
            FeedKind::Atom => Some(&mut self.doc.root),
        };
        if let Some(container) = container {
            container.children.retain(|n| match n {
                Node::Element(e) => e.local_name() != "new-feed-url",
                _ => true,
            });
        }
    }
}

/// Pull matching elements out of the tree, leaving one placeholder.
///
/// A matching element with no children counts as an existing placeholder
/// (that's what parsing a wrapper looks like) and is left in place
/// instead of becoming an item.
fn detach_items(
    el: &mut Element,
    local: &str,
    recursive: bool,
    items: &mut Vec<Element>,
    placed: &mut bool,
) {
    let old = std::mem::take(&mut el.children);
    let mut kept = Vec::with_capacity(old.len());
    for node in old {
        match node {
            Node::Element(child) if child.local_name() == local => {
                if child.children.is_empty() {
                    if !*placed {
                        *placed = true;
                        kept.push(Node::Element(child));
                    }
                } else {
                    if !*placed {
                        *placed = true;
                        kept.push(Node::Element(placeholder_for(&child)));
                    }
                    items.push(child);
                }
            }
            Node::Element(mut child) => {
                if recursive {
                    detach_items(&mut child, local, true, items, placed);
                }
                kept.push(Node::Element(child));
            }
            other => kept.push(other),
        }
    }
    el.children = kept;
}

/// An empty element with the same qualified name (and namespace
/// declarations) as the first detached item.
fn placeholder_for(first: &Element) -> Element {
    let mut ph = Element::new(first.name.clone());
    for (k, v) in &first.attrs {
        if k == "xmlns" || k.starts_with("xmlns:") {
            ph.attrs.push((k.clone(), v.clone()));
        }
    }
    ph
}

/// Replace the placeholder with the given items. Returns whether a
/// placeholder was found.
fn splice_at_placeholder(el: &mut Element, local: &str, items: &[Item], recursive: bool) -> bool {
    let found = el.children.iter().position(|n| match n {
        Node::Element(e) => e.local_name() == local,
        _ => false,
    });
    if let Some(idx) = found {
        let replacement: Vec<Node> = items
            .iter()
            .map(|it| Node::Element(it.element().clone()))
            .collect();
        el.children.splice(idx..idx + 1, replacement);
        return true;
    }
    if recursive {
        for node in el.children.iter_mut() {
            if let Node::Element(child) = node {
                if splice_at_placeholder(child, local, items, true) {
                    return true;
                }
            }
        }
    }
    false
}
