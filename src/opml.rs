//! OPML subscription lists, as consumed by the bulk fetcher.

use crate::error::{RecastError, Result};
use crate::xml::Element;
use crate::xml::Document;

/// One subscription: display name plus feed URL.
#[derive(Debug, Clone, PartialEq)]
pub struct Outline {
    pub name: String,
    pub url: String,
}

/// A parsed OPML document.
#[derive(Debug, Clone, Default)]
pub struct Opml {
    pub title: String,
    pub outlines: Vec<Outline>,
}

/// Parse an OPML document, keeping every outline that carries both a
/// `text` and an `xmlUrl` attribute.
pub fn parse_opml(bytes: &[u8]) -> Result<Opml> {
    let doc = Document::parse(bytes)?;
    if doc.root.local_name() != "opml" {
        return Err(RecastError::Format(format!(
            "<{}> is not an OPML root",
            doc.root.local_name()
        )));
    }
    let title = doc
        .root
        .child_local("head")
        .and_then(|head| head.child_local("title"))
        .map(|t| t.text())
        .unwrap_or_default();
    let mut outlines = Vec::new();
    collect_outlines(&doc.root, &mut outlines);
    Ok(Opml { title, outlines })
}

fn collect_outlines(el: &Element, out: &mut Vec<Outline>) {
    for child in el.elements() {
        if child.local_name() == "outline" {
            if let (Some(name), Some(url)) = (child.attr("text"), child.attr("xmlUrl")) {
                out.push(Outline { name, url });
            }
        }
        collect_outlines(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<opml version="1.1">
  <head><title>podcasts</title></head>
  <body>
    <outline text="Show A" xmlUrl="http://a.example/rss"/>
    <outline text="group">
      <outline text="Show B" type="rss" xmlUrl="http://b.example/feed.xml"/>
    </outline>
    <outline text="no url here"/>
  </body>
</opml>"#;

    #[test]
    fn test_parse_opml() {
        let opml = parse_opml(SAMPLE.as_bytes()).unwrap();
        assert_eq!(opml.title, "podcasts");
        assert_eq!(opml.outlines.len(), 2);
        assert_eq!(opml.outlines[0].name, "Show A");
        assert_eq!(opml.outlines[0].url, "http://a.example/rss");
        assert_eq!(opml.outlines[1].url, "http://b.example/feed.xml");
    }

    #[test]
    fn test_parse_opml_rejects_other_roots() {
        assert!(parse_opml(b"<rss version=\"2.0\"><channel/></rss>").is_err());
    }
}
