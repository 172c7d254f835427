//! A small owned XML tree.
//!
//! Feed surgery needs structural edits quick-xml's event stream can't give
//! us directly: detach every `<item>`, leave a placeholder, splice a
//! different item list back in at render time. This module parses events
//! into an owned element tree and serializes it back out.
//!
//! Fidelity rules: text, CDATA, and attribute values are kept in their
//! escaped source form and re-emitted verbatim, so entities, namespace
//! declarations, and channel metadata we know nothing about survive a
//! round trip. Accessors unescape on read.

use quick_xml::escape::{escape, unescape};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{RecastError, Result};

/// One node in the tree. Text and CData hold raw (escaped) source bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction(String),
}

/// An element with its qualified name, attributes in document order
/// (values raw), and children.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// The name without any namespace prefix.
    pub fn local_name(&self) -> &str {
        match self.name.rfind(':') {
            Some(idx) => &self.name[idx + 1..],
            None => &self.name,
        }
    }

    /// Unescaped value of the named attribute.
    pub fn attr(&self, name: &str) -> Option<String> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| unescape(v).map(|c| c.into_owned()).unwrap_or_else(|_| v.clone()))
    }

    pub fn set_attr(&mut self, name: &str, value: &str) {
        let escaped = escape(value).into_owned();
        if let Some(entry) = self.attrs.iter_mut().find(|(k, _)| k == name) {
            entry.1 = escaped;
        } else {
            self.attrs.push((name.to_string(), escaped));
        }
    }

    /// Child elements in document order.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    /// First child element with this exact qualified name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find_map(|n| match n {
            Node::Element(e) if e.name == name => Some(e),
            _ => None,
        })
    }

    /// First child element with this local name, any prefix.
    pub fn child_local(&self, local: &str) -> Option<&Element> {
        self.elements().find(|e| e.local_name() == local)
    }

    pub fn child_local_mut(&mut self, local: &str) -> Option<&mut Element> {
        self.children.iter_mut().find_map(|n| match n {
            Node::Element(e) if e.local_name() == local => Some(e),
            _ => None,
        })
    }

    /// Concatenated, unescaped text content of direct children.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            match child {
                Node::Text(raw) => {
                    out.push_str(&unescape(raw).map(|c| c.into_owned()).unwrap_or_else(|_| raw.clone()))
                }
                Node::CData(raw) => out.push_str(raw),
                _ => {}
            }
        }
        out
    }

    /// Replace all children with a single text node.
    pub fn set_text(&mut self, text: &str) {
        self.children = vec![Node::Text(escape(text).into_owned())];
    }

    pub fn push(&mut self, node: Node) {
        self.children.push(node);
    }

    /// Serialize this element's subtree.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write(&mut out);
        out
    }

    fn write(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (k, v) in &self.attrs {
            out.push(' ');
            out.push_str(k);
            out.push_str("=\"");
            out.push_str(v);
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            match child {
                Node::Element(e) => e.write(out),
                Node::Text(raw) => out.push_str(raw),
                Node::CData(raw) => {
                    out.push_str("<![CDATA[");
                    out.push_str(raw);
                    out.push_str("]]>");
                }
                Node::Comment(raw) => {
                    out.push_str("<!--");
                    out.push_str(raw);
                    out.push_str("-->");
                }
                Node::ProcessingInstruction(raw) => {
                    out.push_str("<?");
                    out.push_str(raw);
                    out.push_str("?>");
                }
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

/// A parsed document: everything before the root element, kept raw, plus
/// the root.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub prolog: Vec<String>,
    pub root: Element,
}

impl Document {
    /// Parse a byte buffer into a document tree.
    pub fn parse(bytes: &[u8]) -> Result<Document> {
        let mut reader = Reader::from_reader(bytes);
        let mut buf = Vec::new();
        let mut prolog = Vec::new();
        // Stack of open elements; the completed root lands in `root`.
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|e| RecastError::Format(format!("XML parse error: {e}")))?;
            match event {
                Event::Start(e) => {
                    stack.push(element_from_start(&e)?);
                }
                Event::Empty(e) => {
                    let el = element_from_start(&e)?;
                    if stack.is_empty() {
                        if root.is_none() {
                            root = Some(el);
                        }
                    } else {
                        attach(&mut stack, Node::Element(el));
                    }
                }
                Event::End(_) => {
                    let el = stack
                        .pop()
                        .ok_or_else(|| RecastError::Format("unbalanced end tag".into()))?;
                    if stack.is_empty() {
                        if root.is_none() {
                            root = Some(el);
                        }
                    } else {
                        attach(&mut stack, Node::Element(el));
                    }
                }
                Event::Text(t) => {
                    if !stack.is_empty() {
                        let raw = String::from_utf8_lossy(&t).into_owned();
                        attach(&mut stack, Node::Text(raw));
                    }
                }
                Event::CData(t) => {
                    let raw = String::from_utf8_lossy(&t).into_owned();
                    attach(&mut stack, Node::CData(raw));
                }
                Event::Comment(t) => {
                    let raw = String::from_utf8_lossy(&t).into_owned();
                    if stack.is_empty() && root.is_none() {
                        prolog.push(format!("<!--{raw}-->"));
                    } else if !stack.is_empty() {
                        attach(&mut stack, Node::Comment(raw));
                    }
                }
                Event::Decl(d) => {
                    let mut decl = String::from("<?xml");
                    if let Ok(version) = d.version() {
                        decl.push_str(&format!(" version=\"{}\"", String::from_utf8_lossy(&version)));
                    }
                    if let Some(Ok(encoding)) = d.encoding() {
                        decl.push_str(&format!(" encoding=\"{}\"", String::from_utf8_lossy(&encoding)));
                    }
                    if let Some(Ok(standalone)) = d.standalone() {
                        decl.push_str(&format!(
                            " standalone=\"{}\"",
                            String::from_utf8_lossy(&standalone)
                        ));
                    }
                    decl.push_str("?>");
                    prolog.push(decl);
                }
                Event::PI(p) => {
                    let raw = String::from_utf8_lossy(&p).into_owned();
                    if stack.is_empty() && root.is_none() {
                        prolog.push(format!("<?{raw}?>"));
                    } else if !stack.is_empty() {
                        attach(&mut stack, Node::ProcessingInstruction(raw));
                    }
                }
                Event::DocType(t) => {
                    prolog.push(format!("<!DOCTYPE {}>", String::from_utf8_lossy(&t)));
                }
                Event::Eof => break,
            }
            buf.clear();
        }

        match root {
            Some(root) => Ok(Document { prolog, root }),
            None => Err(RecastError::Format("document has no root element".into())),
        }
    }

    /// Serialize the whole document.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        for entry in &self.prolog {
            out.push_str(entry);
            out.push('\n');
        }
        out.push_str(&self.root.to_xml());
        out
    }
}

fn element_from_start(e: &quick_xml::events::BytesStart<'_>) -> Result<Element> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut el = Element::new(name);
    for attr in e.attributes() {
        let attr = attr.map_err(|e| RecastError::Format(format!("bad attribute: {e}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = String::from_utf8_lossy(&attr.value).into_owned();
        el.attrs.push((key, value));
    }
    Ok(el)
}

fn attach(stack: &mut [Element], node: Node) {
    if let Some(top) = stack.last_mut() {
        top.children.push(node);
    }
}
