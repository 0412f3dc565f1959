//! Minimal XML element tree
//!
//! Libvirt describes pools, networks, domains and capabilities as small XML
//! documents. They are parsed into an owned tree with `quick-xml` and queried
//! with slash-separated paths; machine definitions are built the same way and
//! serialized back.

use crate::error::{Error, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// An owned XML element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    pub text: String,
}

impl XmlElement {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Parse a document and return its root element
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            match reader.read_event()? {
                Event::Start(ref e) => stack.push(element_from(e)?),
                Event::Empty(ref e) => {
                    let element = element_from(e)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(e) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&e.unescape()?);
                    }
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| Error::Xml("unbalanced closing tag".into()))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(Error::Xml(format!("unclosed element <{}>", stack[0].name)));
        }
        root.ok_or_else(|| Error::Xml("empty document".into()))
    }

    // =========================================================================
    // Builders
    // =========================================================================

    pub fn with_attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(child);
        self
    }

    pub fn set_attr(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key.to_string(), value)),
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut XmlElement> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    pub fn children<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// First element at a slash-separated path below this one
    pub fn find(&self, path: &str) -> Option<&XmlElement> {
        path.split('/')
            .filter(|s| !s.is_empty())
            .try_fold(self, |node, segment| node.child(segment))
    }

    /// All elements at a slash-separated path below this one
    pub fn find_all(&self, path: &str) -> Vec<&XmlElement> {
        let mut current = vec![self];
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = current
                .into_iter()
                .flat_map(|node| node.children.iter().filter(|c| c.name == segment))
                .collect();
        }
        current
    }

    /// Trimmed text content at a path, if non-empty
    pub fn text_at(&self, path: &str) -> Option<&str> {
        self.find(path)
            .map(|e| e.text.trim())
            .filter(|t| !t.is_empty())
    }

    // =========================================================================
    // Serialization
    // =========================================================================

    /// Serialize with two-space indentation
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_into(&mut out, 0);
        out
    }

    fn write_into(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        out.push_str(&indent);
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attributes {
            out.push_str(&format!(" {}=\"{}\"", key, quick_xml::escape::escape(value)));
        }

        if self.children.is_empty() && self.text.is_empty() {
            out.push_str("/>\n");
            return;
        }
        out.push('>');
        if self.children.is_empty() {
            out.push_str(&quick_xml::escape::escape(&self.text));
        } else {
            out.push('\n');
            for child in &self.children {
                child.write_into(out, depth + 1);
            }
            out.push_str(&indent);
        }
        out.push_str(&format!("</{}>\n", self.name));
    }
}

fn element_from(start: &BytesStart<'_>) -> Result<XmlElement> {
    let mut element = XmlElement::new(&String::from_utf8_lossy(start.name().as_ref()));
    for attr in start.attributes() {
        let attr = attr.map_err(|e| Error::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(Error::Xml("multiple root elements".into())),
    }
    Ok(())
}
