//! Minimal XML writer and reader helpers for the wire text format
//!
//! Documents are written without indentation or whitespace between
//! elements, and empty elements are written with a full end tag
//! (`<Parameter></Parameter>`), so output is byte-for-byte deterministic.

use crate::{Error, Result};
use roxmltree::Node;

/// Declaration prefixing every wire document
pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;

/// Append-only XML text builder
#[derive(Debug, Default)]
pub struct XmlWriter {
    buf: String,
}

impl XmlWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a document with the XML declaration
    pub fn document() -> Self {
        Self {
            buf: XML_DECLARATION.to_string(),
        }
    }

    pub fn start_element(&mut self, name: &str) -> &mut Self {
        self.buf.push('<');
        self.buf.push_str(name);
        self.buf.push('>');
        self
    }

    pub fn end_element(&mut self, name: &str) -> &mut Self {
        self.buf.push_str("</");
        self.buf.push_str(name);
        self.buf.push('>');
        self
    }

    /// Write escaped character data
    pub fn text(&mut self, text: &str) -> &mut Self {
        escape_into(text, &mut self.buf);
        self
    }

    /// Write `<name>text</name>`
    pub fn element(&mut self, name: &str, text: &str) -> &mut Self {
        self.start_element(name).text(text).end_element(name)
    }

    /// Write `<name></name>`
    pub fn empty_element(&mut self, name: &str) -> &mut Self {
        self.start_element(name).end_element(name)
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn into_string(self) -> String {
        self.buf
    }
}

/// Escape reserved characters for element content.
///
/// Carriage returns are written as character references so they survive
/// the line-ending normalisation every conforming parser applies.
pub fn escape_into(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

/// Child elements of `node`, skipping text, comments and whitespace
pub fn child_elements<'a, 'input>(
    node: Node<'a, 'input>,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

/// The single child element named `name`, if present
pub fn find_child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    child_elements(node).find(|n| n.has_tag_name(name))
}

/// The single child element named `name`, failing when absent
pub fn required_child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Result<Node<'a, 'input>> {
    find_child(node, name).ok_or_else(|| {
        Error::protocol(
            format!(
                "Element '{}' does not contain a '{}' element.",
                node.tag_name().name(),
                name
            ),
            Some(name.to_string()),
            None,
        )
    })
}

/// Concatenated character data directly inside `node`
pub fn text_content(node: Node<'_, '_>) -> String {
    node.children()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect()
}
