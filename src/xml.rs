use std::io::Write;

use anyhow::{anyhow, bail, Context, Result};
use quick_xml::{
    events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event},
    Reader, Writer,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
    CData(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(key, value);
        self
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        self.children.push(Node::Text(text.into()));
    }

    pub fn local_name(&self) -> &str {
        local_name(&self.name)
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            _ => None,
        })
    }

    pub fn find(&self, name: &str) -> Option<&Element> {
        self.child_elements().find(|el| el.name == name)
    }

    pub fn find_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.child_elements().filter(move |el| el.name == name)
    }

    /// Concatenated direct text and CDATA content.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            match node {
                Node::Text(t) | Node::CData(t) => out.push_str(t),
                Node::Element(_) => {}
            }
        }
        out
    }

    pub fn has_text(&self) -> bool {
        self.children.iter().any(|node| match node {
            Node::Text(t) | Node::CData(t) => !t.trim().is_empty(),
            Node::Element(_) => false,
        })
    }
}

pub fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map(|(_, local)| local).unwrap_or(name)
}

/// Parses a complete document and returns its root element. Comments,
/// processing instructions and the doctype are discarded, as are
/// whitespace-only text nodes of elements without character content.
/// Mixed content keeps its whitespace.
pub fn parse(text: &str) -> Result<Element> {
    let mut reader = Reader::from_str(text);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => bail!("{} (position {})", e, reader.buffer_position()),
        };
        match event {
            Event::Start(e) => {
                if root.is_some() && stack.is_empty() {
                    bail!(
                        "Extra content at the end of the document (position {})",
                        reader.buffer_position()
                    );
                }
                stack.push(element_from_start(&e)?);
            }
            Event::Empty(e) => {
                let el = element_from_start(&e)?;
                attach(&mut stack, &mut root, el, reader.buffer_position())?;
            }
            Event::End(_) => {
                let mut el = stack.pop().ok_or_else(|| {
                    anyhow!(
                        "Unexpected closing tag (position {})",
                        reader.buffer_position()
                    )
                })?;
                drop_blank_text(&mut el);
                attach(&mut stack, &mut root, el, reader.buffer_position())?;
            }
            Event::Text(e) => {
                let text = e
                    .unescape()
                    .with_context(|| format!("Invalid text (position {})", reader.buffer_position()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(Node::Text(text.into_owned())),
                    None if text.trim().is_empty() => {}
                    None => bail!(
                        "Content is not allowed outside the root element (position {})",
                        reader.buffer_position()
                    ),
                }
            }
            Event::CData(e) => {
                let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                match stack.last_mut() {
                    Some(parent) => parent.children.push(Node::CData(text)),
                    None => bail!(
                        "CDATA is not allowed outside the root element (position {})",
                        reader.buffer_position()
                    ),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        bail!(
            "Premature end of data, element '{}' is not closed",
            open.name
        );
    }
    root.ok_or_else(|| anyhow!("Document is empty"))
}

fn drop_blank_text(el: &mut Element) {
    if !el.has_text() {
        el.children
            .retain(|node| !matches!(node, Node::Text(t) if t.trim().is_empty()));
    }
}

fn element_from_start(start: &BytesStart<'_>) -> Result<Element> {
    let mut el = Element::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    for attr in start.attributes() {
        let attr = attr.context("Malformed attribute")?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .with_context(|| format!("Invalid value for attribute '{}'", key))?
            .into_owned();
        el.attributes.push((key, value));
    }
    Ok(el)
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    el: Element,
    position: impl std::fmt::Display,
) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.push(el),
        None => {
            if root.is_some() {
                bail!("Extra content at the end of the document (position {})", position);
            }
            *root = Some(el);
        }
    }
    Ok(())
}

/// Two-space indented form. Elements holding character content are written
/// inline so their text is not altered.
pub fn to_pretty_string(root: &Element) -> Result<String> {
    let mut writer = Writer::new(Vec::new());
    write_element(&mut writer, root, Some(0))?;
    String::from_utf8(writer.into_inner()).context("Serialized XML is not valid UTF-8")
}

pub fn to_compact_string(root: &Element) -> Result<String> {
    let mut writer = Writer::new(Vec::new());
    write_element(&mut writer, root, None)?;
    String::from_utf8(writer.into_inner()).context("Serialized XML is not valid UTF-8")
}

/// Serializes `root` as a standalone UTF-8 document with an XML declaration.
pub fn to_document_string(root: &Element, pretty: bool) -> Result<String> {
    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .context("Failed to write XML declaration")?;
    let indent = if pretty {
        write_line_break(&mut writer, 0)?;
        Some(0)
    } else {
        None
    };
    write_element(&mut writer, root, indent)?;
    let mut bytes = writer.into_inner();
    bytes.push(b'\n');
    String::from_utf8(bytes).context("Serialized XML is not valid UTF-8")
}

fn write_line_break<W: Write>(writer: &mut Writer<W>, level: usize) -> Result<()> {
    let indent = format!("\n{}", "  ".repeat(level));
    writer
        .write_event(Event::Text(BytesText::from_escaped(indent)))
        .context("Failed to write indentation")?;
    Ok(())
}

fn write_element<W: Write>(writer: &mut Writer<W>, el: &Element, indent: Option<usize>) -> Result<()> {
    let mut start = BytesStart::new(el.name.as_str());
    for (key, value) in &el.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if el.children.is_empty() {
        writer
            .write_event(Event::Empty(start))
            .with_context(|| format!("Failed to write element '{}'", el.name))?;
        return Ok(());
    }

    writer
        .write_event(Event::Start(start))
        .with_context(|| format!("Failed to write element '{}'", el.name))?;
    let child_indent = match indent {
        Some(level) if !el.has_text() => Some(level + 1),
        _ => None,
    };
    for child in &el.children {
        if child_indent.is_some() && matches!(child, Node::Text(t) if t.trim().is_empty()) {
            continue;
        }
        if let Some(level) = child_indent {
            write_line_break(writer, level)?;
        }
        match child {
            Node::Element(c) => write_element(writer, c, child_indent)?,
            Node::Text(t) => writer
                .write_event(Event::Text(BytesText::new(t)))
                .context("Failed to write text")?,
            Node::CData(t) => writer
                .write_event(Event::CData(BytesCData::new(t.as_str())))
                .context("Failed to write CDATA")?,
        }
    }
    if let (Some(level), Some(_)) = (indent, child_indent) {
        write_line_break(writer, level)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(el.name.as_str())))
        .with_context(|| format!("Failed to close element '{}'", el.name))?;
    Ok(())
}

/// Human readable rendering for reports: the pretty form when the text
/// parses, otherwise the raw text broken before every tag.
pub fn display_format(text: &str, parsed: Option<&Element>) -> String {
    match parsed.map(to_pretty_string) {
        Some(Ok(pretty)) => pretty,
        _ => text.replace('<', "\n<").trim().to_string(),
    }
}
