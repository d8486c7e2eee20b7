//! Markup tree
//!
//! A small owned element tree used as the canonical form of every entity,
//! schema definition and SOAP payload handled by the SDK. Parsing and
//! serialization go through quick-xml.

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesCData, BytesEnd, BytesStart, BytesText, Event};

/// Error type for markup parsing and serialization
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum XmlError {
    #[error("XML parse error at position {position}: {message}")]
    Parse { position: u64, message: String },
    #[error("XML document has no root element")]
    NoRootElement,
    #[error("Unexpected closing tag '{0}'")]
    UnexpectedClose(String),
    #[error("Unclosed element '{0}'")]
    Unclosed(String),
    #[error("XML write error: {0}")]
    Write(String),
}

/// A node in the markup tree
#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(Element),
    Text(String),
    CData(String),
}

/// An element with ordered attributes and mixed content
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl Element {
    /// Create an empty element
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder-style attribute setter
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    /// Builder-style child appender
    pub fn with_child(mut self, child: Element) -> Self {
        self.append_child(child);
        self
    }

    /// Builder-style text appender
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.append_text(text);
        self
    }

    /// Parse a document and return its root element
    ///
    /// Whitespace-only text runs are dropped. Declarations, comments,
    /// processing instructions and doctypes are ignored.
    pub fn parse(xml: &str) -> Result<Element, XmlError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(false);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            let event = reader.read_event().map_err(|e| XmlError::Parse {
                position: reader.error_position() as u64,
                message: e.to_string(),
            })?;
            match event {
                Event::Start(ref e) => {
                    let element = start_to_element(e, reader.buffer_position() as u64)?;
                    stack.push(element);
                }
                Event::Empty(ref e) => {
                    let element = start_to_element(e, reader.buffer_position() as u64)?;
                    attach(&mut stack, &mut root, element);
                }
                Event::End(ref e) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    let element = stack
                        .pop()
                        .ok_or_else(|| XmlError::UnexpectedClose(name.clone()))?;
                    if element.name != name {
                        return Err(XmlError::UnexpectedClose(name));
                    }
                    attach(&mut stack, &mut root, element);
                }
                Event::Text(ref e) => {
                    let text = e.unescape().map_err(|err| XmlError::Parse {
                        position: reader.buffer_position() as u64,
                        message: err.to_string(),
                    })?;
                    if let Some(current) = stack.last_mut()
                        && !text.trim().is_empty()
                    {
                        current.children.push(XmlNode::Text(text.into_owned()));
                    }
                }
                Event::CData(e) => {
                    let data = String::from_utf8_lossy(&e.into_inner()).into_owned();
                    if let Some(current) = stack.last_mut() {
                        current.children.push(XmlNode::CData(data));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.pop() {
            return Err(XmlError::Unclosed(open.name));
        }
        root.ok_or(XmlError::NoRootElement)
    }

    /// Serialize this element (and its subtree) to a string
    pub fn to_xml_string(&self) -> Result<String, XmlError> {
        let mut writer = Writer::new(Vec::new());
        write_element(&mut writer, self)?;
        String::from_utf8(writer.into_inner()).map_err(|e| XmlError::Write(e.to_string()))
    }

    /// Get an attribute value
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Set (or replace) an attribute value
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(key, _)| *key == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name, value)),
        }
    }

    /// Remove an attribute, returning its previous value
    pub fn remove_attribute(&mut self, name: &str) -> Option<String> {
        let index = self.attributes.iter().position(|(key, _)| key == name)?;
        Some(self.attributes.remove(index).1)
    }

    pub fn has_attributes(&self) -> bool {
        !self.attributes.is_empty()
    }

    /// Iterate over child elements, skipping text and CDATA
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            _ => None,
        })
    }

    pub fn has_child_elements(&self) -> bool {
        self.child_elements().next().is_some()
    }

    /// Get the first child element with the given tag name
    pub fn first_child(&self, name: &str) -> Option<&Element> {
        self.child_elements().find(|child| child.name == name)
    }

    /// Get all child elements with the given tag name
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.child_elements().filter(move |child| child.name == name)
    }

    /// Concatenated text and CDATA content of this element (not descendants)
    pub fn text(&self) -> String {
        let mut text = String::new();
        for node in &self.children {
            match node {
                XmlNode::Text(t) | XmlNode::CData(t) => text.push_str(t),
                XmlNode::Element(_) => {}
            }
        }
        text
    }

    pub fn append_child(&mut self, child: Element) {
        self.children.push(XmlNode::Element(child));
    }

    pub fn append_text(&mut self, text: impl Into<String>) {
        self.children.push(XmlNode::Text(text.into()));
    }
}

fn start_to_element(start: &BytesStart<'_>, position: u64) -> Result<Element, XmlError> {
    let mut element = Element::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    for attr in start.attributes() {
        let attr = attr.map_err(|e| XmlError::Parse {
            position,
            message: e.to_string(),
        })?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| XmlError::Parse {
            position,
            message: e.to_string(),
        })?;
        element.attributes.push((key, value.into_owned()));
    }
    Ok(element)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.append_child(element),
        // Only the first top-level element is kept as the document root
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element) -> Result<(), XmlError> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() {
        return writer
            .write_event(Event::Empty(start))
            .map_err(|e| XmlError::Write(e.to_string()));
    }

    writer
        .write_event(Event::Start(start))
        .map_err(|e| XmlError::Write(e.to_string()))?;
    for child in &element.children {
        match child {
            XmlNode::Element(child) => write_element(writer, child)?,
            XmlNode::Text(text) => writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(|e| XmlError::Write(e.to_string()))?,
            XmlNode::CData(data) => writer
                .write_event(Event::CData(BytesCData::new(data.as_str())))
                .map_err(|e| XmlError::Write(e.to_string()))?,
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(element.name.as_str())))
        .map_err(|e| XmlError::Write(e.to_string()))
}
