//! Flat XML documents as exchanged with the WeCom callback API.
//!
//! Every document is a `<xml>` root holding single-valued leaf elements.
//! Attributes are ignored and leaves are collapsed into a string map.

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesCData, BytesText, Event};

use crate::error::XmlError;

/// A value to serialize into a leaf element.
#[derive(Debug, Clone, Copy)]
pub enum XmlValue<'a> {
    /// Wrapped in a CDATA section.
    CData(&'a str),
    /// Written as escaped text.
    Text(&'a str),
}

/// Parse a flat XML document into a map of leaf element name to text.
///
/// Only the direct children of the root element are collected. Elements that
/// contain further elements are skipped, and the first occurrence of a
/// repeated element wins.
pub fn parse_xml(xml: &str) -> Result<HashMap<String, String>, XmlError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut fields = HashMap::new();
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut is_leaf = false;
    let mut saw_root = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                saw_root = true;
                is_leaf = true;
                text.clear();
            }
            Event::Empty(e) => {
                saw_root = true;
                if path.len() == 1 {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    fields.entry(name).or_insert_with(String::new);
                }
                is_leaf = false;
            }
            Event::Text(e) => text.push_str(&e.unescape()?),
            Event::CData(e) => text.push_str(&String::from_utf8_lossy(&e.into_inner())),
            Event::End(_) => {
                let name = path.pop();
                if let Some(name) = name {
                    if path.len() == 1 && is_leaf {
                        fields.entry(name).or_insert_with(|| text.clone());
                    }
                }
                is_leaf = false;
                text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(XmlError::Malformed("document has no root element".to_string()));
    }
    if !path.is_empty() {
        return Err(XmlError::Malformed(format!("unclosed element <{}>", path.join("/"))));
    }

    Ok(fields)
}

/// Serialize leaf elements, in order, under an `<xml>` root.
///
/// CDATA values that contain the `]]>` terminator fall back to escaped text.
pub fn write_document(fields: &[(&str, XmlValue<'_>)]) -> Result<String, XmlError> {
    let mut writer = Writer::new(Vec::new());

    writer
        .create_element("xml")
        .write_inner_content(|w| {
            for (name, value) in fields {
                let element = w.create_element(*name);
                match value {
                    XmlValue::CData(v) if !v.contains("]]>") => {
                        element.write_cdata_content(BytesCData::new(*v))?;
                    }
                    XmlValue::CData(v) | XmlValue::Text(v) => {
                        element.write_text_content(BytesText::new(v))?;
                    }
                }
            }
            Ok::<(), quick_xml::Error>(())
        })
        .map_err(|e| XmlError::Write(e.to_string()))?;

    String::from_utf8(writer.into_inner()).map_err(|e| XmlError::Write(e.to_string()))
}
