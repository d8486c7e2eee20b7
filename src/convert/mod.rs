//! Representation converter
//!
//! Converts between the markup tree and the two JSON flavors used by callers:
//! - BadgerFish ("fat"): attributes are `@`-prefixed keys, text lives under `$`
//! - SimpleJson: attributes are bare keys, text-only children are `$`-prefixed
//!
//! This is the only place in the crate that branches on JSON flavor.

pub mod entity;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dom::Element;

pub use entity::{Entity, EntityAccess, EntityRef, Representation};

/// Marker prefixing attribute names in BadgerFish JSON and schema node names
pub const ATTRIBUTE_MARKER: char = '@';

/// Key holding text content, and prefix marking text-valued children in SimpleJson
pub const TEXT_MARKER: &str = "$";

/// Tag suffix forcing child elements to be emitted as JSON arrays
pub const COLLECTION_SUFFIX: &str = "-collection";

/// Error type for representation conversion
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConversionError {
    #[error("Expected a JSON object for element '{0}'")]
    NotAnObject(String),
    #[error("Unsupported JSON value for '{key}': {reason}")]
    UnsupportedValue { key: String, reason: String },
}

/// JSON flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Flavor {
    /// Attribute-prefixed ("fat") form
    BadgerFish,
    /// Attribute-bare form
    SimpleJson,
}

impl std::fmt::Display for Flavor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadgerFish => write!(f, "BadgerFish"),
            Self::SimpleJson => write!(f, "SimpleJson"),
        }
    }
}

/// Convert a markup element to JSON in the requested flavor
///
/// The root element's own name is not part of the output.
pub fn to_json(element: &Element, flavor: Flavor) -> Value {
    match flavor {
        Flavor::BadgerFish => Value::Object(to_badgerfish(element)),
        Flavor::SimpleJson => Value::Object(to_simple_json(element)),
    }
}

/// Build a markup element named `root_name` from JSON in the given flavor
pub fn from_json(root_name: &str, json: &Value, flavor: Flavor) -> Result<Element, ConversionError> {
    let object = json
        .as_object()
        .ok_or_else(|| ConversionError::NotAnObject(root_name.to_string()))?;
    let mut element = Element::new(root_name);
    match flavor {
        Flavor::BadgerFish => from_badgerfish(&mut element, object)?,
        Flavor::SimpleJson => from_simple_json(&mut element, object)?,
    }
    Ok(element)
}

/// Canonical string form of a primitive JSON value
///
/// Returns `Ok(None)` for null (the key is skipped), and an error for arrays
/// and objects which have no attribute/text form.
pub fn primitive_to_string(key: &str, value: &Value) -> Result<Option<String>, ConversionError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        Value::Array(_) => Err(ConversionError::UnsupportedValue {
            key: key.to_string(),
            reason: "arrays cannot be used as attribute or text values".to_string(),
        }),
        Value::Object(_) => Err(ConversionError::UnsupportedValue {
            key: key.to_string(),
            reason: "objects cannot be used as attribute or text values".to_string(),
        }),
    }
}

fn is_collection(element: &Element) -> bool {
    element.name.len() > COLLECTION_SUFFIX.len() && element.name.ends_with(COLLECTION_SUFFIX)
}

/// Insert a child value, turning repeated keys into arrays
fn insert_child(json: &mut Map<String, Value>, key: &str, value: Value, force_array: bool) {
    match json.get_mut(key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            let value = if force_array {
                Value::Array(vec![value])
            } else {
                value
            };
            json.insert(key.to_string(), value);
        }
    }
}

fn to_badgerfish(element: &Element) -> Map<String, Value> {
    let mut json = Map::new();
    for (name, value) in &element.attributes {
        json.insert(format!("{ATTRIBUTE_MARKER}{name}"), Value::String(value.clone()));
    }

    let force_array = is_collection(element);
    for child in element.child_elements() {
        insert_child(
            &mut json,
            &child.name,
            Value::Object(to_badgerfish(child)),
            force_array,
        );
    }

    let text = element.text();
    if !text.is_empty() {
        json.insert(TEXT_MARKER.to_string(), Value::String(text));
    }
    json
}

fn from_badgerfish(element: &mut Element, json: &Map<String, Value>) -> Result<(), ConversionError> {
    for (key, value) in json {
        if let Some(attribute) = key.strip_prefix(ATTRIBUTE_MARKER) {
            if let Some(value) = primitive_to_string(key, value)? {
                element.set_attribute(attribute, value);
            }
        } else if key == TEXT_MARKER {
            if let Some(text) = primitive_to_string(key, value)? {
                element.append_text(text);
            }
        } else {
            append_json_children(element, key, value, from_badgerfish)?;
        }
    }
    Ok(())
}

fn to_simple_json(element: &Element) -> Map<String, Value> {
    let mut json = Map::new();
    for (name, value) in &element.attributes {
        json.insert(name.clone(), Value::String(value.clone()));
    }

    let force_array = is_collection(element);
    for child in element.child_elements() {
        let repeated = element.children_named(&child.name).nth(1).is_some();
        if !force_array && !repeated && !child.has_attributes() && !child.has_child_elements() {
            let text = child.text();
            if !text.is_empty() {
                json.insert(format!("{TEXT_MARKER}{}", child.name), Value::String(text));
                continue;
            }
        }
        insert_child(
            &mut json,
            &child.name,
            Value::Object(to_simple_json(child)),
            force_array,
        );
    }

    let text = element.text();
    if !text.is_empty() {
        json.insert(TEXT_MARKER.to_string(), Value::String(text));
    }
    json
}

fn from_simple_json(element: &mut Element, json: &Map<String, Value>) -> Result<(), ConversionError> {
    for (key, value) in json {
        if key == TEXT_MARKER {
            if let Some(text) = primitive_to_string(key, value)? {
                element.append_text(text);
            }
        } else if let Some(child_name) = key.strip_prefix(TEXT_MARKER) {
            if let Some(text) = primitive_to_string(key, value)? {
                element.append_child(Element::new(child_name).with_text(text));
            }
        } else if matches!(value, Value::Object(_) | Value::Array(_)) {
            append_json_children(element, key, value, from_simple_json)?;
        } else if let Some(value) = primitive_to_string(key, value)? {
            element.set_attribute(key.as_str(), value);
        }
    }
    Ok(())
}

type ObjectFiller = fn(&mut Element, &Map<String, Value>) -> Result<(), ConversionError>;

/// Append the child element(s) described by one JSON key
fn append_json_children(
    element: &mut Element,
    key: &str,
    value: &Value,
    fill: ObjectFiller,
) -> Result<(), ConversionError> {
    match value {
        Value::Array(items) => {
            for item in items {
                if item.is_array() {
                    return Err(ConversionError::UnsupportedValue {
                        key: key.to_string(),
                        reason: "nested arrays have no markup form".to_string(),
                    });
                }
                append_json_children(element, key, item, fill)?;
            }
        }
        Value::Object(object) => {
            let mut child = Element::new(key);
            fill(&mut child, object)?;
            element.append_child(child);
        }
        other => {
            if let Some(text) = primitive_to_string(key, other)? {
                element.append_child(Element::new(key).with_text(text));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_badgerfish_attributes_and_text() {
        let element = Element::new("recipient")
            .with_attribute("email", "a@b.com")
            .with_child(Element::new("notes").with_text("hi"));
        let json = to_json(&element, Flavor::BadgerFish);
        assert_eq!(
            json,
            json!({ "@email": "a@b.com", "notes": { "$": "hi" } })
        );
    }

    #[test]
    fn test_repeated_siblings_become_arrays() {
        let element = Element::new("list")
            .with_child(Element::new("item").with_attribute("id", "1"))
            .with_child(Element::new("item").with_attribute("id", "2"));
        assert_eq!(
            to_json(&element, Flavor::BadgerFish),
            json!({ "item": [{ "@id": "1" }, { "@id": "2" }] })
        );
        assert_eq!(
            to_json(&element, Flavor::SimpleJson),
            json!({ "item": [{ "id": "1" }, { "id": "2" }] })
        );
    }

    #[test]
    fn test_collection_suffix_forces_array() {
        let element = Element::new("recipient-collection")
            .with_child(Element::new("recipient").with_attribute("id", "1"));
        assert_eq!(
            to_json(&element, Flavor::SimpleJson),
            json!({ "recipient": [{ "id": "1" }] })
        );
    }

    #[test]
    fn test_simple_json_text_children() {
        let json = json!({ "id": 12, "active": true, "$comment": "hello", "$": "body" });
        let element = from_json("item", &json, Flavor::SimpleJson).unwrap();
        assert_eq!(element.attribute("id"), Some("12"));
        assert_eq!(element.attribute("active"), Some("true"));
        assert_eq!(element.first_child("comment").unwrap().text(), "hello");
        assert_eq!(element.text(), "body");
    }

    #[test]
    fn test_unsupported_values_fail() {
        let nested = json!({ "item": [[{ "a": 1 }]] });
        assert!(matches!(
            from_json("x", &nested, Flavor::BadgerFish),
            Err(ConversionError::UnsupportedValue { .. })
        ));
        let object_attr = json!({ "@a": { "b": 1 } });
        assert!(from_json("x", &object_attr, Flavor::BadgerFish).is_err());
        assert!(matches!(
            from_json("x", &json!("scalar"), Flavor::SimpleJson),
            Err(ConversionError::NotAnObject(_))
        ));
    }

    #[test]
    fn test_null_values_are_skipped() {
        let element = from_json("x", &json!({ "a": null, "@b": null }), Flavor::BadgerFish).unwrap();
        assert!(element.attributes.is_empty());
        assert!(element.children.is_empty());
    }
}
