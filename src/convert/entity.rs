//! Entities and representation-independent field access
//!
//! An [`Entity`] keeps one canonical markup tree plus the representation the
//! caller handed it in (or wants it back in). [`EntityRef`] is a borrowed view
//! over any of the three shapes, and [`EntityAccess`] is the accessor surface
//! implemented once per shape.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ATTRIBUTE_MARKER, ConversionError, Flavor, TEXT_MARKER, from_json, to_json};
use crate::dom::Element;

/// How an entity is read or written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Representation {
    Xml,
    BadgerFish,
    SimpleJson,
}

impl Representation {
    /// JSON flavor for this representation, if it is a JSON one
    pub fn flavor(&self) -> Option<Flavor> {
        match self {
            Self::Xml => None,
            Self::BadgerFish => Some(Flavor::BadgerFish),
            Self::SimpleJson => Some(Flavor::SimpleJson),
        }
    }
}

impl From<Flavor> for Representation {
    fn from(flavor: Flavor) -> Self {
        match flavor {
            Flavor::BadgerFish => Self::BadgerFish,
            Flavor::SimpleJson => Self::SimpleJson,
        }
    }
}

/// An entity value in whatever shape it was produced
#[derive(Debug, Clone, PartialEq)]
pub enum EntityValue {
    Xml(Element),
    Json { flavor: Flavor, value: Value },
}

/// An entity: a canonical markup tree tagged with its representation
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    root: Element,
    representation: Representation,
}

impl Entity {
    pub fn from_xml(root: Element) -> Self {
        Self {
            root,
            representation: Representation::Xml,
        }
    }

    /// Build an entity from JSON; the root element takes `root_name`
    pub fn from_json(root_name: &str, json: &Value, flavor: Flavor) -> Result<Self, ConversionError> {
        Ok(Self {
            root: from_json(root_name, json, flavor)?,
            representation: flavor.into(),
        })
    }

    pub fn from_value(root_name: &str, value: EntityValue) -> Result<Self, ConversionError> {
        match value {
            EntityValue::Xml(element) => Ok(Self::from_xml(element)),
            EntityValue::Json { flavor, value } => Self::from_json(root_name, &value, flavor),
        }
    }

    pub fn representation(&self) -> Representation {
        self.representation
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn into_root(self) -> Element {
        self.root
    }

    pub fn to_json(&self, flavor: Flavor) -> Value {
        to_json(&self.root, flavor)
    }

    /// Export in the entity's own representation
    pub fn to_value(&self) -> EntityValue {
        self.to_representation(self.representation)
    }

    pub fn to_representation(&self, representation: Representation) -> EntityValue {
        match representation.flavor() {
            None => EntityValue::Xml(self.root.clone()),
            Some(flavor) => EntityValue::Json {
                flavor,
                value: self.to_json(flavor),
            },
        }
    }

    pub fn with_representation(mut self, representation: Representation) -> Self {
        self.representation = representation;
        self
    }
}

/// Borrowed view over an entity in one of its three shapes
#[derive(Debug, Clone, Copy)]
pub enum EntityRef<'a> {
    Xml(&'a Element),
    BadgerFish(&'a Map<String, Value>),
    SimpleJson(&'a Map<String, Value>),
}

impl<'a> EntityRef<'a> {
    /// View a JSON value; non-objects have no accessible fields
    pub fn from_json(value: &'a Value, flavor: Flavor) -> Option<Self> {
        let object = value.as_object()?;
        Some(match flavor {
            Flavor::BadgerFish => Self::BadgerFish(object),
            Flavor::SimpleJson => Self::SimpleJson(object),
        })
    }

    pub fn from_value(value: &'a EntityValue) -> Option<Self> {
        match value {
            EntityValue::Xml(element) => Some(Self::Xml(element)),
            EntityValue::Json { flavor, value } => Self::from_json(value, *flavor),
        }
    }
}

/// Field access that works the same way across representations
pub trait EntityAccess<'a> {
    /// Raw attribute value, if present
    fn attribute(&self, name: &str) -> Option<Cow<'a, str>>;

    /// First child element with the given name
    fn get_element(&self, name: &str) -> Option<EntityRef<'a>>;

    /// Child elements, optionally filtered by tag name
    fn get_child_elements(&self, name: Option<&str>) -> Vec<EntityRef<'a>>;

    /// Text content of the element itself
    fn text(&self) -> Option<Cow<'a, str>>;

    fn get_attribute_as_string(&self, name: &str) -> String {
        self.attribute(name).map(Cow::into_owned).unwrap_or_default()
    }

    /// Attribute as an integer; missing or unparseable values read as 0
    fn get_attribute_as_long(&self, name: &str) -> i64 {
        self.attribute(name)
            .and_then(|value| {
                let value = value.trim();
                value
                    .parse::<i64>()
                    .ok()
                    .or_else(|| value.parse::<f64>().ok().map(|f| f as i64))
            })
            .unwrap_or(0)
    }

    /// Attribute as a boolean; `true` and any non-zero number read as true
    fn get_attribute_as_boolean(&self, name: &str) -> bool {
        match self.attribute(name) {
            None => false,
            Some(value) => {
                let value = value.trim();
                value.eq_ignore_ascii_case("true")
                    || value.parse::<f64>().map(|n| n != 0.0).unwrap_or(false)
            }
        }
    }

    fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }
}

impl<'a> EntityAccess<'a> for &'a Element {
    fn attribute(&self, name: &str) -> Option<Cow<'a, str>> {
        let element: &'a Element = *self;
        Element::attribute(element, name).map(Cow::Borrowed)
    }

    fn get_element(&self, name: &str) -> Option<EntityRef<'a>> {
        let element: &'a Element = *self;
        element.first_child(name).map(EntityRef::Xml)
    }

    fn get_child_elements(&self, name: Option<&str>) -> Vec<EntityRef<'a>> {
        let element: &'a Element = *self;
        element
            .child_elements()
            .filter(|child| name.is_none_or(|n| child.name == n))
            .map(EntityRef::Xml)
            .collect()
    }

    fn text(&self) -> Option<Cow<'a, str>> {
        let text = Element::text(self);
        (!text.is_empty()).then_some(Cow::Owned(text))
    }
}

fn json_scalar<'a>(value: &'a Value) -> Option<Cow<'a, str>> {
    match value {
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        Value::Bool(b) => Some(Cow::Owned(b.to_string())),
        _ => None,
    }
}

/// Child objects under a JSON key, flattening arrays
fn json_children<'a>(
    value: &'a Value,
    wrap: fn(&'a Map<String, Value>) -> EntityRef<'a>,
) -> Vec<EntityRef<'a>> {
    match value {
        Value::Object(object) => vec![wrap(object)],
        Value::Array(items) => items.iter().filter_map(Value::as_object).map(wrap).collect(),
        _ => Vec::new(),
    }
}

/// BadgerFish objects: attributes are `@`-prefixed keys
pub struct BadgerFishObject<'a>(pub &'a Map<String, Value>);

impl<'a> EntityAccess<'a> for BadgerFishObject<'a> {
    fn attribute(&self, name: &str) -> Option<Cow<'a, str>> {
        let object: &'a Map<String, Value> = self.0;
        object
            .get(&format!("{ATTRIBUTE_MARKER}{name}"))
            .and_then(json_scalar)
    }

    fn get_element(&self, name: &str) -> Option<EntityRef<'a>> {
        let object: &'a Map<String, Value> = self.0;
        object
            .get(name)
            .and_then(|value| json_children(value, EntityRef::BadgerFish).into_iter().next())
    }

    fn get_child_elements(&self, name: Option<&str>) -> Vec<EntityRef<'a>> {
        let object: &'a Map<String, Value> = self.0;
        object
            .iter()
            .filter(|(key, _)| !key.starts_with(ATTRIBUTE_MARKER) && key.as_str() != TEXT_MARKER)
            .filter(|(key, _)| name.is_none_or(|n| key.as_str() == n))
            .flat_map(|(_, value)| json_children(value, EntityRef::BadgerFish))
            .collect()
    }

    fn text(&self) -> Option<Cow<'a, str>> {
        let object: &'a Map<String, Value> = self.0;
        object.get(TEXT_MARKER).and_then(json_scalar)
    }
}

/// SimpleJson objects: scalar keys are attributes
pub struct SimpleJsonObject<'a>(pub &'a Map<String, Value>);

impl<'a> EntityAccess<'a> for SimpleJsonObject<'a> {
    fn attribute(&self, name: &str) -> Option<Cow<'a, str>> {
        let object: &'a Map<String, Value> = self.0;
        object.get(name).and_then(json_scalar)
    }

    fn get_element(&self, name: &str) -> Option<EntityRef<'a>> {
        let object: &'a Map<String, Value> = self.0;
        object
            .get(name)
            .and_then(|value| json_children(value, EntityRef::SimpleJson).into_iter().next())
    }

    fn get_child_elements(&self, name: Option<&str>) -> Vec<EntityRef<'a>> {
        let object: &'a Map<String, Value> = self.0;
        object
            .iter()
            .filter(|(key, _)| name.is_none_or(|n| key.as_str() == n))
            .flat_map(|(_, value)| json_children(value, EntityRef::SimpleJson))
            .collect()
    }

    fn text(&self) -> Option<Cow<'a, str>> {
        let object: &'a Map<String, Value> = self.0;
        object.get(TEXT_MARKER).and_then(json_scalar)
    }
}

impl<'a> EntityAccess<'a> for EntityRef<'a> {
    fn attribute(&self, name: &str) -> Option<Cow<'a, str>> {
        match *self {
            Self::Xml(element) => element.attribute(name).map(Cow::Borrowed),
            Self::BadgerFish(object) => BadgerFishObject(object).attribute(name),
            Self::SimpleJson(object) => SimpleJsonObject(object).attribute(name),
        }
    }

    fn get_element(&self, name: &str) -> Option<EntityRef<'a>> {
        match *self {
            Self::Xml(element) => EntityAccess::get_element(&element, name),
            Self::BadgerFish(object) => BadgerFishObject(object).get_element(name),
            Self::SimpleJson(object) => SimpleJsonObject(object).get_element(name),
        }
    }

    fn get_child_elements(&self, name: Option<&str>) -> Vec<EntityRef<'a>> {
        match *self {
            Self::Xml(element) => EntityAccess::get_child_elements(&element, name),
            Self::BadgerFish(object) => BadgerFishObject(object).get_child_elements(name),
            Self::SimpleJson(object) => SimpleJsonObject(object).get_child_elements(name),
        }
    }

    fn text(&self) -> Option<Cow<'a, str>> {
        match *self {
            Self::Xml(element) => EntityAccess::text(&element),
            Self::BadgerFish(object) => BadgerFishObject(object).text(),
            Self::SimpleJson(object) => SimpleJsonObject(object).text(),
        }
    }
}
