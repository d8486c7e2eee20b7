//! Schema enumerations

use crate::convert::EntityAccess;
use crate::dom::Element;

use super::{SchemaError, SchemaResult};

/// Base types whose enumeration values are numeric
const NUMERIC_BASE_TYPES: &[&str] = &["byte", "short", "long", "int64", "double", "float"];

/// Value carried by an enumeration entry
#[derive(Debug, Clone, PartialEq)]
pub enum EnumValue {
    Number(f64),
    Text(String),
}

impl EnumValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n as i64),
            Self::Text(_) => None,
        }
    }
}

impl std::fmt::Display for EnumValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) if n.fract() == 0.0 => write!(f, "{}", *n as i64),
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

/// One entry of an enumeration
#[derive(Debug, Clone, PartialEq)]
pub struct EnumerationValue {
    pub name: String,
    pub value: EnumValue,
    pub label: String,
    pub description: String,
    pub image: Option<String>,
    pub enabled_if: Option<String>,
}

/// A named, schema-scoped set of values
#[derive(Debug, Clone, PartialEq)]
pub struct Enumeration {
    /// Short name (unique within the schema)
    pub name: String,
    /// `namespace:schema:name`
    pub qualified_name: String,
    pub label: String,
    pub description: String,
    pub base_type: String,
    /// Name of the default value, if declared
    pub default: Option<String>,
    pub image: Option<String>,
    pub values: Vec<EnumerationValue>,
}

impl Enumeration {
    /// Parse an `<enumeration>` element of schema `schema_id`
    pub(crate) fn parse(schema_id: &str, element: &Element) -> SchemaResult<Self> {
        let name = element.get_attribute_as_string("name");
        if name.is_empty() {
            return Err(SchemaError::malformed(format!(
                "Enumeration without a name in schema {}",
                schema_id
            )));
        }
        let base_type = element
            .attribute("basetype")
            .unwrap_or("string")
            .to_string();
        let numeric = NUMERIC_BASE_TYPES.contains(&base_type.as_str());

        let mut values = Vec::new();
        for (index, value) in element.children_named("value").enumerate() {
            let value_name = value.get_attribute_as_string("name");
            let raw = value.attribute("value");
            let parsed = if numeric {
                match raw {
                    // Implicit numeric values are declared by position
                    None => EnumValue::Number(index as f64),
                    Some(raw) => EnumValue::Number(raw.trim().parse::<f64>().map_err(|_| {
                        SchemaError::malformed(format!(
                            "Enumeration {}:{} value '{}' is not numeric: '{}'",
                            schema_id, name, value_name, raw
                        ))
                    })?),
                }
            } else {
                EnumValue::Text(raw.map(str::to_string).unwrap_or_else(|| value_name.clone()))
            };
            values.push(EnumerationValue {
                label: value.get_attribute_as_string("label"),
                description: value.get_attribute_as_string("desc"),
                image: value.attribute("img").map(str::to_string),
                enabled_if: value.attribute("enabledIf").map(str::to_string),
                name: value_name,
                value: parsed,
            });
        }

        Ok(Self {
            qualified_name: format!("{}:{}", schema_id, name),
            label: element.get_attribute_as_string("label"),
            description: element.get_attribute_as_string("desc"),
            default: element.attribute("default").map(str::to_string),
            image: element.attribute("img").map(str::to_string),
            name,
            base_type,
            values,
        })
    }

    pub fn is_numeric(&self) -> bool {
        NUMERIC_BASE_TYPES.contains(&self.base_type.as_str())
    }

    pub fn value_by_name(&self, name: &str) -> Option<&EnumerationValue> {
        self.values.iter().find(|v| v.name == name)
    }

    pub fn value_by_value(&self, value: &EnumValue) -> Option<&EnumerationValue> {
        self.values.iter().find(|v| &v.value == value)
    }

    /// The declared default entry
    pub fn default_value(&self) -> Option<&EnumerationValue> {
        self.default.as_deref().and_then(|name| self.value_by_name(name))
    }
}
