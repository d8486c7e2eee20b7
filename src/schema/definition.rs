//! Schema definitions
//!
//! A [`Schema`] owns its nodes in a flat arena indexed by [`NodeId`]. Slot 0
//! is the schema element itself (the "top" node); its children are the
//! top-level element and attribute definitions, one of which may be the
//! root.

use serde_json::Value;
use tracing::debug;

use crate::convert::{EntityAccess, Flavor, to_json};
use crate::dom::Element;

use super::enumeration::Enumeration;
use super::node::NodeId;
use super::{SchemaError, SchemaResult};

/// A default value declared on a node
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    /// Scalar default (an expression or literal)
    Text(String),
    /// Structured default: the nested markup in its BadgerFish form
    Json(Value),
}

impl DefaultValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Json(_) => None,
        }
    }
}

/// A key: a named set of fields identifying an entity instance
#[derive(Debug, Clone, PartialEq)]
pub struct Key {
    pub name: String,
    pub label: String,
    pub is_internal: bool,
    /// Key field xpaths, relative to the node declaring the key
    pub fields: Vec<String>,
}

/// One source/destination pair of a link's join condition
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub xpath_src: String,
    pub xpath_dst: String,
}

#[derive(Debug, Clone)]
pub(crate) struct NodeData {
    /// Node name; attributes carry a leading `@`
    pub(crate) name: String,
    pub(crate) is_attribute: bool,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) attributes: Vec<(String, String)>,
    pub(crate) keys: Vec<Key>,
    pub(crate) joins: Vec<Join>,
    pub(crate) compute_string: Option<String>,
    pub(crate) default_value: Option<DefaultValue>,
    pub(crate) translated_default: Option<DefaultValue>,
}

impl NodeData {
    pub(crate) fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub(crate) fn flag(&self, name: &str) -> bool {
        self.attribute(name)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }
}

/// A parsed schema
#[derive(Debug, Clone)]
pub struct Schema {
    pub namespace: String,
    pub name: String,
    pub label: String,
    pub label_singular: String,
    pub description: String,
    pub img: Option<String>,
    pub md5: Option<String>,
    /// `sql`, `xmlFile`, `textFile`, ... (defaults to `sql`)
    pub mapping_type: String,
    /// Interface schema ids this schema implements
    pub implements: Vec<String>,
    pub is_library: bool,
    pub build_number: Option<String>,
    /// The definition markup this schema was parsed from
    pub source: Element,
    id: String,
    pub(crate) nodes: Vec<NodeData>,
    pub(crate) root: Option<NodeId>,
    enumerations: Vec<Enumeration>,
}

impl Schema {
    /// Parse a schema definition document
    pub fn parse_str(xml: &str) -> SchemaResult<Self> {
        let element = Element::parse(xml)?;
        Self::parse(&element)
    }

    /// Build a schema from its definition element (`<schema>` or `<srcSchema>`)
    pub fn parse(source: &Element) -> SchemaResult<Self> {
        if source.name != "schema" && source.name != "srcSchema" {
            return Err(SchemaError::malformed(format!(
                "Expected a schema definition, found <{}>",
                source.name
            )));
        }
        let namespace = source.get_attribute_as_string("namespace");
        let name = source.get_attribute_as_string("name");
        if namespace.is_empty() || name.is_empty() {
            return Err(SchemaError::malformed(format!(
                "Schema definition is missing its namespace or name (namespace='{}', name='{}')",
                namespace, name
            )));
        }
        let id = format!("{}:{}", namespace, name);

        let mut nodes = vec![NodeData {
            name: name.clone(),
            is_attribute: false,
            parent: None,
            children: Vec::new(),
            attributes: source.attributes.clone(),
            keys: Vec::new(),
            joins: Vec::new(),
            compute_string: None,
            default_value: None,
            translated_default: None,
        }];
        let top = NodeId(0);
        let mut children = Vec::new();
        for child in source.child_elements() {
            if child.name == "element" || child.name == "attribute" {
                children.push(parse_node(&mut nodes, &id, child, top)?);
            }
        }
        nodes[top.0].children = children;

        // The root is the top-level element named after the schema
        let root = nodes[top.0]
            .children
            .iter()
            .copied()
            .find(|child| !nodes[child.0].is_attribute && nodes[child.0].name == name);

        let enumerations = source
            .children_named("enumeration")
            .map(|e| Enumeration::parse(&id, e))
            .collect::<SchemaResult<Vec<_>>>()?;

        let implements = source
            .attribute("implements")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        debug!(
            "Parsed schema {} ({} nodes, {} enumerations)",
            id,
            nodes.len(),
            enumerations.len()
        );

        Ok(Self {
            label: source.get_attribute_as_string("label"),
            label_singular: source.get_attribute_as_string("labelSingular"),
            description: source.get_attribute_as_string("desc"),
            img: source.attribute("img").map(str::to_string),
            md5: source.attribute("md5").map(str::to_string),
            mapping_type: source.attribute("mappingType").unwrap_or("sql").to_string(),
            is_library: source.get_attribute_as_boolean("library"),
            build_number: source.attribute("buildNumber").map(str::to_string),
            source: source.clone(),
            namespace,
            name,
            implements,
            id,
            nodes,
            root,
            enumerations,
        })
    }

    /// `namespace:name`
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn has_root(&self) -> bool {
        self.root.is_some()
    }

    pub fn enumerations(&self) -> &[Enumeration] {
        &self.enumerations
    }

    /// Look up an enumeration by short name
    pub fn enumeration(&self, short_name: &str) -> Option<&Enumeration> {
        self.enumerations.iter().find(|e| e.name == short_name)
    }

    pub(crate) fn data(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0]
    }

    /// Number of nodes including the top node
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

fn node_name(schema_id: &str, element: &Element) -> SchemaResult<String> {
    let is_attribute = element.name == "attribute";
    let name = match element.attribute("name") {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => {
            // Unnamed nodes take the last segment of their ref
            let reference = element.attribute("ref").unwrap_or_default();
            let segment = reference
                .rsplit([':', '/'])
                .next()
                .unwrap_or_default()
                .trim_start_matches('@');
            if segment.is_empty() {
                return Err(SchemaError::malformed(format!(
                    "An <{}> in schema {} has neither a name nor a ref",
                    element.name, schema_id
                )));
            }
            segment.to_string()
        }
    };
    Ok(if is_attribute { format!("@{}", name) } else { name })
}

fn parse_node(
    nodes: &mut Vec<NodeData>,
    schema_id: &str,
    element: &Element,
    parent: NodeId,
) -> SchemaResult<NodeId> {
    let is_attribute = element.name == "attribute";
    let name = node_name(schema_id, element)?;

    let mut keys = Vec::new();
    for key in element.children_named("key") {
        let mut fields = Vec::new();
        for field in key.children_named("keyfield") {
            match field.attribute("xpath") {
                Some(xpath) if !xpath.trim().is_empty() => fields.push(xpath.trim().to_string()),
                _ => {
                    return Err(SchemaError::malformed(format!(
                        "Key field of key '{}' on node '{}' in schema {} has no xpath",
                        key.get_attribute_as_string("name"),
                        name,
                        schema_id
                    )));
                }
            }
        }
        keys.push(Key {
            name: key.get_attribute_as_string("name"),
            label: key.get_attribute_as_string("label"),
            is_internal: key.get_attribute_as_boolean("internal"),
            fields,
        });
    }

    let mut joins = Vec::new();
    for join in element.children_named("join") {
        let src = join.attribute("xpath-src").unwrap_or_default().trim();
        let dst = join.attribute("xpath-dst").unwrap_or_default().trim();
        if src.is_empty() || dst.is_empty() {
            debug!("Join on node '{}' in schema {} is incomplete", name, schema_id);
        }
        joins.push(Join {
            xpath_src: src.to_string(),
            xpath_dst: dst.to_string(),
        });
    }

    let compute_string = element
        .first_child("compute-string")
        .and_then(|c| c.attribute("expr"))
        .map(str::to_string);

    let id = NodeId(nodes.len());
    nodes.push(NodeData {
        name,
        is_attribute,
        parent: Some(parent),
        children: Vec::new(),
        attributes: element.attributes.clone(),
        keys,
        joins,
        compute_string,
        default_value: default_of(element, "default"),
        translated_default: default_of(element, "translatedDefault"),
    });

    let mut children = Vec::new();
    for child in element.child_elements() {
        if child.name == "element" || child.name == "attribute" {
            children.push(parse_node(nodes, schema_id, child, id)?);
        }
    }
    nodes[id.0].children = children;
    Ok(id)
}

/// Default from the attribute `tag`, else from a `<tag>` child
fn default_of(element: &Element, tag: &str) -> Option<DefaultValue> {
    if let Some(value) = element.attribute(tag) {
        return Some(DefaultValue::Text(value.to_string()));
    }
    let child = element.first_child(tag)?;
    if child.has_child_elements() {
        Some(DefaultValue::Json(to_json(child, Flavor::BadgerFish)))
    } else {
        Some(DefaultValue::Text(child.text()))
    }
}
