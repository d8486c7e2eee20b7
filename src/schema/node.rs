//! Schema nodes and path navigation

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use super::definition::{DefaultValue, Join, Key, NodeData, Schema};
use super::enumeration::Enumeration;
use super::{
    BoxFuture, LOCALIZATION_SEPARATOR, SchemaError, SchemaResolver, SchemaResult, parse_qualified_path,
    parse_schema_id,
};

/// Maximum number of ref/link hops a single lookup may take
const MAX_NAVIGATION_DEPTH: usize = 32;

/// Reverse-link value meaning "no reverse link"
const NO_REVERSE_LINK: &str = "_NONE_";

/// Index of a node within its schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

/// Options for [`SchemaNode::find_node`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FindOptions {
    /// When false, a segment without `@` may match an attribute
    pub strict: bool,
    /// When true, intermediate nodes with a `ref` are resolved through it
    pub follow_ref: bool,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            strict: true,
            follow_ref: true,
        }
    }
}

impl FindOptions {
    pub fn lenient() -> Self {
        Self {
            strict: false,
            ..Self::default()
        }
    }

    pub fn with_follow_ref(mut self, follow_ref: bool) -> Self {
        self.follow_ref = follow_ref;
        self
    }
}

impl Schema {
    /// The schema element itself; parent of every top-level definition
    pub fn top(self: &Arc<Self>) -> SchemaNode {
        SchemaNode::new(self.clone(), NodeId(0))
    }

    /// The root element (named after the schema), if declared
    pub fn root(self: &Arc<Self>) -> Option<SchemaNode> {
        self.root.map(|id| SchemaNode::new(self.clone(), id))
    }
}

/// A position in a schema tree
#[derive(Clone)]
pub struct SchemaNode {
    schema: Arc<Schema>,
    id: NodeId,
}

impl PartialEq for SchemaNode {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.schema.id() == other.schema.id()
    }
}

impl std::fmt::Debug for SchemaNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaNode")
            .field("full_name", &self.full_name())
            .finish()
    }
}

impl SchemaNode {
    pub(crate) fn new(schema: Arc<Schema>, id: NodeId) -> Self {
        Self { schema, id }
    }

    fn data(&self) -> &NodeData {
        self.schema.data(self.id)
    }

    fn at(&self, id: NodeId) -> SchemaNode {
        SchemaNode::new(self.schema.clone(), id)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Node name; attributes carry a leading `@`
    pub fn name(&self) -> &str {
        &self.data().name
    }

    pub fn is_attribute(&self) -> bool {
        self.data().is_attribute
    }

    pub fn is_top(&self) -> bool {
        self.id == NodeId(0)
    }

    pub fn is_root(&self) -> bool {
        self.schema.root == Some(self.id)
    }

    /// Raw definition attribute
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.data().attribute(name)
    }

    pub fn label(&self) -> &str {
        self.attribute("label")
            .unwrap_or_else(|| self.name().trim_start_matches('@'))
    }

    pub fn description(&self) -> &str {
        self.attribute("desc").unwrap_or_default()
    }

    /// Data type; attributes default to `string`
    pub fn node_type(&self) -> &str {
        match self.attribute("type") {
            Some(t) => t,
            None if self.is_attribute() => "string",
            None => "",
        }
    }

    pub fn is_link(&self) -> bool {
        self.node_type() == "link"
    }

    pub fn is_collection(&self) -> bool {
        self.data().flag("unbound")
    }

    pub fn is_mapped_as_xml(&self) -> bool {
        self.data().flag("xml")
    }

    pub fn is_not_null(&self) -> bool {
        self.data().flag("notNull")
    }

    pub fn is_required(&self) -> bool {
        self.data().flag("required")
    }

    /// Computed (non-stored) attribute
    pub fn is_calculated(&self) -> bool {
        self.attribute("expr").is_some()
    }

    pub fn is_sql(&self) -> bool {
        if self.is_top() {
            return false;
        }
        self.sql_name().is_some()
            || self.sql_table().is_some()
            || (self.schema.mapping_type == "sql" && !self.is_mapped_as_xml() && !self.is_calculated())
    }

    pub fn sql_name(&self) -> Option<&str> {
        self.attribute("sqlname")
    }

    pub fn sql_table(&self) -> Option<&str> {
        self.attribute("sqltable")
    }

    pub fn length(&self) -> Option<u32> {
        self.attribute("length").and_then(|l| l.trim().parse().ok())
    }

    /// Link integrity (`own`, `owncopy`, `neutral`, `define`, ...)
    pub fn integrity(&self) -> Option<&str> {
        self.attribute("integrity")
    }

    pub fn rev_link(&self) -> Option<&str> {
        self.attribute("revLink")
    }

    pub fn img(&self) -> Option<&str> {
        self.attribute("img")
    }

    pub fn enum_name(&self) -> Option<&str> {
        self.attribute("enum")
    }

    pub fn user_enumeration(&self) -> Option<&str> {
        self.attribute("userEnum")
    }

    /// Link target as declared (`ns:name` or `ns:name:path`)
    pub fn target(&self) -> Option<&str> {
        self.attribute("target")
    }

    /// Ref value as declared
    pub fn reference(&self) -> Option<&str> {
        self.attribute("ref")
    }

    pub fn default_value(&self) -> Option<&DefaultValue> {
        self.data().default_value.as_ref()
    }

    pub fn translated_default(&self) -> Option<&DefaultValue> {
        self.data().translated_default.as_ref()
    }

    pub fn keys(&self) -> &[Key] {
        &self.data().keys
    }

    pub fn joins(&self) -> &[Join] {
        &self.data().joins
    }

    pub fn children(&self) -> Vec<SchemaNode> {
        self.data().children.iter().map(|id| self.at(*id)).collect()
    }

    /// Direct child by exact name
    pub fn child(&self, name: &str) -> Option<SchemaNode> {
        self.data()
            .children
            .iter()
            .copied()
            .find(|id| self.schema.data(*id).name == name)
            .map(|id| self.at(id))
    }

    /// Parent node; `None` for top-level definitions and the top node
    pub fn parent(&self) -> Option<SchemaNode> {
        match self.data().parent {
            Some(parent) if parent != NodeId(0) => Some(self.at(parent)),
            _ => None,
        }
    }

    /// Names from the top-level ancestor down to this node
    fn path_segments(&self) -> Vec<&str> {
        let mut segments = Vec::new();
        let mut current = Some(self.id);
        while let Some(id) = current {
            if id == NodeId(0) {
                break;
            }
            let data = self.schema.data(id);
            segments.push(data.name.as_str());
            current = data.parent;
        }
        segments.reverse();
        segments
    }

    /// Path of this node: absolute (`/country/@isoA3`) under the root,
    /// relative to the top-level definition otherwise
    pub fn node_path(&self) -> String {
        let segments = self.path_segments();
        let under_root = self
            .schema
            .root
            .is_some_and(|root| segments.first() == Some(&self.schema.data(root).name.as_str()));
        if under_root {
            format!("/{}", segments[1..].join("/"))
        } else {
            segments.join("/")
        }
    }

    /// `namespace:name:path/from/top-level`; the schema id for the top node
    pub fn full_name(&self) -> String {
        if self.is_top() {
            return self.schema.id().to_string();
        }
        format!("{}:{}", self.schema.id(), self.path_segments().join("/"))
    }

    fn localization_id(&self, suffix: &str) -> String {
        let mut parts = vec![self.schema.namespace.as_str(), self.schema.name.as_str()];
        parts.extend(self.path_segments());
        parts.push(suffix);
        parts.join(LOCALIZATION_SEPARATOR)
    }

    pub fn label_localization_id(&self) -> String {
        self.localization_id("@label")
    }

    pub fn description_localization_id(&self) -> String {
        self.localization_id("@desc")
    }

    /// Display-string expression of this node
    ///
    /// An explicit `compute-string` wins; otherwise the first field of the
    /// first non-internal key, as an absolute path; otherwise empty.
    pub fn compute_string(&self) -> String {
        if let Some(expr) = &self.data().compute_string {
            return expr.clone();
        }
        self.keys()
            .iter()
            .find(|key| !key.is_internal)
            .and_then(|key| key.fields.first())
            .map(|field| {
                if field.starts_with('/') {
                    field.clone()
                } else {
                    format!("/{}", field)
                }
            })
            .unwrap_or_default()
    }

    fn own_child(&self, segment: &str, strict: bool) -> Option<SchemaNode> {
        if let Some(child) = self.child(segment) {
            return Some(child);
        }
        if !strict && !segment.starts_with('@') {
            return self.child(&format!("@{}", segment));
        }
        None
    }

    /// Resolve a slash-separated path relative to this node
    ///
    /// `.` is this node, `..` its parent, and a leading `/` starts from the
    /// schema root. Not-found is `Ok(None)`; malformed refs or links on the
    /// way are errors.
    pub fn find_node<'a>(
        &'a self,
        resolver: &'a dyn SchemaResolver,
        path: &'a str,
        options: FindOptions,
    ) -> BoxFuture<'a, SchemaResult<Option<SchemaNode>>> {
        self.find_node_at(resolver, path, options, 0)
    }

    fn find_node_at<'a>(
        &'a self,
        resolver: &'a dyn SchemaResolver,
        path: &'a str,
        options: FindOptions,
        depth: usize,
    ) -> BoxFuture<'a, SchemaResult<Option<SchemaNode>>> {
        Box::pin(async move {
            let path = path.trim();
            if path.is_empty() {
                return Ok((!self.is_attribute()).then(|| self.clone()));
            }

            let (mut current, rest) = match path.strip_prefix('/') {
                Some(rest) => match self.schema.root() {
                    Some(root) => (root, rest),
                    None => return Ok(None),
                },
                None => (self.clone(), path),
            };

            for segment in rest.split('/').map(str::trim) {
                match segment {
                    "" | "." => {}
                    ".." => match current.parent() {
                        Some(parent) => current = parent,
                        None => return Ok(None),
                    },
                    name => match current.child_via(resolver, name, options, depth).await? {
                        Some(next) => current = next,
                        None => return Ok(None),
                    },
                }
            }
            Ok(Some(current))
        })
    }

    /// One path step: own children, then through a ref, then through a link
    fn child_via<'a>(
        &'a self,
        resolver: &'a dyn SchemaResolver,
        segment: &'a str,
        options: FindOptions,
        depth: usize,
    ) -> BoxFuture<'a, SchemaResult<Option<SchemaNode>>> {
        Box::pin(async move {
            if let Some(child) = self.own_child(segment, options.strict) {
                return Ok(Some(child));
            }
            if depth >= MAX_NAVIGATION_DEPTH {
                return Err(SchemaError::malformed(format!(
                    "Navigation through {} exceeds {} ref/link hops",
                    self.full_name(),
                    MAX_NAVIGATION_DEPTH
                )));
            }
            if options.follow_ref
                && self.reference().is_some()
                && let Some(target) = self.ref_target_at(resolver, depth + 1).await?
            {
                return target.child_via(resolver, segment, options, depth + 1).await;
            }
            if self.is_link()
                && let Some(target) = self.link_target_at(resolver, depth + 1).await?
            {
                return target.child_via(resolver, segment, options, depth + 1).await;
            }
            Ok(None)
        })
    }

    /// Node this node's `ref` points to, following chained refs
    ///
    /// Unqualified refs resolve within this schema; `ns:name:path` refs
    /// resolve in that schema. A ref of any other shape, or a ref chain that
    /// loops, is malformed. `Ok(None)` if the node has no ref or the target
    /// does not exist.
    pub fn ref_target<'a>(
        &'a self,
        resolver: &'a dyn SchemaResolver,
    ) -> BoxFuture<'a, SchemaResult<Option<SchemaNode>>> {
        self.ref_target_at(resolver, 0)
    }

    fn ref_target_at<'a>(
        &'a self,
        resolver: &'a dyn SchemaResolver,
        depth: usize,
    ) -> BoxFuture<'a, SchemaResult<Option<SchemaNode>>> {
        Box::pin(async move {
            if self.reference().is_none() {
                return Ok(None);
            }
            let mut visited: HashSet<(String, NodeId)> = HashSet::new();
            let mut current = self.clone();
            while let Some(reference) = current.reference().map(str::to_string) {
                if !visited.insert((current.schema.id().to_string(), current.id)) {
                    return Err(SchemaError::malformed(format!(
                        "Ref loop detected at {} (ref '{}')",
                        current.full_name(),
                        reference
                    )));
                }
                match current.resolve_ref(resolver, &reference, depth).await? {
                    Some(next) => current = next,
                    None => return Ok(None),
                }
            }
            Ok(Some(current))
        })
    }

    async fn resolve_ref(
        &self,
        resolver: &dyn SchemaResolver,
        reference: &str,
        depth: usize,
    ) -> SchemaResult<Option<SchemaNode>> {
        let reference = reference.trim();
        if !reference.contains(':') {
            let top = self.schema.top();
            return top.find_node_at(resolver, reference, FindOptions::default(), depth).await;
        }
        let Some((schema_id, path)) = parse_qualified_path(reference) else {
            return Err(SchemaError::malformed(format!(
                "Malformed ref '{}' on {}: expected 'path' or 'namespace:schema:path'",
                reference,
                self.full_name()
            )));
        };
        let schema = if schema_id == self.schema.id() {
            self.schema.clone()
        } else {
            match resolver.get_schema(schema_id).await? {
                Some(schema) => schema,
                None => {
                    debug!("Ref {} points to unknown schema {}", reference, schema_id);
                    return Ok(None);
                }
            }
        };
        schema
            .top()
            .find_node_at(resolver, path, FindOptions::default(), depth)
            .await
    }

    /// The node a link points to: the target schema's root, or a sub-path of it
    ///
    /// `Ok(None)` for non-links and for targets whose schema does not exist.
    pub fn link_target<'a>(
        &'a self,
        resolver: &'a dyn SchemaResolver,
    ) -> BoxFuture<'a, SchemaResult<Option<SchemaNode>>> {
        self.link_target_at(resolver, 0)
    }

    fn link_target_at<'a>(
        &'a self,
        resolver: &'a dyn SchemaResolver,
        depth: usize,
    ) -> BoxFuture<'a, SchemaResult<Option<SchemaNode>>> {
        Box::pin(async move {
            if !self.is_link() {
                return Ok(None);
            }
            let target = self.target().unwrap_or_default().trim();
            if target.is_empty() {
                return Err(SchemaError::malformed(format!(
                    "Link {} has no target",
                    self.full_name()
                )));
            }
            if target.contains(',') {
                return Err(SchemaError::malformed(format!(
                    "Link {} has multiple targets '{}'",
                    self.full_name(),
                    target
                )));
            }
            let (schema_id, path) = if parse_schema_id(target).is_some() {
                (target, None)
            } else if let Some((schema_id, path)) = parse_qualified_path(target) {
                (schema_id, Some(path))
            } else {
                return Err(SchemaError::malformed(format!(
                    "Link {} target '{}' is not schema-qualified",
                    self.full_name(),
                    target
                )));
            };

            let schema = if schema_id == self.schema.id() {
                self.schema.clone()
            } else {
                match resolver.get_schema(schema_id).await? {
                    Some(schema) => schema,
                    None => {
                        debug!("Link {} points to unknown schema {}", self.full_name(), schema_id);
                        return Ok(None);
                    }
                }
            };
            let Some(root) = schema.root() else {
                return Ok(None);
            };
            match path {
                None => Ok(Some(root)),
                Some(path) => {
                    root.find_node_at(resolver, path, FindOptions::default(), depth)
                        .await
                }
            }
        })
    }

    /// The link in the target schema pointing back at this one
    ///
    /// Uses this node's `revLink` when declared, otherwise searches the
    /// target for a link whose `revLink` names this node. `None` when neither
    /// side of the pair declares a join.
    pub async fn reverse_link(&self, resolver: &dyn SchemaResolver) -> SchemaResult<Option<SchemaNode>> {
        let Some(target) = self.link_target(resolver).await? else {
            return Ok(None);
        };
        let reverse = if let Some(rev_link) = self.rev_link().map(str::trim)
            && !rev_link.is_empty()
        {
            if rev_link == NO_REVERSE_LINK {
                return Ok(None);
            }
            target.child(rev_link)
        } else {
            let own_schema = self.schema.id();
            target.children().into_iter().find(|candidate| {
                candidate.is_link()
                    && candidate
                        .target()
                        .is_some_and(|t| t == own_schema || t.starts_with(&format!("{}:", own_schema)))
                    && candidate.rev_link() == Some(self.name())
            })
        };
        Ok(reverse.filter(|reverse| !self.joins().is_empty() || !reverse.joins().is_empty()))
    }

    /// Resolved (source, destination) node pairs of this link's joins
    ///
    /// Source paths resolve from the element holding the link, destination
    /// paths from the link target. Empty when there are no joins, the target
    /// schema is missing, or any side fails to resolve.
    pub async fn join_nodes(&self, resolver: &dyn SchemaResolver) -> SchemaResult<Vec<(SchemaNode, SchemaNode)>> {
        if self.joins().is_empty()
            || self
                .joins()
                .iter()
                .any(|join| join.xpath_src.is_empty() || join.xpath_dst.is_empty())
        {
            return Ok(Vec::new());
        }
        let Some(target) = self.link_target(resolver).await? else {
            return Ok(Vec::new());
        };
        let source = self.parent().unwrap_or_else(|| self.clone());

        let mut pairs = Vec::with_capacity(self.joins().len());
        for join in self.joins() {
            let src = source
                .find_node(resolver, &join.xpath_src, FindOptions::default())
                .await?;
            let dst = target
                .find_node(resolver, &join.xpath_dst, FindOptions::default())
                .await?;
            match (src, dst) {
                (Some(src), Some(dst)) => pairs.push((src, dst)),
                _ => {
                    debug!(
                        "Join {} -> {} on {} does not resolve",
                        join.xpath_src,
                        join.xpath_dst,
                        self.full_name()
                    );
                    return Ok(Vec::new());
                }
            }
        }
        Ok(pairs)
    }

    /// Enumeration by name, or the one named by this node's `enum` attribute
    ///
    /// `name` is a short name (this schema) or `namespace:schema:name`.
    pub async fn enumeration(
        &self,
        resolver: &dyn SchemaResolver,
        name: Option<&str>,
    ) -> SchemaResult<Option<Enumeration>> {
        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => name,
            None => match self.enum_name() {
                Some(name) => name,
                None => {
                    return Err(SchemaError::malformed(format!(
                        "{} has no enumeration and none was named",
                        self.full_name()
                    )));
                }
            },
        };
        let parts: Vec<&str> = name.split(':').collect();
        match parts.as_slice() {
            [short] => Ok(self.schema.enumeration(short).cloned()),
            [namespace, schema_name, short] => {
                let schema_id = format!("{}:{}", namespace, schema_name);
                let schema = if schema_id == self.schema.id() {
                    self.schema.clone()
                } else {
                    match resolver.get_schema(&schema_id).await? {
                        Some(schema) => schema,
                        None => return Ok(None),
                    }
                };
                Ok(schema.enumeration(short).cloned())
            }
            _ => Err(SchemaError::malformed(format!(
                "Invalid enumeration name '{}': expected 'name' or 'namespace:schema:name'",
                name
            ))),
        }
    }
}

impl Key {
    /// Resolve this key's fields from the node declaring it
    ///
    /// Fields that do not resolve are left out.
    pub async fn field_nodes(
        &self,
        owner: &SchemaNode,
        resolver: &dyn SchemaResolver,
    ) -> SchemaResult<Vec<SchemaNode>> {
        let mut nodes = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            if let Some(node) = owner.find_node(resolver, field, FindOptions::default()).await? {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::super::StaticResolver;
    use super::*;

    fn resolver() -> StaticResolver {
        let mut resolver = StaticResolver::new();
        resolver
            .insert_xml(
                r#"<schema namespace="nms" name="recipient">
                     <element name="recipient">
                       <key name="internal" internal="true"><keyfield xpath="@id"/></key>
                       <key name="email"><keyfield xpath="@email"/></key>
                       <attribute name="id" type="long"/>
                       <attribute name="email" label="Email"/>
                       <element name="country">
                         <attribute name="isoA3"/>
                       </element>
                     </element>
                   </schema>"#,
            )
            .unwrap();
        resolver
    }

    fn root(resolver: &StaticResolver) -> SchemaNode {
        resolver.get("nms:recipient").unwrap().root().unwrap()
    }

    #[tokio::test]
    async fn test_relative_and_absolute_paths() {
        let resolver = resolver();
        let root = root(&resolver);
        let opts = FindOptions::default();

        let email = root.find_node(&resolver, "@email", opts).await.unwrap().unwrap();
        assert_eq!(email.name(), "@email");

        let iso = root.find_node(&resolver, "country/@isoA3", opts).await.unwrap().unwrap();
        assert_eq!(iso.full_name(), "nms:recipient:recipient/country/@isoA3");
        assert_eq!(iso.node_path(), "/country/@isoA3");

        let again = iso.find_node(&resolver, "/@email", opts).await.unwrap().unwrap();
        assert_eq!(again, email);

        let country = root.find_node(&resolver, "country", opts).await.unwrap().unwrap();
        let up = country.find_node(&resolver, "../@email", opts).await.unwrap().unwrap();
        assert_eq!(up, email);

        let back = root.find_node(&resolver, "./country/..", opts).await.unwrap().unwrap();
        assert_eq!(back, root);
    }

    #[tokio::test]
    async fn test_empty_path_and_misses() {
        let resolver = resolver();
        let root = root(&resolver);
        let opts = FindOptions::default();
        assert_eq!(root.find_node(&resolver, "", opts).await.unwrap(), Some(root.clone()));

        let email = root.child("@email").unwrap();
        assert!(email.find_node(&resolver, "", opts).await.unwrap().is_none());
        assert!(root.find_node(&resolver, "..", opts).await.unwrap().is_none());
        assert!(root.find_node(&resolver, "nope", opts).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lenient_attribute_lookup() {
        let resolver = resolver();
        let root = root(&resolver);
        assert!(root.find_node(&resolver, "email", FindOptions::default()).await.unwrap().is_none());
        let email = root
            .find_node(&resolver, "email", FindOptions::lenient())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(email.name(), "@email");
    }

    #[test]
    fn test_compute_string_from_external_key() {
        let resolver = resolver();
        let root = root(&resolver);
        assert_eq!(root.compute_string(), "/@email");
        assert_eq!(root.child("country").unwrap().compute_string(), "");
    }

    #[test]
    fn test_localization_ids() {
        let resolver = resolver();
        let root = root(&resolver);
        let email = root.child("@email").unwrap();
        assert_eq!(email.label(), "Email");
        assert_eq!(
            email.label_localization_id(),
            "nms__recipient__recipient__@email__@label"
        );
        assert_eq!(
            root.description_localization_id(),
            "nms__recipient__recipient__@desc"
        );
    }

    #[tokio::test]
    async fn test_key_field_nodes() {
        let resolver = resolver();
        let root = root(&resolver);
        let key = &root.keys()[1];
        let fields = key.field_nodes(&root, &resolver).await.unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name(), "@email");
    }
}
