//! Model registry and document deserialization
//!
//! The registry turns raw bytes (JSON or XML) into typed trees shaped by a
//! declared schema. The schema, not the runtime value, drives the structural
//! walk, so a field missing on one side is still visible to the differ.
//!
//! Models are plug-ins: callers register a [`ModelDescriptor`] per model name
//! and the engine resolves them at run time. A `Dynamic` schema is available
//! for documents without a declared model; it is walked by key union.

use crate::error::CompareError;
use crate::types::ComparisonSettings;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// A scalar leaf value
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    String(String),
    Number(f64),
    Bool(bool),
}

impl Scalar {
    /// Render for difference records and signatures
    ///
    /// Whole numbers render without a fractional part so JSON `1` and XML
    /// `"1"` compare and display identically.
    pub fn render(&self) -> String {
        match self {
            Scalar::String(s) => s.clone(),
            Scalar::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{:.0}", n)
                } else {
                    n.to_string()
                }
            }
            Scalar::Bool(b) => b.to_string(),
        }
    }
}

/// A typed object node with its resolved type name
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectNode {
    /// Declared type name, or the resolved variant name for polymorphic types
    pub type_name: String,
    pub fields: BTreeMap<String, Node>,
}

/// One node of a deserialized document tree
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Null,
    Scalar(Scalar),
    Object(ObjectNode),
    Collection(Vec<Node>),
}

impl Node {
    /// Short rendering used for added/removed item records
    pub fn render_brief(&self) -> String {
        match self {
            Node::Null => "null".to_string(),
            Node::Scalar(s) => s.render(),
            Node::Object(o) => o.type_name.clone(),
            Node::Collection(items) => format!("[{} items]", items.len()),
        }
    }

    /// Write a canonical byte form of the subtree, used for structural
    /// signatures when a collection element has no identity fields
    pub fn write_canonical(&self, out: &mut Vec<u8>) {
        match self {
            Node::Null => out.extend_from_slice(b"~"),
            Node::Scalar(s) => {
                out.extend_from_slice(b"s:");
                out.extend_from_slice(s.render().as_bytes());
            }
            Node::Object(o) => {
                out.extend_from_slice(b"o:");
                out.extend_from_slice(o.type_name.as_bytes());
                out.push(b'{');
                for (name, value) in &o.fields {
                    out.extend_from_slice(name.as_bytes());
                    out.push(b'=');
                    value.write_canonical(out);
                    out.push(b';');
                }
                out.push(b'}');
            }
            Node::Collection(items) => {
                out.push(b'[');
                for item in items {
                    item.write_canonical(out);
                    out.push(b',');
                }
                out.push(b']');
            }
        }
    }
}

/// Declared kind of a scalar field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScalarKind {
    String,
    Number,
    Bool,
    DateTime,
    /// Named values compared by name
    Enum(Vec<String>),
    /// No declared kind
    Any,
}

impl ScalarKind {
    /// Type name exposed to PropertyType smart rules
    pub fn type_name(&self) -> &'static str {
        match self {
            ScalarKind::String => "String",
            ScalarKind::Number => "Number",
            ScalarKind::Bool => "Bool",
            ScalarKind::DateTime => "DateTime",
            ScalarKind::Enum(_) => "Enum",
            ScalarKind::Any => "Any",
        }
    }
}

/// One declared field of an object schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub schema: Schema,
}

/// Declared object type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSchema {
    pub type_name: String,
    pub fields: Vec<FieldSchema>,
}

/// Polymorphic type: a discriminator selects one of the declared subtypes
///
/// In JSON the discriminator is a field; in XML it is the concrete element
/// name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSchema {
    pub discriminator: String,
    pub variants: BTreeMap<String, ObjectSchema>,
}

/// Recursive schema declaration driving the structural walk
///
/// Serializable so hosts can register models from declaration files instead
/// of code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Schema {
    Scalar(ScalarKind),
    Object(ObjectSchema),
    Collection {
        element: Box<Schema>,
        /// Required collections mark missing-element patterns critical
        required: bool,
    },
    Variant(VariantSchema),
    /// Undeclared shape, walked by key union
    Dynamic,
}

impl Schema {
    /// Declared type name at this schema position
    pub fn type_name(&self) -> &str {
        match self {
            Schema::Scalar(kind) => kind.type_name(),
            Schema::Object(o) => &o.type_name,
            Schema::Collection { .. } => "Collection",
            Schema::Variant(v) => &v.discriminator,
            Schema::Dynamic => "Dynamic",
        }
    }

    /// Convenience constructor for an object schema
    pub fn object(type_name: &str, fields: Vec<(&str, Schema)>) -> Schema {
        Schema::Object(ObjectSchema {
            type_name: type_name.to_string(),
            fields: fields
                .into_iter()
                .map(|(name, schema)| FieldSchema {
                    name: name.to_string(),
                    schema,
                })
                .collect(),
        })
    }

    /// Convenience constructor for a collection schema
    pub fn collection(element: Schema) -> Schema {
        Schema::Collection {
            element: Box::new(element),
            required: false,
        }
    }

    /// Convenience constructor for a required collection schema
    pub fn required_collection(element: Schema) -> Schema {
        Schema::Collection {
            element: Box::new(element),
            required: true,
        }
    }

    pub fn string() -> Schema {
        Schema::Scalar(ScalarKind::String)
    }

    pub fn number() -> Schema {
        Schema::Scalar(ScalarKind::Number)
    }

    pub fn boolean() -> Schema {
        Schema::Scalar(ScalarKind::Bool)
    }

    pub fn date_time() -> Schema {
        Schema::Scalar(ScalarKind::DateTime)
    }
}

/// Document format accepted by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Json,
    Xml,
}

impl ContentKind {
    /// Infer from content type, then file extension, then a body sniff
    pub fn infer(content_type: Option<&str>, file_name: Option<&str>, body: &[u8]) -> ContentKind {
        if let Some(ct) = content_type {
            let ct = ct.to_ascii_lowercase();
            if ct.contains("xml") {
                return ContentKind::Xml;
            }
            if ct.contains("json") {
                return ContentKind::Json;
            }
        }
        if let Some(name) = file_name {
            let lower = name.to_ascii_lowercase();
            if lower.ends_with(".xml") {
                return ContentKind::Xml;
            }
            if lower.ends_with(".json") {
                return ContentKind::Json;
            }
        }
        // Last resort: XML bodies start with '<'
        match body.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'<') => ContentKind::Xml,
            _ => ContentKind::Json,
        }
    }
}

/// A registered model: a name plus the schema that drives its walk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub schema: Schema,
}

/// Declaration file shape: `{ "models": [ { name, schema }, ... ] }`
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RegistryDocument {
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,
}

/// Registry of pluggable domain models
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: HashMap<String, ModelDescriptor>,
}

impl ModelRegistry {
    pub fn new() -> ModelRegistry {
        ModelRegistry::default()
    }

    /// Register or replace a model by name
    pub fn register(&mut self, descriptor: ModelDescriptor) {
        self.models.insert(descriptor.name.clone(), descriptor);
    }

    /// Build a registry from a JSON declaration document
    pub fn from_declarations(bytes: &[u8]) -> Result<ModelRegistry, CompareError> {
        let document: RegistryDocument = serde_json::from_slice(bytes)
            .map_err(|e| CompareError::Input(format!("invalid model declarations: {}", e)))?;
        let mut registry = ModelRegistry::new();
        for descriptor in document.models {
            registry.register(descriptor);
        }
        Ok(registry)
    }

    /// Resolve the schema for a model name
    pub fn schema_of(&self, model_name: &str) -> Result<&Schema, CompareError> {
        self.models
            .get(model_name)
            .map(|d| &d.schema)
            .ok_or_else(|| CompareError::Input(format!("unresolved model '{}'", model_name)))
    }

    /// True if the model name resolves
    pub fn contains(&self, model_name: &str) -> bool {
        self.models.contains_key(model_name)
    }

    /// Deserialize a document against a registered model
    pub fn deserialize(
        &self,
        model_name: &str,
        bytes: &[u8],
        kind: ContentKind,
        settings: &ComparisonSettings,
    ) -> Result<Node, CompareError> {
        let schema = self.schema_of(model_name)?;
        deserialize_with_schema(schema, bytes, kind, settings)
    }

    /// Field names of every required collection reachable from a model
    ///
    /// Used by the aggregator to mark missing-element patterns critical.
    pub fn required_collections(&self, model_name: &str) -> HashSet<String> {
        let mut names = HashSet::new();
        if let Ok(schema) = self.schema_of(model_name) {
            collect_required_collections(schema, None, &mut names);
        }
        names
    }
}

fn collect_required_collections(
    schema: &Schema,
    field_name: Option<&str>,
    out: &mut HashSet<String>,
) {
    match schema {
        Schema::Collection { element, required } => {
            if *required {
                if let Some(name) = field_name {
                    out.insert(name.to_string());
                }
            }
            collect_required_collections(element, None, out);
        }
        Schema::Object(o) => {
            for field in &o.fields {
                collect_required_collections(&field.schema, Some(&field.name), out);
            }
        }
        Schema::Variant(v) => {
            for variant in v.variants.values() {
                for field in &variant.fields {
                    collect_required_collections(&field.schema, Some(&field.name), out);
                }
            }
        }
        _ => {}
    }
}

/// Deserialize bytes against an explicit schema (no registry lookup)
pub fn deserialize_with_schema(
    schema: &Schema,
    bytes: &[u8],
    kind: ContentKind,
    settings: &ComparisonSettings,
) -> Result<Node, CompareError> {
    match kind {
        ContentKind::Json => {
            let value: serde_json::Value = serde_json::from_slice(bytes)
                .map_err(|e| CompareError::Parse(format!("invalid JSON: {}", e)))?;
            Ok(shape_json(&value, schema))
        }
        ContentKind::Xml => {
            let root = parse_xml(bytes, settings.ignore_xml_namespaces)?;
            Ok(shape_xml(&root, schema))
        }
    }
}

/// Deserialize without any declared model (dynamic shape)
pub fn deserialize_dynamic(
    bytes: &[u8],
    kind: ContentKind,
    settings: &ComparisonSettings,
) -> Result<Node, CompareError> {
    deserialize_with_schema(&Schema::Dynamic, bytes, kind, settings)
}

// ---------------------------------------------------------------------------
// JSON shaping
// ---------------------------------------------------------------------------

fn shape_json(value: &serde_json::Value, schema: &Schema) -> Node {
    use serde_json::Value;

    match schema {
        Schema::Scalar(_) => match value {
            Value::Null => Node::Null,
            Value::String(s) => Node::Scalar(Scalar::String(s.clone())),
            Value::Number(n) => Node::Scalar(Scalar::Number(n.as_f64().unwrap_or(f64::NAN))),
            Value::Bool(b) => Node::Scalar(Scalar::Bool(*b)),
            // Structured data under a scalar declaration: fall back to dynamic
            other => shape_json(other, &Schema::Dynamic),
        },
        Schema::Object(os) => match value {
            Value::Null => Node::Null,
            Value::Object(map) => {
                let mut fields = BTreeMap::new();
                for field in &os.fields {
                    if let Some(v) = map.get(&field.name) {
                        fields.insert(field.name.clone(), shape_json(v, &field.schema));
                    }
                }
                Node::Object(ObjectNode {
                    type_name: os.type_name.clone(),
                    fields,
                })
            }
            other => shape_json(other, &Schema::Dynamic),
        },
        Schema::Collection { element, .. } => match value {
            Value::Null => Node::Null,
            Value::Array(items) => {
                Node::Collection(items.iter().map(|v| shape_json(v, element)).collect())
            }
            // A single object where a collection was declared: wrap it
            other => Node::Collection(vec![shape_json(other, element)]),
        },
        Schema::Variant(vs) => match value {
            Value::Null => Node::Null,
            Value::Object(map) => {
                let tag = map
                    .get(&vs.discriminator)
                    .map(render_json_scalar)
                    .unwrap_or_default();
                match vs.variants.get(&tag) {
                    Some(variant) => {
                        let mut fields = BTreeMap::new();
                        for field in &variant.fields {
                            if let Some(v) = map.get(&field.name) {
                                fields.insert(field.name.clone(), shape_json(v, &field.schema));
                            }
                        }
                        Node::Object(ObjectNode {
                            type_name: tag,
                            fields,
                        })
                    }
                    // Unknown variant: keep the tag, expose no fields, so the
                    // walk reports one difference at the discriminator
                    None => Node::Object(ObjectNode {
                        type_name: tag,
                        fields: BTreeMap::new(),
                    }),
                }
            }
            other => shape_json(other, &Schema::Dynamic),
        },
        Schema::Dynamic => match value {
            Value::Null => Node::Null,
            Value::String(s) => Node::Scalar(Scalar::String(s.clone())),
            Value::Number(n) => Node::Scalar(Scalar::Number(n.as_f64().unwrap_or(f64::NAN))),
            Value::Bool(b) => Node::Scalar(Scalar::Bool(*b)),
            Value::Array(items) => Node::Collection(
                items
                    .iter()
                    .map(|v| shape_json(v, &Schema::Dynamic))
                    .collect(),
            ),
            Value::Object(map) => {
                let mut fields = BTreeMap::new();
                for (k, v) in map {
                    fields.insert(k.clone(), shape_json(v, &Schema::Dynamic));
                }
                Node::Object(ObjectNode {
                    type_name: "Object".to_string(),
                    fields,
                })
            }
        },
    }
}

fn render_json_scalar(value: &serde_json::Value) -> String {
    use serde_json::Value;
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

// ---------------------------------------------------------------------------
// XML parsing and shaping
// ---------------------------------------------------------------------------

/// Intermediate XML element tree produced by the event reader
#[derive(Debug, Clone)]
struct XmlElement {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<XmlElement>,
    text: String,
}

fn strip_namespace(name: &str) -> &str {
    match name.rfind(':') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}

fn open_element(
    e: &quick_xml::events::BytesStart<'_>,
    ignore_namespaces: bool,
) -> Result<XmlElement, CompareError> {
    let norm_name = |raw: &[u8]| -> String {
        let name = String::from_utf8_lossy(raw).into_owned();
        if ignore_namespaces {
            strip_namespace(&name).to_string()
        } else {
            name
        }
    };

    let mut element = XmlElement {
        name: norm_name(e.name().as_ref()),
        attributes: Vec::new(),
        children: Vec::new(),
        text: String::new(),
    };
    for attr in e.attributes() {
        let attr =
            attr.map_err(|e| CompareError::Parse(format!("invalid XML attribute: {}", e)))?;
        // Namespace declarations are structural noise; filter on the raw
        // name so stripping cannot hide the xmlns prefix
        let raw_key = String::from_utf8_lossy(attr.key.as_ref());
        if raw_key == "xmlns" || raw_key.starts_with("xmlns:") {
            continue;
        }
        let key = norm_name(attr.key.as_ref());
        let value = attr
            .unescape_value()
            .map_err(|e| CompareError::Parse(format!("invalid XML attribute: {}", e)))?
            .into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn parse_xml(bytes: &[u8], ignore_namespaces: bool) -> Result<XmlElement, CompareError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| CompareError::Parse(format!("invalid XML: {}", e)))?;
        match event {
            Event::Start(e) => {
                stack.push(open_element(&e, ignore_namespaces)?);
            }
            Event::Empty(e) => {
                let element = open_element(&e, ignore_namespaces)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| CompareError::Parse(format!("invalid XML text: {}", e)))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Event::CData(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Event::End(_) => {
                let finished = stack.pop().ok_or_else(|| {
                    CompareError::Parse("unbalanced XML end tag".to_string())
                })?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(finished),
                    None => root = Some(finished),
                }
            }
            Event::Eof => break,
            // Declarations, comments, processing instructions
            _ => {}
        }
        buf.clear();
    }

    root.ok_or_else(|| CompareError::Parse("XML document has no root element".to_string()))
}

fn xml_scalar(element: &XmlElement) -> Node {
    if element.text.is_empty() && element.children.is_empty() && element.attributes.is_empty() {
        Node::Null
    } else {
        Node::Scalar(Scalar::String(element.text.clone()))
    }
}

fn shape_xml(element: &XmlElement, schema: &Schema) -> Node {
    match schema {
        Schema::Scalar(_) => xml_scalar(element),
        Schema::Object(os) => shape_xml_object(element, os),
        Schema::Collection { element: elem_schema, .. } => {
            // Wrapper style: the element's children are the items
            Node::Collection(
                element
                    .children
                    .iter()
                    .map(|child| shape_xml(child, elem_schema))
                    .collect(),
            )
        }
        Schema::Variant(vs) => {
            // The concrete element name picks the variant
            let tag = element.name.clone();
            match vs.variants.get(&tag) {
                Some(variant) => shape_xml_object(element, variant),
                None => Node::Object(ObjectNode {
                    type_name: tag,
                    fields: BTreeMap::new(),
                }),
            }
        }
        Schema::Dynamic => shape_xml_dynamic(element),
    }
}

fn shape_xml_object(element: &XmlElement, os: &ObjectSchema) -> Node {
    let mut fields = BTreeMap::new();
    for field in &os.fields {
        // Attributes first, then child elements
        if let Some((_, value)) = element.attributes.iter().find(|(k, _)| *k == field.name) {
            fields.insert(
                field.name.clone(),
                Node::Scalar(Scalar::String(value.clone())),
            );
            continue;
        }
        let matching: Vec<&XmlElement> = element
            .children
            .iter()
            .filter(|c| c.name == field.name)
            .collect();
        if matching.is_empty() {
            continue;
        }
        let node = match &field.schema {
            Schema::Collection { element: elem_schema, .. } => {
                if matching.len() == 1 && !matching[0].children.is_empty() {
                    // Wrapper element holding the items
                    shape_xml(matching[0], &field.schema)
                } else if matching.len() == 1
                    && matching[0].children.is_empty()
                    && matching[0].text.is_empty()
                {
                    // <Results/> - an empty collection
                    Node::Collection(Vec::new())
                } else {
                    // Repeated sibling elements are the items themselves
                    Node::Collection(
                        matching
                            .iter()
                            .map(|c| shape_xml(c, elem_schema))
                            .collect(),
                    )
                }
            }
            other => shape_xml(matching[0], other),
        };
        fields.insert(field.name.clone(), node);
    }
    Node::Object(ObjectNode {
        type_name: os.type_name.clone(),
        fields,
    })
}

fn shape_xml_dynamic(element: &XmlElement) -> Node {
    if element.children.is_empty() && element.attributes.is_empty() {
        return xml_scalar(element);
    }

    let mut fields: BTreeMap<String, Node> = BTreeMap::new();
    for (key, value) in &element.attributes {
        fields.insert(key.clone(), Node::Scalar(Scalar::String(value.clone())));
    }

    // Group children by name; repeated names become collections
    let mut order: Vec<&str> = Vec::new();
    let mut grouped: BTreeMap<&str, Vec<&XmlElement>> = BTreeMap::new();
    for child in &element.children {
        if !grouped.contains_key(child.name.as_str()) {
            order.push(&child.name);
        }
        grouped.entry(&child.name).or_default().push(child);
    }
    for name in order {
        let group = &grouped[name];
        let node = if group.len() == 1 {
            shape_xml_dynamic(group[0])
        } else {
            Node::Collection(group.iter().map(|c| shape_xml_dynamic(c)).collect())
        };
        fields.insert(name.to_string(), node);
    }

    Node::Object(ObjectNode {
        type_name: element.name.clone(),
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_schema() -> Schema {
        Schema::object(
            "Order",
            vec![
                ("Id", Schema::number()),
                ("Status", Schema::string()),
                (
                    "Results",
                    Schema::collection(Schema::object(
                        "Result",
                        vec![("Id", Schema::number()), ("Score", Schema::number())],
                    )),
                ),
            ],
        )
    }

    #[test]
    fn test_json_shaping_against_schema() {
        let body = br#"{"Id": 7, "Status": "Open", "Results": [{"Id": 1, "Score": 1.5}]}"#;
        let node = deserialize_with_schema(
            &order_schema(),
            body,
            ContentKind::Json,
            &ComparisonSettings::default(),
        )
        .unwrap();

        let Node::Object(obj) = node else {
            panic!("expected object")
        };
        assert_eq!(obj.type_name, "Order");
        assert_eq!(obj.fields["Id"], Node::Scalar(Scalar::Number(7.0)));
        let Node::Collection(items) = &obj.fields["Results"] else {
            panic!("expected collection")
        };
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_json_undeclared_fields_are_invisible() {
        let body = br#"{"Id": 7, "Unknown": "x"}"#;
        let node = deserialize_with_schema(
            &order_schema(),
            body,
            ContentKind::Json,
            &ComparisonSettings::default(),
        )
        .unwrap();
        let Node::Object(obj) = node else {
            panic!("expected object")
        };
        assert!(!obj.fields.contains_key("Unknown"));
    }

    #[test]
    fn test_json_null_collection_stays_null() {
        let body = br#"{"Id": 7, "Results": null}"#;
        let node = deserialize_with_schema(
            &order_schema(),
            body,
            ContentKind::Json,
            &ComparisonSettings::default(),
        )
        .unwrap();
        let Node::Object(obj) = node else {
            panic!("expected object")
        };
        assert_eq!(obj.fields["Results"], Node::Null);
    }

    #[test]
    fn test_json_parse_error() {
        let err = deserialize_with_schema(
            &order_schema(),
            b"{not json",
            ContentKind::Json,
            &ComparisonSettings::default(),
        );
        assert!(err.is_err());
        assert_eq!(err.unwrap_err().kind(), "parse");
    }

    #[test]
    fn test_xml_wrapper_collection() {
        let body = br#"<Order><Id>7</Id><Status>Open</Status><Results><Result><Id>1</Id><Score>1.5</Score></Result><Result><Id>2</Id><Score>2</Score></Result></Results></Order>"#;
        let node = deserialize_with_schema(
            &order_schema(),
            body,
            ContentKind::Xml,
            &ComparisonSettings::default(),
        )
        .unwrap();

        let Node::Object(obj) = node else {
            panic!("expected object")
        };
        assert_eq!(obj.fields["Id"], Node::Scalar(Scalar::String("7".into())));
        let Node::Collection(items) = &obj.fields["Results"] else {
            panic!("expected collection")
        };
        assert_eq!(items.len(), 2);
        let Node::Object(first) = &items[0] else {
            panic!("expected object item")
        };
        assert_eq!(
            first.fields["Score"],
            Node::Scalar(Scalar::String("1.5".into()))
        );
    }

    #[test]
    fn test_xml_empty_element_collection() {
        let body = br#"<Order><Id>7</Id><Results/></Order>"#;
        let node = deserialize_with_schema(
            &order_schema(),
            body,
            ContentKind::Xml,
            &ComparisonSettings::default(),
        )
        .unwrap();
        let Node::Object(obj) = node else {
            panic!("expected object")
        };
        assert_eq!(obj.fields["Results"], Node::Collection(Vec::new()));
    }

    #[test]
    fn test_xml_namespace_stripping() {
        let body =
            br#"<ns:Order xmlns:ns="http://x"><ns:Id>7</ns:Id></ns:Order>"#;
        let settings = ComparisonSettings {
            ignore_xml_namespaces: true,
            ..ComparisonSettings::default()
        };
        let node =
            deserialize_with_schema(&order_schema(), body, ContentKind::Xml, &settings).unwrap();
        let Node::Object(obj) = node else {
            panic!("expected object")
        };
        assert_eq!(obj.fields["Id"], Node::Scalar(Scalar::String("7".into())));
    }

    #[test]
    fn test_xml_malformed_fails() {
        let err = deserialize_with_schema(
            &order_schema(),
            b"<Order><Id>7</Order>",
            ContentKind::Xml,
            &ComparisonSettings::default(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_variant_resolution_json() {
        let schema = Schema::Variant(VariantSchema {
            discriminator: "$type".to_string(),
            variants: BTreeMap::from([
                (
                    "Card".to_string(),
                    ObjectSchema {
                        type_name: "Card".to_string(),
                        fields: vec![FieldSchema {
                            name: "Masked".to_string(),
                            schema: Schema::string(),
                        }],
                    },
                ),
                (
                    "Wire".to_string(),
                    ObjectSchema {
                        type_name: "Wire".to_string(),
                        fields: vec![FieldSchema {
                            name: "Iban".to_string(),
                            schema: Schema::string(),
                        }],
                    },
                ),
            ]),
        });

        let body = br#"{"$type": "Card", "Masked": "****1234"}"#;
        let node = deserialize_with_schema(
            &schema,
            body,
            ContentKind::Json,
            &ComparisonSettings::default(),
        )
        .unwrap();
        let Node::Object(obj) = node else {
            panic!("expected object")
        };
        assert_eq!(obj.type_name, "Card");
        assert!(obj.fields.contains_key("Masked"));

        // Unknown variant keeps the tag and exposes no fields
        let body = br#"{"$type": "Crypto", "Wallet": "0xabc"}"#;
        let node = deserialize_with_schema(
            &schema,
            body,
            ContentKind::Json,
            &ComparisonSettings::default(),
        )
        .unwrap();
        let Node::Object(obj) = node else {
            panic!("expected object")
        };
        assert_eq!(obj.type_name, "Crypto");
        assert!(obj.fields.is_empty());
    }

    #[test]
    fn test_dynamic_json() {
        let body = br#"{"a": [1, 2], "b": {"c": true}}"#;
        let node = deserialize_dynamic(body, ContentKind::Json, &ComparisonSettings::default())
            .unwrap();
        let Node::Object(obj) = node else {
            panic!("expected object")
        };
        assert!(matches!(obj.fields["a"], Node::Collection(_)));
        assert!(matches!(obj.fields["b"], Node::Object(_)));
    }

    #[test]
    fn test_dynamic_xml_repeated_children_become_collection() {
        let body = br#"<Root><Item>1</Item><Item>2</Item><Name>x</Name></Root>"#;
        let node =
            deserialize_dynamic(body, ContentKind::Xml, &ComparisonSettings::default()).unwrap();
        let Node::Object(obj) = node else {
            panic!("expected object")
        };
        assert!(matches!(obj.fields["Item"], Node::Collection(_)));
        assert_eq!(obj.fields["Name"], Node::Scalar(Scalar::String("x".into())));
    }

    #[test]
    fn test_content_kind_inference() {
        assert_eq!(
            ContentKind::infer(Some("application/json"), None, b""),
            ContentKind::Json
        );
        assert_eq!(
            ContentKind::infer(Some("text/xml; charset=utf-8"), None, b""),
            ContentKind::Xml
        );
        assert_eq!(
            ContentKind::infer(None, Some("resp.XML"), b""),
            ContentKind::Xml
        );
        assert_eq!(
            ContentKind::infer(None, Some("resp.json"), b""),
            ContentKind::Json
        );
        assert_eq!(ContentKind::infer(None, None, b"  <root/>"), ContentKind::Xml);
        assert_eq!(ContentKind::infer(None, None, b"{}"), ContentKind::Json);
    }

    #[test]
    fn test_registry_resolution() {
        let mut registry = ModelRegistry::new();
        registry.register(ModelDescriptor {
            name: "Order".to_string(),
            schema: order_schema(),
        });

        assert!(registry.contains("Order"));
        assert!(registry.schema_of("Order").is_ok());
        let err = registry.schema_of("Missing").unwrap_err();
        assert_eq!(err.kind(), "input");
    }

    #[test]
    fn test_required_collections() {
        let mut registry = ModelRegistry::new();
        registry.register(ModelDescriptor {
            name: "Order".to_string(),
            schema: Schema::object(
                "Order",
                vec![
                    ("Lines", Schema::required_collection(Schema::string())),
                    ("Tags", Schema::collection(Schema::string())),
                ],
            ),
        });
        let required = registry.required_collections("Order");
        assert!(required.contains("Lines"));
        assert!(!required.contains("Tags"));
    }

    #[test]
    fn test_registry_from_declarations() {
        let declarations = r#"{
            "models": [
                {
                    "name": "Order",
                    "schema": {"Object": {
                        "type_name": "Order",
                        "fields": [
                            {"name": "Id", "schema": {"Scalar": "Number"}},
                            {"name": "Lines", "schema": {"Collection": {
                                "element": {"Scalar": "String"},
                                "required": true
                            }}}
                        ]
                    }}
                }
            ]
        }"#;
        let registry = ModelRegistry::from_declarations(declarations.as_bytes()).unwrap();
        assert!(registry.contains("Order"));
        assert!(registry.required_collections("Order").contains("Lines"));

        let err = ModelRegistry::from_declarations(b"{broken");
        assert!(err.is_err());
    }

    #[test]
    fn test_scalar_render() {
        assert_eq!(Scalar::Number(42.0).render(), "42");
        assert_eq!(Scalar::Number(1.5).render(), "1.5");
        assert_eq!(Scalar::Bool(true).render(), "true");
        assert_eq!(Scalar::String("x".into()).render(), "x");
    }
}
