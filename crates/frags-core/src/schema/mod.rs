//! Extended JSON Schema used to describe plan outputs and parameters.
//!
//! Besides the usual validation keywords, top-level output properties may carry
//! two extensions that partition a single output object:
//!
//! ```yaml
//! schema:
//!   type: object
//!   required: [title, body]
//!   properties:
//!     title:
//!       type: string
//!       x-session: writer
//!       x-phase: 0
//!     body:
//!       type: string
//!       x-session: writer
//!       x-phase: 1
//! ```
//!
//! `x-session` assigns a property to the session producing it, `x-phase` to the
//! ordered generation step inside that session.

pub mod resolve;
pub mod slice;
pub mod validate;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub use slice::DEFAULT_SESSION;
pub use validate::{ValidateOptions, ValidationError};

/// Primitive type names recognised in `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    #[serde(alias = "OBJECT")]
    Object,
    #[serde(alias = "ARRAY")]
    Array,
    #[serde(alias = "STRING")]
    String,
    #[serde(alias = "NUMBER")]
    Number,
    #[serde(alias = "INTEGER")]
    Integer,
    #[serde(alias = "BOOLEAN")]
    Boolean,
    #[serde(alias = "NULL")]
    Null,
}

impl std::fmt::Display for SchemaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SchemaType::Object => "object",
            SchemaType::Array => "array",
            SchemaType::String => "string",
            SchemaType::Number => "number",
            SchemaType::Integer => "integer",
            SchemaType::Boolean => "boolean",
            SchemaType::Null => "null",
        };
        f.write_str(name)
    }
}

/// A schema node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<SchemaType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<IndexMap<String, Schema>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,

    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_properties: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_properties: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any_of: Vec<Schema>,

    #[serde(rename = "$ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub property_ordering: Vec<String>,

    #[serde(rename = "x-phase", default, skip_serializing_if = "Option::is_none")]
    pub x_phase: Option<i64>,

    #[serde(rename = "x-session", default, skip_serializing_if = "Option::is_none")]
    pub x_session: Option<String>,

    /// Name of the component this node was expanded from, kept so that a second
    /// resolve pass treats the subtree as already inside that ref.
    #[serde(skip)]
    pub(crate) resolved_from: Option<String>,
}

impl Schema {
    /// An object schema with the given properties (all optional).
    pub fn object(properties: impl IntoIterator<Item = (String, Schema)>) -> Self {
        Self {
            schema_type: Some(SchemaType::Object),
            properties: Some(properties.into_iter().collect()),
            ..Default::default()
        }
    }

    /// A schema with only a type set.
    pub fn of_type(schema_type: SchemaType) -> Self {
        Self {
            schema_type: Some(schema_type),
            ..Default::default()
        }
    }

    pub fn with_required(mut self, required: &[&str]) -> Self {
        self.required = required.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable.unwrap_or(false)
    }

    pub fn property(&self, name: &str) -> Option<&Schema> {
        self.properties.as_ref().and_then(|p| p.get(name))
    }

    pub fn has_properties(&self) -> bool {
        self.properties.as_ref().is_some_and(|p| !p.is_empty())
    }

    /// Parse a schema from a YAML (or JSON) string.
    pub fn from_yaml(yaml: &str) -> Result<Self, String> {
        serde_yaml::from_str(yaml).map_err(|e| format!("Failed to parse schema: {}", e))
    }

    /// Build a schema from an arbitrary JSON value (e.g. an MCP tool `inputSchema`).
    pub fn from_value(value: serde_json::Value) -> Result<Self, String> {
        serde_json::from_value(value).map_err(|e| format!("Invalid schema: {}", e))
    }

    /// JSON rendering suitable for sending upstream: the `x-phase` / `x-session`
    /// extensions are removed at every depth.
    pub fn to_upstream(&self) -> serde_json::Value {
        let mut clean = self.clone();
        clean.strip_extensions();
        serde_json::to_value(&clean).unwrap_or(serde_json::Value::Null)
    }

    fn strip_extensions(&mut self) {
        self.x_phase = None;
        self.x_session = None;
        if let Some(props) = self.properties.as_mut() {
            for prop in props.values_mut() {
                prop.strip_extensions();
            }
        }
        if let Some(items) = self.items.as_mut() {
            items.strip_extensions();
        }
        for branch in &mut self.any_of {
            branch.strip_extensions();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extended_schema() {
        let schema = Schema::from_yaml(
            r#"
type: object
required: [title]
propertyOrdering: [body, title]
properties:
  title:
    type: string
    x-session: writer
    x-phase: 0
  body:
    type: STRING
    x-phase: 1
"#,
        )
        .unwrap();

        assert_eq!(schema.schema_type, Some(SchemaType::Object));
        let props = schema.properties.as_ref().unwrap();
        let keys: Vec<_> = props.keys().cloned().collect();
        assert_eq!(keys, vec!["title", "body"]);
        assert_eq!(props["title"].x_session.as_deref(), Some("writer"));
        assert_eq!(props["body"].schema_type, Some(SchemaType::String));
        assert_eq!(schema.property_ordering, vec!["body", "title"]);
    }

    #[test]
    fn test_to_upstream_strips_extensions() {
        let schema = Schema::from_yaml(
            r#"
type: object
properties:
  title: { type: string, x-session: a, x-phase: 2 }
"#,
        )
        .unwrap();

        let upstream = schema.to_upstream();
        let text = upstream.to_string();
        assert!(!text.contains("x-phase"));
        assert!(!text.contains("x-session"));
        assert_eq!(upstream["properties"]["title"]["type"], "string");
    }
}
