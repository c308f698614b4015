//! `$ref` resolution against named schema components.

use std::collections::HashSet;

use indexmap::IndexMap;

use super::Schema;
use crate::error::FragsError;

const REF_PREFIXES: &[&str] = &[
    "#/components/schemas/",
    "#/schemas/",
    "#/$defs/",
    "#/definitions/",
];

/// Extract the component name from a ref string.
pub fn ref_name(reference: &str) -> Option<&str> {
    REF_PREFIXES
        .iter()
        .find_map(|prefix| reference.strip_prefix(prefix))
        .filter(|name| !name.is_empty())
}

impl Schema {
    /// Substitute every `$ref` in place with a copy of the referenced component.
    ///
    /// Re-entering a ref that is currently being expanded is a no-op, so recursive
    /// components are expanded exactly once and keep an inner `$ref`.
    pub fn resolve(&mut self, components: &IndexMap<String, Schema>) -> Result<(), FragsError> {
        let mut visiting = HashSet::new();
        resolve_node(self, components, &mut visiting)
    }
}

fn resolve_node(
    node: &mut Schema,
    components: &IndexMap<String, Schema>,
    visiting: &mut HashSet<String>,
) -> Result<(), FragsError> {
    if let Some(reference) = node.reference.clone() {
        let name = ref_name(&reference)
            .ok_or_else(|| FragsError::PlanParse(format!("Unsupported $ref '{}'", reference)))?
            .to_string();

        if visiting.contains(&name) {
            return Ok(());
        }

        let target = components.get(&name).ok_or_else(|| {
            FragsError::PlanParse(format!(
                "Unknown schema component '{}' (available: {:?})",
                name,
                components.keys().collect::<Vec<_>>()
            ))
        })?;

        let mut expanded = target.clone();
        expanded.reference = target.reference.clone();
        expanded.x_phase = node.x_phase.or(expanded.x_phase);
        expanded.x_session = node.x_session.clone().or(expanded.x_session);
        if node.description.is_some() {
            expanded.description = node.description.clone();
        }
        if node.nullable.is_some() {
            expanded.nullable = node.nullable;
        }
        expanded.resolved_from = Some(name.clone());
        *node = expanded;

        visiting.insert(name.clone());
        let result = resolve_node(node, components, visiting);
        visiting.remove(&name);
        return result;
    }

    let marker = node.resolved_from.clone();
    let entered = match &marker {
        Some(name) => visiting.insert(name.clone()),
        None => false,
    };

    let result = resolve_children(node, components, visiting);

    if entered {
        if let Some(name) = &marker {
            visiting.remove(name);
        }
    }
    result
}

fn resolve_children(
    node: &mut Schema,
    components: &IndexMap<String, Schema>,
    visiting: &mut HashSet<String>,
) -> Result<(), FragsError> {
    if let Some(props) = node.properties.as_mut() {
        for prop in props.values_mut() {
            resolve_node(prop, components, visiting)?;
        }
    }
    if let Some(items) = node.items.as_mut() {
        resolve_node(items, components, visiting)?;
    }
    for branch in &mut node.any_of {
        resolve_node(branch, components, visiting)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn components(yaml: &str) -> IndexMap<String, Schema> {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_ref_name() {
        assert_eq!(ref_name("#/components/schemas/Person"), Some("Person"));
        assert_eq!(ref_name("#/$defs/Node"), Some("Node"));
        assert_eq!(ref_name("https://example.com/x"), None);
    }

    #[test]
    fn test_resolve_preserves_extensions_of_referring_node() {
        let comps = components(
            r#"
Person:
  type: object
  required: [name]
  properties:
    name: { type: string }
"#,
        );
        let mut schema = Schema::from_yaml(
            r#"
type: object
properties:
  author:
    $ref: '#/components/schemas/Person'
    x-session: research
    x-phase: 2
"#,
        )
        .unwrap();

        schema.resolve(&comps).unwrap();
        let author = schema.property("author").unwrap();
        assert_eq!(author.reference, None);
        assert_eq!(author.required, vec!["name"]);
        assert_eq!(author.x_session.as_deref(), Some("research"));
        assert_eq!(author.x_phase, Some(2));
    }

    #[test]
    fn test_recursive_ref_is_expanded_once() {
        let comps = components(
            r#"
Node:
  type: object
  properties:
    label: { type: string }
    children:
      type: array
      items: { $ref: '#/components/schemas/Node' }
"#,
        );
        let mut schema = Schema::from_yaml(
            r#"
type: object
properties:
  tree: { $ref: '#/components/schemas/Node' }
"#,
        )
        .unwrap();

        schema.resolve(&comps).unwrap();
        let tree = schema.property("tree").unwrap();
        assert_eq!(tree.schema_type, Some(super::super::SchemaType::Object));
        let inner = tree.property("children").unwrap().items.as_ref().unwrap();
        assert_eq!(inner.reference.as_deref(), Some("#/components/schemas/Node"));
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let comps = components(
            r#"
Node:
  type: object
  properties:
    next: { $ref: '#/schemas/Node' }
Leaf:
  type: string
  minLength: 1
"#,
        );
        let mut schema = Schema::from_yaml(
            r#"
type: object
properties:
  head: { $ref: '#/schemas/Node', x-phase: 1 }
  leaf: { $ref: '#/schemas/Leaf' }
"#,
        )
        .unwrap();

        schema.resolve(&comps).unwrap();
        let once = schema.clone();
        schema.resolve(&comps).unwrap();
        assert_eq!(schema, once);
    }

    #[test]
    fn test_unknown_component_is_a_plan_error() {
        let mut schema = Schema::from_yaml(r##"{ "$ref": "#/schemas/Missing" }"##).unwrap();
        let err = schema.resolve(&IndexMap::new()).unwrap_err();
        assert_eq!(err.kind(), "plan-parse");
    }
}
