//! Per-phase and per-session views of an output schema.

use indexmap::IndexMap;

use super::Schema;
use crate::error::FragsError;

/// Session that owns properties carrying no `x-session`.
pub const DEFAULT_SESSION: &str = "default";

impl Schema {
    /// Properties whose `x-phase` equals `phase` (absent means 0).
    pub fn get_phase(&self, phase: i64) -> Schema {
        self.slice(|prop| prop.x_phase.unwrap_or(0) == phase)
    }

    /// Properties owned by `session_id` (absent `x-session` means [`DEFAULT_SESSION`]).
    pub fn get_session(&self, session_id: &str) -> Schema {
        self.slice(|prop| prop.x_session.as_deref().unwrap_or(DEFAULT_SESSION) == session_id)
    }

    /// Sorted, de-duplicated phase indexes used by the top-level properties.
    pub fn get_phase_indexes(&self) -> Vec<i64> {
        let mut phases: Vec<i64> = self
            .properties
            .iter()
            .flat_map(|props| props.values())
            .map(|prop| prop.x_phase.unwrap_or(0))
            .collect();
        phases.sort_unstable();
        phases.dedup();
        phases
    }

    /// Session ids referenced by the top-level properties, in first-seen order.
    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for prop in self.properties.iter().flat_map(|props| props.values()) {
            let id = prop.x_session.as_deref().unwrap_or(DEFAULT_SESSION);
            if !ids.iter().any(|known| known == id) {
                ids.push(id.to_string());
            }
        }
        ids
    }

    /// Check that every `x-session` names a declared session and every `x-phase` is
    /// non-negative.
    pub fn check_extensions<S: AsRef<str>>(&self, sessions: &[S]) -> Result<(), FragsError> {
        let declared = |id: &str| sessions.iter().any(|s| s.as_ref() == id);
        for (name, prop) in self.properties.iter().flat_map(|props| props.iter()) {
            if let Some(phase) = prop.x_phase {
                if phase < 0 {
                    return Err(FragsError::PlanParse(format!(
                        "Property '{}' has negative x-phase {}",
                        name, phase
                    )));
                }
            }
            let owner = prop.x_session.as_deref().unwrap_or(DEFAULT_SESSION);
            if !declared(owner) {
                return Err(FragsError::PlanParse(format!(
                    "Property '{}' belongs to session '{}' which is not declared",
                    name, owner
                )));
            }
        }
        Ok(())
    }

    /// Shallow copy keeping only the top-level properties accepted by `keep`.
    fn slice(&self, keep: impl Fn(&Schema) -> bool) -> Schema {
        let Some(props) = self.properties.as_ref() else {
            return Schema {
                properties: None,
                required: Vec::new(),
                ..self.clone()
            };
        };

        let mut names: Vec<&String> = props
            .iter()
            .filter(|(_, prop)| keep(prop))
            .map(|(name, _)| name)
            .collect();
        names.sort_by_key(|name| self.ordering_rank(name));

        let selected: IndexMap<String, Schema> = names
            .iter()
            .map(|name| ((*name).clone(), props[name.as_str()].clone()))
            .collect();

        Schema {
            required: self
                .required
                .iter()
                .filter(|r| selected.contains_key(r.as_str()))
                .cloned()
                .collect(),
            property_ordering: self
                .property_ordering
                .iter()
                .filter(|o| selected.contains_key(o.as_str()))
                .cloned()
                .collect(),
            properties: Some(selected),
            ..self.clone()
        }
    }

    /// Sort key: position in `propertyOrdering` first, original order for the rest.
    /// `sort_by_key` is stable, so unlisted keys keep declaration order.
    fn ordering_rank(&self, name: &str) -> usize {
        self.property_ordering
            .iter()
            .position(|o| o == name)
            .unwrap_or(self.property_ordering.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Schema {
        Schema::from_yaml(
            r#"
type: object
required: [title, body, score, summary]
propertyOrdering: [body]
properties:
  title:   { type: string, x-session: writer }
  summary: { type: string, x-session: writer, x-phase: 1 }
  score:   { type: integer, x-session: critic }
  notes:   { type: string }
  body:    { type: string, x-session: writer }
"#,
        )
        .unwrap()
    }

    fn keys(schema: &Schema) -> Vec<String> {
        schema
            .properties
            .as_ref()
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_get_phase_filters_and_orders() {
        let schema = sample();
        let phase0 = schema.get_phase(0);
        assert_eq!(keys(&phase0), vec!["body", "title", "score", "notes"]);
        assert_eq!(phase0.required, vec!["title", "body", "score"]);

        let phase1 = schema.get_phase(1);
        assert_eq!(keys(&phase1), vec!["summary"]);
        assert_eq!(phase1.required, vec!["summary"]);
        assert!(phase1.property_ordering.is_empty());
    }

    #[test]
    fn test_get_session_uses_default_for_untagged() {
        let schema = sample();
        assert_eq!(keys(&schema.get_session("writer")), vec!["body", "title", "summary"]);
        assert_eq!(keys(&schema.get_session(DEFAULT_SESSION)), vec!["notes"]);
        assert!(keys(&schema.get_session("nobody")).is_empty());
    }

    #[test]
    fn test_slices_partition_the_schema() {
        let schema = sample();
        let mut seen = Vec::new();
        for session in schema.session_ids() {
            let by_session = schema.get_session(&session);
            for phase in by_session.get_phase_indexes() {
                seen.extend(keys(&by_session.get_phase(phase)));
            }
        }
        seen.sort();
        let mut all = keys(&schema);
        all.sort();
        assert_eq!(seen, all);
    }

    #[test]
    fn test_phase_indexes_and_session_ids() {
        let schema = sample();
        assert_eq!(schema.get_phase_indexes(), vec![0, 1]);
        assert_eq!(schema.session_ids(), vec!["writer", "critic", "default"]);
    }

    #[test]
    fn test_check_extensions() {
        let schema = sample();
        assert!(schema
            .check_extensions(&["writer", "critic", DEFAULT_SESSION])
            .is_ok());

        let err = schema.check_extensions(&["writer", "critic"]).unwrap_err();
        assert!(err.to_string().contains("default"));

        let negative = Schema::from_yaml("type: object\nproperties:\n  a: { type: string, x-phase: -1 }\n")
            .unwrap();
        assert_eq!(
            negative.check_extensions(&[DEFAULT_SESSION]).unwrap_err().kind(),
            "plan-parse"
        );
    }
}
