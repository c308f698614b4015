//! Session dependency graph.
//!
//! Edges come from `dependsOn` plus implicit references: a session whose prompt,
//! pre-prompt or resource identifiers mention `.progress.<other>` depends on it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;

use crate::error::FragsError;
use crate::plan::Session;

fn progress_ref() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|[^A-Za-z0-9_])progress\.([A-Za-z0-9_-]+)").expect("static regex")
    })
}

/// Sessions referenced through `.progress.<name>` in `session`'s templates.
pub fn implicit_dependencies(session: &Session) -> Vec<String> {
    let mut found = Vec::new();
    for source in session.template_sources() {
        for caps in progress_ref().captures_iter(source) {
            let name = caps[1].to_string();
            if !found.contains(&name) {
                found.push(name);
            }
        }
    }
    found
}

#[derive(Debug, Clone)]
pub struct SessionGraph {
    /// Direct dependencies per session, in declaration order.
    deps: IndexMap<String, Vec<String>>,
    /// A topological order; ties keep declaration order.
    order: Vec<String>,
}

impl SessionGraph {
    pub fn build(sessions: &IndexMap<String, Session>) -> Result<Self, FragsError> {
        let mut deps: IndexMap<String, Vec<String>> = IndexMap::new();

        for (id, session) in sessions {
            let mut list: Vec<String> = Vec::new();
            for dep in &session.depends_on {
                if !sessions.contains_key(dep) {
                    return Err(FragsError::PlanParse(format!(
                        "Session '{}' depends on unknown session '{}'",
                        id, dep
                    )));
                }
                if !list.contains(dep) {
                    list.push(dep.clone());
                }
            }
            for dep in implicit_dependencies(session) {
                if dep == *id {
                    continue;
                }
                if !sessions.contains_key(&dep) {
                    tracing::debug!("[Runner] '{}' references progress.{} which is not a session", id, dep);
                    continue;
                }
                if !list.contains(&dep) {
                    list.push(dep);
                }
            }
            deps.insert(id.clone(), list);
        }

        let order = topological_order(&deps)?;
        Ok(Self { deps, order })
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn dependencies(&self, id: &str) -> &[String] {
        self.deps.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Sessions that list `id` as a direct dependency.
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.deps
            .iter()
            .filter(|(_, deps)| deps.iter().any(|d| d == id))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }
}

/// Kahn's algorithm; on a cycle, reports one cycle path.
fn topological_order(deps: &IndexMap<String, Vec<String>>) -> Result<Vec<String>, FragsError> {
    let mut indegree: HashMap<&str, usize> =
        deps.iter().map(|(id, d)| (id.as_str(), d.len())).collect();
    let mut ready: VecDeque<&str> = deps
        .keys()
        .map(String::as_str)
        .filter(|id| indegree[id] == 0)
        .collect();
    let mut order = Vec::with_capacity(deps.len());

    while let Some(id) = ready.pop_front() {
        order.push(id.to_string());
        for (dependent, list) in deps {
            if list.iter().any(|d| d == id) {
                let entry = indegree.entry(dependent.as_str()).or_default();
                *entry -= 1;
                if *entry == 0 {
                    ready.push_back(dependent.as_str());
                }
            }
        }
    }

    if order.len() == deps.len() {
        return Ok(order);
    }

    let done: HashSet<&str> = order.iter().map(String::as_str).collect();
    let cycle = find_cycle(deps, &done).unwrap_or_default();
    Err(FragsError::PlanParse(format!("Dependency cycle: {}", cycle.join(" -> "))))
}

fn find_cycle(deps: &IndexMap<String, Vec<String>>, done: &HashSet<&str>) -> Option<Vec<String>> {
    let start = deps.keys().find(|id| !done.contains(id.as_str()))?;
    let mut path: Vec<&str> = vec![start.as_str()];
    let mut current = start.as_str();
    loop {
        let next = deps[current].iter().find(|d| !done.contains(d.as_str()))?;
        if let Some(pos) = path.iter().position(|p| *p == next.as_str()) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
            cycle.push(next.clone());
            return Some(cycle);
        }
        path.push(next.as_str());
        current = next.as_str();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sessions(yaml: &str) -> IndexMap<String, Session> {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_implicit_and_explicit_edges() {
        let graph = SessionGraph::build(&sessions(
            r#"
writer:
  prompt: "Use {{ .progress.research.facts }}"
  resources: ["{{ .progress.fetch.path }}"]
research:
  prompt: facts
fetch:
  prompt: fetch
  dependsOn: [research]
"#,
        ))
        .unwrap();
        assert_eq!(graph.dependencies("writer"), ["research", "fetch"]);
        assert_eq!(graph.order(), ["research", "fetch", "writer"]);
        assert_eq!(graph.dependents("research"), vec!["writer", "fetch"]);
    }

    #[test]
    fn test_system_prompt_references_are_edges() {
        let graph = SessionGraph::build(&sessions(
            r#"
reviewer:
  systemPrompt: "You review this outline: {{ .progress.outline.points }}"
  prompt: review it
outline:
  prompt: outline
"#,
        ))
        .unwrap();
        assert_eq!(graph.dependencies("reviewer"), ["outline"]);
        assert_eq!(graph.order(), ["outline", "reviewer"]);
    }

    #[test]
    fn test_unknown_dependency() {
        let err = SessionGraph::build(&sessions("a: { prompt: x, dependsOn: [ghost] }")).unwrap_err();
        assert_eq!(err.kind(), "plan-parse");
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_cycle_is_named() {
        let err = SessionGraph::build(&sessions(
            r#"
a: { prompt: "{{ .progress.b.x }}" }
b: { prompt: y, dependsOn: [c] }
c: { prompt: "{{ .progress.a.z }}" }
"#,
        ))
        .unwrap_err();
        assert_eq!(err.kind(), "plan-parse");
        assert_eq!(err.to_string(), "Plan error: Dependency cycle: a -> b -> c -> a");
    }

    #[test]
    fn test_explicit_self_dependency_is_a_cycle() {
        let err = SessionGraph::build(&sessions("a: { prompt: x, dependsOn: [a] }")).unwrap_err();
        assert!(err.to_string().ends_with("a -> a"));
    }

    #[test]
    fn test_self_reference_is_not_an_edge() {
        let graph = SessionGraph::build(&sessions("a: { prompt: \"{{ .progress.a.x }}\" }")).unwrap();
        assert!(graph.dependencies("a").is_empty());
    }

    #[test]
    fn test_words_ending_in_progress_are_ignored() {
        let graph = SessionGraph::build(&sessions(
            "a: { prompt: \"inprogress.b is a word\" }\nb: { prompt: x }",
        ))
        .unwrap();
        assert!(graph.dependencies("a").is_empty());
    }
}
