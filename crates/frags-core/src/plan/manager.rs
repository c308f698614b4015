//! SessionManager - owns a parsed plan and its evaluated vars.

use std::path::Path;

use serde_json::{Map, Value};

use super::{Plan, Session};
use crate::error::FragsError;

#[derive(Debug, Clone)]
pub struct SessionManager {
    plan: Plan,
}

impl SessionManager {
    pub fn new(plan: Plan) -> Result<Self, FragsError> {
        let manager = Self { plan };
        manager.check()?;
        Ok(manager)
    }

    /// Parse a plan from YAML (JSON is accepted as well).
    pub fn from_yaml(yaml: &str) -> Result<Self, FragsError> {
        let plan: Plan = serde_yaml::from_str(yaml)
            .map_err(|e| FragsError::PlanParse(format!("Failed to parse plan YAML: {}", e)))?;
        Self::new(plan)
    }

    pub fn from_value(value: Value) -> Result<Self, FragsError> {
        let plan: Plan = serde_json::from_value(value)
            .map_err(|e| FragsError::PlanParse(format!("Invalid plan: {}", e)))?;
        Self::new(plan)
    }

    pub fn from_file(path: &Path) -> Result<Self, FragsError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            FragsError::PlanParse(format!("Failed to read plan '{}': {}", path.display(), e))
        })?;
        tracing::debug!("[Plan] loaded {}", path.display());
        Self::from_yaml(&text)
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn session(&self, id: &str) -> Option<&Session> {
        self.plan.sessions.get(id)
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.plan.sessions.keys().cloned().collect()
    }

    pub fn vars(&self) -> &Map<String, Value> {
        &self.plan.vars
    }

    /// Replace the vars map (after evaluation).
    pub fn set_vars(&mut self, vars: Map<String, Value>) {
        self.plan.vars = vars;
    }

    /// Structural checks that need no parameters.
    fn check(&self) -> Result<(), FragsError> {
        if self.plan.sessions.is_empty() {
            return Err(FragsError::PlanParse("Plan declares no sessions".to_string()));
        }
        let declared = self.session_ids();
        self.plan.schema.check_extensions(&declared)?;

        for (id, session) in &self.plan.sessions {
            if session.prompt.trim().is_empty() {
                return Err(FragsError::PlanParse(format!("Session '{}' has an empty prompt", id)));
            }
            for transformer in &session.transformers {
                transformer.check()?;
                if let Some(phase) = transformer.phase {
                    let phases = self.plan.schema.get_session(id).get_phase_indexes();
                    if !phases.contains(&phase) {
                        return Err(FragsError::PlanParse(format!(
                            "Session '{}': transformer '{}' targets phase {} which has no properties",
                            id,
                            transformer.label(),
                            phase
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
