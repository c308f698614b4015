//! Plan documents.
//!
//! ```yaml
//! systemPrompt: You are a careful technical writer.
//! parameters:
//!   type: object
//!   required: [topic]
//!   properties:
//!     topic: { type: string }
//! vars:
//!   audience: "{{ .params.topic }} beginners"
//! sessions:
//!   research:
//!     prompt: List three key facts about {{ .params.topic }}.
//!   writer:
//!     dependsOn: [research]
//!     prompt: Write for {{ .vars.audience }} using {{ .progress.research.facts }}.
//! schema:
//!   type: object
//!   required: [facts, article]
//!   properties:
//!     facts: { type: array, items: { type: string }, x-session: research }
//!     article: { type: string, x-session: writer }
//! ```

pub mod manager;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::functions::ToolDefinition;
use crate::resources::Resource;
use crate::schema::Schema;
use crate::transform::Transformer;

pub use manager::SessionManager;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    pub sessions: IndexMap<String, Session>,

    /// The output contract; top-level properties carry `x-session` / `x-phase`.
    pub schema: Schema,

    /// Named components referenced through `$ref`.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub schemas: IndexMap<String, Schema>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Schema>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub vars: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_prompt: Option<PrePrompt>,

    #[serde(default)]
    pub prompt: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<Resource>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transformers: Vec<Transformer>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

/// One pre-prompt or several, sent in order before the first phase prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrePrompt {
    One(String),
    Many(Vec<String>),
}

impl PrePrompt {
    pub fn texts(&self) -> Vec<&str> {
        match self {
            PrePrompt::One(text) => vec![text.as_str()],
            PrePrompt::Many(texts) => texts.iter().map(String::as_str).collect(),
        }
    }
}

impl Session {
    /// Templates that may reference other sessions' progress.
    pub fn template_sources(&self) -> Vec<&str> {
        let mut sources = vec![self.prompt.as_str()];
        sources.extend(self.system_prompt.as_deref());
        if let Some(pre) = &self.pre_prompt {
            sources.extend(pre.texts());
        }
        sources.extend(self.resources.iter().map(|r| r.identifier.as_str()));
        sources
    }
}
