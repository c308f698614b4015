//! The tools file: MCP servers to import and collections to enable.
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "docs": { "command": "docs-mcp", "args": ["--stdio"] },
//!     "remote": { "url": "https://mcp.example.com/mcp" }
//!   },
//!   "collections": {
//!     "fs": { "params": { "root": "./workspace" } },
//!     "sqlite": { "disabled": true }
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FragsError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsConfig {
    #[serde(default)]
    pub mcp_servers: IndexMap<String, McpServerConfig>,
    #[serde(default)]
    pub collections: IndexMap<String, CollectionConfig>,
}

/// How to reach one MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum McpServerConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl ToolsConfig {
    pub fn from_json(json: &str) -> Result<Self, FragsError> {
        serde_json::from_str(json)
            .map_err(|e| FragsError::Config(format!("Invalid tools file: {}", e)))
    }

    pub fn from_value(value: Value) -> Result<Self, FragsError> {
        serde_json::from_value(value)
            .map_err(|e| FragsError::Config(format!("Invalid tools config: {}", e)))
    }

    pub fn from_file(path: &Path) -> Result<Self, FragsError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            FragsError::Config(format!("Failed to read tools file '{}': {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    pub fn is_empty(&self) -> bool {
        self.mcp_servers.is_empty() && self.collections.is_empty()
    }
}
