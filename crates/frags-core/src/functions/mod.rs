//! Function registry - the flat namespace of callables offered to the model.
//!
//! Three sources feed it:
//!   1. local functions registered by the embedding program
//!   2. collections (`fs`, `http`, `postgres`, `sqlite`) enabled in the tools file
//!   3. tools imported from MCP servers, named `<server>__<tool>`
//!
//! Sessions see only the subset their `tools` permissions allow.

pub mod fs;
pub mod http;
pub mod mcp;
pub mod postgres;
pub mod sqlite;
pub mod tools_config;

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::FragsError;
use crate::schema::{Schema, ValidateOptions};

pub use mcp::McpClient;
pub use tools_config::{CollectionConfig, McpServerConfig, ToolsConfig};

/// Separator between a server/collection name and its function name.
pub const NAMESPACE_SEPARATOR: &str = "__";

/// A callable exposed to the model.
#[async_trait]
pub trait Function: Send + Sync {
    fn description(&self) -> &str;

    fn input_schema(&self) -> &Schema;

    /// Run with already-validated arguments. `runner` lets the function call others.
    async fn invoke(
        &self,
        args: Map<String, Value>,
        runner: &RunnerHandle,
    ) -> Result<Map<String, Value>, FragsError>;
}

/// Closure-backed [`Function`].
pub struct SimpleFunction<F> {
    description: String,
    schema: Schema,
    handler: F,
}

impl<F> SimpleFunction<F>
where
    F: Fn(Map<String, Value>) -> Result<Map<String, Value>, FragsError> + Send + Sync + 'static,
{
    pub fn new(description: impl Into<String>, schema: Schema, handler: F) -> Self {
        Self {
            description: description.into(),
            schema,
            handler,
        }
    }
}

#[async_trait]
impl<F> Function for SimpleFunction<F>
where
    F: Fn(Map<String, Value>) -> Result<Map<String, Value>, FragsError> + Send + Sync + 'static,
{
    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> &Schema {
        &self.schema
    }

    async fn invoke(
        &self,
        args: Map<String, Value>,
        _runner: &RunnerHandle,
    ) -> Result<Map<String, Value>, FragsError> {
        (self.handler)(args)
    }
}

/// Kind of a session tool permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    Function,
    Mcp,
    Collection,
    #[serde(alias = "internetSearch")]
    InternetSearch,
}

/// A session's permission to use a function, an MCP server, a collection or search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    /// For `mcp`/`collection`: the function names (without prefix) that may be used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowlist: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Schema>,
}

/// What the model is told about one function.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Schema,
}

/// Functions selected for one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionTools {
    pub functions: Vec<FunctionSpec>,
    pub internet_search: bool,
}

impl SessionTools {
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty() && !self.internet_search
    }
}

/// Name-keyed function table. Read-only once a run starts.
#[derive(Default, Clone)]
pub struct FunctionRegistry {
    functions: IndexMap<String, Arc<dyn Function>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, function: Arc<dyn Function>) {
        let name = name.into();
        if self.functions.insert(name.clone(), function).is_some() {
            tracing::warn!("[Functions] '{}' registered twice, keeping the latest", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Function>> {
        self.functions.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Resolve a session's permissions into concrete function specs.
    pub fn specs_for(&self, tools: &[ToolDefinition]) -> Result<SessionTools, FragsError> {
        let mut selected = SessionTools::default();

        for def in tools {
            match def.tool_type {
                ToolType::InternetSearch => selected.internet_search = true,
                ToolType::Function => {
                    let function = self.functions.get(&def.name).ok_or_else(|| {
                        FragsError::PlanParse(format!("Unknown function '{}'", def.name))
                    })?;
                    push_spec(&mut selected.functions, &def.name, function, def);
                }
                ToolType::Mcp | ToolType::Collection => {
                    let prefix = format!("{}{}", def.name, NAMESPACE_SEPARATOR);
                    let mut matched = 0;
                    for (name, function) in &self.functions {
                        let Some(short) = name.strip_prefix(&prefix) else {
                            continue;
                        };
                        let allowed = def
                            .allowlist
                            .as_ref()
                            .map_or(true, |list| list.iter().any(|a| a == short));
                        if allowed {
                            push_spec(&mut selected.functions, name, function, def);
                            matched += 1;
                        }
                    }
                    if matched == 0 {
                        tracing::warn!(
                            "[Functions] tool permission '{}' matched no registered function",
                            def.name
                        );
                    }
                }
            }
        }
        Ok(selected)
    }
}

fn push_spec(
    out: &mut Vec<FunctionSpec>,
    name: &str,
    function: &Arc<dyn Function>,
    def: &ToolDefinition,
) {
    if out.iter().any(|f| f.name == name) {
        return;
    }
    // A plan-side description only overrides plain functions.
    let description = match (&def.description, def.tool_type) {
        (Some(text), ToolType::Function) => text.clone(),
        _ => function.description().to_string(),
    };
    out.push(FunctionSpec {
        name: name.to_string(),
        description,
        input_schema: function.input_schema().clone(),
    });
}

/// What a function receives to call back into the registry.
#[derive(Clone)]
pub struct RunnerHandle {
    registry: Arc<FunctionRegistry>,
    cancel: CancellationToken,
}

impl RunnerHandle {
    pub fn new(registry: Arc<FunctionRegistry>, cancel: CancellationToken) -> Self {
        Self { registry, cancel }
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Validate `args` strictly and invoke the named function, racing cancellation.
    pub async fn run_function(
        &self,
        name: &str,
        args: Map<String, Value>,
    ) -> Result<Map<String, Value>, FragsError> {
        let function = self
            .registry
            .get(name)
            .ok_or_else(|| FragsError::tool(format!("Unknown function '{}'", name)))?
            .clone();

        function
            .input_schema()
            .validate(&Value::Object(args.clone()), ValidateOptions::strict())
            .map_err(|e| FragsError::tool(format!("Invalid arguments for '{}': {}", name, e)))?;

        tracing::debug!("[Functions] invoking {}", name);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                Err(FragsError::Cancelled(format!("function '{}' interrupted", name)))
            }
            result = function.invoke(args, self) => result,
        }
    }
}

/// Wrap a non-object function result.
pub fn as_result_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("result".to_string(), other);
            map
        }
    }
}

/// Read a required string argument.
pub(crate) fn str_arg<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, FragsError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| FragsError::tool(format!("Missing string argument '{}'", key)))
}

/// Build the registry for a run: local functions plus enabled collections plus MCP imports.
///
/// Returns the MCP clients so the caller can shut them down when the run ends.
pub async fn build_registry(
    local: FunctionRegistry,
    config: &ToolsConfig,
) -> Result<(FunctionRegistry, Vec<Arc<McpClient>>), FragsError> {
    let mut registry = local;

    for (name, collection) in &config.collections {
        if collection.disabled {
            continue;
        }
        let functions = match name.as_str() {
            "fs" => fs::functions(&collection.params)?,
            "http" => http::functions(&collection.params)?,
            "postgres" => postgres::functions(&collection.params)?,
            "sqlite" => sqlite::functions(&collection.params)?,
            other => {
                return Err(FragsError::Config(format!(
                    "Unknown collection '{}' (available: fs, http, postgres, sqlite)",
                    other
                )))
            }
        };
        for (short, function) in functions {
            registry.register(format!("{}{}{}", name, NAMESPACE_SEPARATOR, short), function);
        }
        tracing::info!("[Functions] collection '{}' enabled", name);
    }

    let mut clients = Vec::new();
    for (server, server_config) in &config.mcp_servers {
        let client = Arc::new(McpClient::connect(server, server_config).await?);
        let tools = client.list_tools().await?;
        tracing::info!("[Functions] MCP server '{}' offers {} tools", server, tools.len());
        for tool in tools {
            let name = format!("{}{}{}", server, NAMESPACE_SEPARATOR, tool.name);
            registry.register(name, Arc::new(mcp::McpToolFunction::new(client.clone(), tool)));
        }
        clients.push(client);
    }

    Ok((registry, clients))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaType;
    use serde_json::json;

    fn echo() -> Arc<dyn Function> {
        let schema = Schema::object([("text".to_string(), Schema::of_type(SchemaType::String))])
            .with_required(&["text"]);
        Arc::new(SimpleFunction::new("Echo the text", schema, |args| Ok(args)))
    }

    fn registry() -> FunctionRegistry {
        let mut registry = FunctionRegistry::new();
        registry.register("echo", echo());
        registry.register("fs__read_file", echo());
        registry.register("fs__write_file", echo());
        registry.register("docs__search", echo());
        registry
    }

    fn def(name: &str, tool_type: ToolType, allowlist: Option<&[&str]>) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            tool_type,
            allowlist: allowlist.map(|l| l.iter().map(|s| s.to_string()).collect()),
            description: None,
            input_schema: None,
        }
    }

    #[test]
    fn test_specs_for_filters_by_permission() {
        let tools = registry()
            .specs_for(&[
                def("echo", ToolType::Function, None),
                def("fs", ToolType::Collection, Some(&["read_file"])),
                def("docs", ToolType::Mcp, None),
                def("", ToolType::InternetSearch, None),
            ])
            .unwrap();

        let names: Vec<_> = tools.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "fs__read_file", "docs__search"]);
        assert!(tools.internet_search);
    }

    #[test]
    fn test_unknown_function_permission_is_a_plan_error() {
        let err = registry()
            .specs_for(&[def("nope", ToolType::Function, None)])
            .unwrap_err();
        assert_eq!(err.kind(), "plan-parse");
    }

    #[test]
    fn test_tool_definition_yaml() {
        let def: ToolDefinition =
            serde_yaml::from_str("name: fs\ntype: collection\nallowlist: [read_file]\n").unwrap();
        assert_eq!(def.tool_type, ToolType::Collection);
        assert_eq!(def.allowlist, Some(vec!["read_file".to_string()]));
    }

    #[tokio::test]
    async fn test_build_registry_enables_collections() {
        let config = ToolsConfig::from_value(json!({
            "collections": {
                "postgres": { "params": { "url": "postgres://frags@localhost/frags" } },
                "sqlite": {},
                "http": { "disabled": true }
            }
        }))
        .unwrap();
        let (registry, clients) = build_registry(FunctionRegistry::new(), &config).await.unwrap();
        assert!(clients.is_empty());
        for name in ["postgres__query", "postgres__execute", "sqlite__query", "sqlite__execute"] {
            assert!(registry.get(name).is_some(), "missing {}", name);
        }
        assert!(registry.get("http__get").is_none());

        let config = ToolsConfig::from_value(json!({"collections": {"mongo": {}}})).unwrap();
        let err = build_registry(FunctionRegistry::new(), &config).await.err().unwrap();
        assert_eq!(err.kind(), "config");
        assert!(err.to_string().contains("postgres"));
    }

    #[tokio::test]
    async fn test_run_function_validates_arguments() {
        let handle = RunnerHandle::new(Arc::new(registry()), CancellationToken::new());

        let ok = handle
            .run_function("echo", json!({"text": "hi"}).as_object().unwrap().clone())
            .await
            .unwrap();
        assert_eq!(ok["text"], "hi");

        let err = handle
            .run_function("echo", json!({"text": 5}).as_object().unwrap().clone())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "tool");
        assert!(!err.is_fatal_in_turn());

        let err = handle.run_function("missing", Map::new()).await.unwrap_err();
        assert!(err.to_string().contains("Unknown function"));
    }

    #[tokio::test]
    async fn test_run_function_observes_cancellation() {
        struct Forever;

        #[async_trait]
        impl Function for Forever {
            fn description(&self) -> &str {
                "never returns"
            }
            fn input_schema(&self) -> &Schema {
                static SCHEMA: std::sync::OnceLock<Schema> = std::sync::OnceLock::new();
                SCHEMA.get_or_init(|| Schema::of_type(SchemaType::Object))
            }
            async fn invoke(
                &self,
                _args: Map<String, Value>,
                _runner: &RunnerHandle,
            ) -> Result<Map<String, Value>, FragsError> {
                std::future::pending().await
            }
        }

        let mut registry = FunctionRegistry::new();
        registry.register("forever", Arc::new(Forever));
        let cancel = CancellationToken::new();
        let handle = RunnerHandle::new(Arc::new(registry), cancel.clone());
        cancel.cancel();

        let err = handle.run_function("forever", Map::new()).await.unwrap_err();
        assert_eq!(err.kind(), "cancelled");
    }
}
