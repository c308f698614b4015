//! McpClient - imports tools from an MCP server through the rmcp client.
//!
//! Lifecycle:
//!   1. `connect(name, config)` - spawn the child (stdio) or open a streamable
//!      HTTP transport, then run the initialize handshake
//!   2. `list_tools()`          - every page of `tools/list`
//!   3. `call_tool(name, args)` - `tools/call`
//!   4. `shutdown()`            - cancel the service, which stops the child

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rmcp::model::{CallToolRequestParams, Tool};
use rmcp::service::RunningService;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::{
    ConfigureCommandExt, IntoTransport, StreamableHttpClientTransport, TokioChildProcess,
};
use rmcp::{Peer, RoleClient, ServiceExt};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

use super::{Function, McpServerConfig, RunnerHandle};
use crate::error::FragsError;
use crate::schema::{Schema, SchemaType};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const LOG_EXCERPT_CHARS: usize = 200;

/// A tool advertised by `tools/list`.
#[derive(Debug, Clone)]
pub struct McpTool {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

impl From<Tool> for McpTool {
    fn from(tool: Tool) -> Self {
        Self {
            name: tool.name.into_owned(),
            description: tool.description.map(|d| d.into_owned()),
            input_schema: Value::Object(tool.input_schema.as_ref().clone()),
        }
    }
}

/// A connected MCP server.
pub struct McpClient {
    name: String,
    peer: Peer<RoleClient>,
    service: Mutex<Option<RunningService<RoleClient, ()>>>,
}

impl McpClient {
    pub async fn connect(name: &str, config: &McpServerConfig) -> Result<Self, FragsError> {
        match config {
            McpServerConfig::Stdio { command, args, env } => {
                tracing::info!("[Mcp:{}] spawning: {} {}", name, command, args.join(" "));
                let command_line = tokio::process::Command::new(command).configure(|cmd| {
                    cmd.args(args).envs(env);
                });
                let (transport, stderr) = TokioChildProcess::builder(command_line)
                    .stderr(Stdio::piped())
                    .spawn()
                    .map_err(|e| {
                        FragsError::Resource(format!(
                            "Failed to spawn MCP server '{}' ('{}'): {}",
                            name, command, e
                        ))
                    })?;
                if let Some(stderr) = stderr {
                    let label = name.to_string();
                    tokio::spawn(async move {
                        let mut lines = BufReader::new(stderr).lines();
                        while let Ok(Some(line)) = lines.next_line().await {
                            if !line.trim().is_empty() {
                                tracing::debug!("[Mcp:{} stderr] {}", label, log_excerpt(&line));
                            }
                        }
                    });
                }
                Self::from_transport(name, transport).await
            }
            McpServerConfig::Http { url, headers } => {
                reqwest::Url::parse(url).map_err(|e| {
                    FragsError::Config(format!("Invalid MCP server url '{}': {}", url, e))
                })?;
                let client = reqwest::Client::builder()
                    .default_headers(header_map(headers)?)
                    .build()
                    .map_err(|e| FragsError::Config(format!("HTTP client: {}", e)))?;
                let transport = StreamableHttpClientTransport::with_client(
                    client,
                    StreamableHttpClientTransportConfig::with_uri(url.as_str()),
                );
                Self::from_transport(name, transport).await
            }
        }
    }

    /// Handshake over an already open transport.
    pub async fn from_transport<T, E, A>(name: &str, transport: T) -> Result<Self, FragsError>
    where
        T: IntoTransport<RoleClient, E, A>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let service = ()
            .serve(transport)
            .await
            .map_err(|e| FragsError::Resource(format!("[mcp {}] initialize: {}", name, e)))?;
        tracing::info!(
            "[Mcp:{}] connected to {}",
            name,
            service
                .peer_info()
                .map(|info| info.server_info.name.as_str())
                .unwrap_or("unknown server")
        );
        Ok(Self {
            name: name.to_string(),
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// All tools, across every `tools/list` page.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>, FragsError> {
        let tools = self
            .peer
            .list_all_tools()
            .await
            .map_err(|e| FragsError::Resource(format!("[mcp {}] tools/list: {}", self.name, e)))?;
        Ok(tools.into_iter().map(McpTool::from).collect())
    }

    /// Call a tool; `isError` replies become tool errors.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: Map<String, Value>,
    ) -> Result<Map<String, Value>, FragsError> {
        let request = CallToolRequestParams {
            meta: None,
            name: tool.to_string().into(),
            arguments: Some(arguments),
            task: None,
        };
        let reply = tokio::time::timeout(REQUEST_TIMEOUT, self.peer.call_tool(request))
            .await
            .map_err(|_| {
                FragsError::tool(format!(
                    "[mcp {}] tools/call: timed out after {}s",
                    self.name,
                    REQUEST_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| FragsError::tool(format!("[mcp {}] tools/call: {}", self.name, e)))?;
        let result = serde_json::to_value(&reply)
            .map_err(|e| FragsError::Internal(format!("MCP reply: {}", e)))?;
        let text = collect_text(&result);

        if result["isError"].as_bool().unwrap_or(false) {
            return Err(FragsError::tool(format!("{}__{}: {}", self.name, tool, text)));
        }
        if let Some(Value::Object(structured)) = result.get("structuredContent") {
            return Ok(structured.clone());
        }
        Ok(match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => map,
            _ => {
                let mut map = Map::new();
                map.insert("content".to_string(), Value::String(text));
                map
            }
        })
    }

    pub async fn shutdown(&self) {
        if let Some(service) = self.service.lock().await.take() {
            tracing::info!("[Mcp:{}] stopping server", self.name);
            if let Err(e) = service.cancel().await {
                tracing::warn!("[Mcp:{}] shutdown: {}", self.name, e);
            }
        }
    }
}

fn header_map(headers: &HashMap<String, String>) -> Result<reqwest::header::HeaderMap, FragsError> {
    let mut map = reqwest::header::HeaderMap::new();
    for (name, value) in headers {
        let name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| FragsError::Config(format!("Invalid header name '{}': {}", name, e)))?;
        let value = reqwest::header::HeaderValue::from_str(value)
            .map_err(|e| FragsError::Config(format!("Invalid header value for '{}': {}", name, e)))?;
        map.insert(name, value);
    }
    Ok(map)
}

fn collect_text(result: &Value) -> String {
    result["content"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter(|p| p["type"] == "text")
                .filter_map(|p| p["text"].as_str())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

/// First characters of a server log line, cut on a char boundary.
fn log_excerpt(line: &str) -> String {
    match line.char_indices().nth(LOG_EXCERPT_CHARS) {
        Some((end, _)) => format!("{}…", &line[..end]),
        None => line.to_string(),
    }
}

// ---------------------------------------------------------------------------
// registry adapter
// ---------------------------------------------------------------------------

/// One imported MCP tool exposed as a [`Function`].
pub struct McpToolFunction {
    client: Arc<McpClient>,
    tool: String,
    description: String,
    schema: Schema,
}

impl McpToolFunction {
    pub fn new(client: Arc<McpClient>, tool: McpTool) -> Self {
        let schema = match Schema::from_value(tool.input_schema.clone()) {
            Ok(schema) => schema,
            Err(e) => {
                tracing::warn!(
                    "[Mcp:{}] tool '{}' has an unsupported input schema ({}), accepting any object",
                    client.name(),
                    tool.name,
                    e
                );
                Schema::of_type(SchemaType::Object)
            }
        };
        Self {
            description: tool.description.unwrap_or_default(),
            tool: tool.name,
            client,
            schema,
        }
    }
}

#[async_trait]
impl Function for McpToolFunction {
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
        self.client.call_tool(&self.tool, args).await
    }
}
