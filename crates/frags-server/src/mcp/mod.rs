//! MCP server surface using the official Rust SDK (rmcp).
//!
//! Exposes the plans directory as two tools so an assistant can discover and
//! run plans over streamable HTTP.

use std::sync::Arc;

use frags_core::resources::FileResourceLoader;
use frags_core::{EventEmitter, FragsContext, SessionManager};
use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router,
    transport::streamable_http_server::{session::local::LocalSessionManager, StreamableHttpService},
    ErrorData, ServerHandler,
};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::plans::{list_plans, resolve_plan_path};
use crate::state::AppState;

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct RunPlanArgs {
    /// Plan name in the plans directory, with or without extension.
    pub name: String,
    /// Plan parameters as a JSON object.
    #[serde(default)]
    pub parameters: Option<Value>,
}

#[derive(Clone)]
pub struct FragsMcpServer {
    state: AppState,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl FragsMcpServer {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "List the plans available to frags_run_plan")]
    async fn frags_list_plans(&self) -> Result<CallToolResult, ErrorData> {
        let plans = list_plans(&self.state.plans_dir)
            .map_err(|e| ErrorData::internal_error(e.to_string(), None))?;
        let json = serde_json::to_string_pretty(&plans).unwrap_or_default();
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(description = "Run a plan by name and return its output as JSON")]
    async fn frags_run_plan(
        &self,
        Parameters(args): Parameters<RunPlanArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        let params = match args.parameters {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(ErrorData::invalid_params("parameters must be an object", None));
            }
        };
        let path = resolve_plan_path(&self.state.plans_dir, &args.name)
            .map_err(|e| ErrorData::invalid_params(e.to_string(), None))?;
        let mut manager = SessionManager::from_file(&path)
            .map_err(|e| ErrorData::invalid_params(e.to_string(), None))?;
        let base_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| self.state.plans_dir.clone());

        tracing::info!("[MCP] running plan {}", args.name);
        let ctx = FragsContext::new().with_timeout(self.state.run_timeout);
        let result = self
            .state
            .runner
            .execute(
                &ctx,
                &mut manager,
                params,
                &self.state.tools,
                Arc::new(FileResourceLoader::new(base_dir)),
                &EventEmitter::disabled(),
            )
            .await;

        match result {
            Ok(output) => {
                let json = serde_json::to_string_pretty(&output).unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text(json)]))
            }
            // Run failures go back to the assistant as tool errors, not protocol errors.
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        }
    }
}

#[tool_handler]
impl ServerHandler for FragsMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Frags plan runner. List plans with frags_list_plans, then run one \
                 with frags_run_plan."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// Streamable HTTP service to mount at `/mcp`.
pub fn service(state: AppState) -> StreamableHttpService<FragsMcpServer, LocalSessionManager> {
    StreamableHttpService::new(
        move || Ok(FragsMcpServer::new(state.clone())),
        LocalSessionManager::default().into(),
        Default::default(),
    )
}
