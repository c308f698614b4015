//! Frags Server: HTTP surface for the plan runner.
//!
//! Provides:
//! - `POST /execute` and `POST /run/{file}` (JSON or SSE progress) via axum
//! - MCP (Model Context Protocol) server via rmcp at `/mcp`
//! - optional `x-api-key` authentication
//!
//! All plan semantics live in `frags-core`; this crate only adapts requests.

pub mod api;
pub mod mcp;
pub mod plans;
pub mod state;

use std::net::SocketAddr;
use std::str::FromStr;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use self::state::{AppState, AppStateInner};

/// Which routes a server exposes besides `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeMode {
    /// `/execute` and `/run/{file}`.
    Execute,
    /// `/run/{file}` and the MCP endpoint.
    Run,
}

impl FromStr for ServeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "execute" => Ok(ServeMode::Execute),
            "run" => Ok(ServeMode::Run),
            other => Err(format!("Unknown server mode '{}' (expected execute or run)", other)),
        }
    }
}

/// Configuration for the frags web server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub mode: ServeMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            mode: ServeMode::Execute,
        }
    }
}

/// The full application router for `mode`.
pub fn build_router(state: AppState, mode: ServeMode) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api::api_router(state.clone(), mode))
        .route("/health", axum::routing::get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve in a background task.
///
/// Returns the actual address the server is listening on.
pub async fn start_server(config: ServerConfig, state: AppState) -> Result<SocketAddr, String> {
    let app = build_router(state, config.mode);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;

    let local_addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to get local address: {}", e))?;

    tracing::info!("frags server ({:?} mode) listening on {}", config.mode, local_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok(local_addr)
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "server": "frags-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
