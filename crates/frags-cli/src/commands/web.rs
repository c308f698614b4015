//! `frags web`: Serve the plan API over HTTP.

use std::sync::Arc;

use frags_core::{Runner, Settings, ToolsConfig};
use frags_server::{AppStateInner, ServeMode, ServerConfig};

pub async fn run(
    settings: &Settings,
    runner: Runner,
    tools: ToolsConfig,
    mode: ServeMode,
    host: String,
    port: u16,
) -> Result<(), String> {
    let state = Arc::new(AppStateInner::new(settings, runner, tools));
    let config = ServerConfig {
        host: host.clone(),
        port,
        mode,
    };

    println!("Starting frags server on {}:{}...", host, port);
    if settings.web_api_key.is_none() {
        tracing::warn!("FRAGS_WEB_API_KEY is not set; the API is open");
    }

    let addr = frags_server::start_server(config, state).await?;
    println!("frags server listening on http://{}", addr);

    // Keep the process running until interrupted
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to listen for Ctrl+C: {}", e))?;

    println!("\nShutting down...");
    Ok(())
}
