use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use frags_core::{Runner, Settings, ToolsConfig};

/// Shared state for every handler. Each request is an independent run.
pub struct AppStateInner {
    pub runner: Runner,
    pub tools: ToolsConfig,
    pub plans_dir: PathBuf,
    /// Requests must carry this in `x-api-key` when set.
    pub api_key: Option<String>,
    pub run_timeout: Duration,
}

pub type AppState = Arc<AppStateInner>;

impl AppStateInner {
    pub fn new(settings: &Settings, runner: Runner, tools: ToolsConfig) -> Self {
        Self {
            runner,
            tools,
            plans_dir: settings.plans_dir.clone(),
            api_key: settings.web_api_key.clone(),
            run_timeout: settings.timeout,
        }
    }
}
