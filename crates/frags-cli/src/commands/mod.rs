//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command. Commands return
//! `Result<_, String>`; the binary prints the error and exits non-zero.

pub mod ask;
pub mod config;
pub mod render;
pub mod run;
pub mod script;
pub mod web;

use std::path::Path;
use std::sync::Arc;

use frags_core::ai::{AiFactory, BackendAiFactory, OpenAiBackend};
use frags_core::transform::StandardScriptEngine;
use frags_core::{Runner, Settings};
use serde_json::{Map, Value};

/// Load settings from `path`. A missing file gets a template written first.
pub fn load_settings(path: &Path) -> Result<Settings, String> {
    Settings::load(path).map_err(|e| e.to_string())
}

/// Factory for the configured OpenAI-compatible endpoint.
pub fn ai_factory(settings: &Settings) -> Result<Arc<dyn AiFactory>, String> {
    let backend = OpenAiBackend::new(settings.openai_config()).map_err(|e| e.to_string())?;
    Ok(Arc::new(
        BackendAiFactory::new(Arc::new(backend)).with_max_tool_rounds(settings.max_tool_rounds),
    ))
}

/// A runner configured from settings around `factory`.
pub fn build_runner(settings: &Settings, factory: Arc<dyn AiFactory>) -> Runner {
    Runner::new(factory)
        .with_script_engine(Arc::new(StandardScriptEngine))
        .with_parallel_workers(settings.parallel_workers)
        .with_env(settings.plan_env())
}

/// Parse repeated `-p key=value` flags. Values stay strings; the plan's
/// parameter schema coerces them.
pub fn parse_params(pairs: &[String]) -> Result<Map<String, Value>, String> {
    let mut params = Map::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("Invalid parameter '{}': expected key=value", pair))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("Invalid parameter '{}': empty key", pair));
        }
        params.insert(key.to_string(), Value::String(value.to_string()));
    }
    Ok(params)
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

pub(crate) fn read_file(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e))
}
