//! `frags script`: Run a transformer script outside a plan.

use std::path::Path;
use std::sync::Arc;

use frags_core::functions::{FunctionRegistry, RunnerHandle};
use frags_core::transform::script::engine_for_path;
use frags_core::transform::{ScriptEngine, StandardScriptEngine};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::read_file;

pub async fn run_script(file: &Path, args: Option<&str>) -> Result<Value, String> {
    let source = read_file(file)?;
    let args: Value = match args {
        Some(raw) => serde_json::from_str(raw).map_err(|e| format!("--args is not valid JSON: {}", e))?,
        None => Value::Object(Default::default()),
    };
    let engine = engine_for_path(file);
    tracing::debug!("[Script] running {} with engine {}", file.display(), engine);

    let runner = RunnerHandle::new(Arc::new(FunctionRegistry::new()), CancellationToken::new());
    StandardScriptEngine
        .run(engine, &source, args, &runner)
        .await
        .map_err(|e| e.to_string())
}
