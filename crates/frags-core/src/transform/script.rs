//! Script engines used by `script` transformers and the `script` command.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{javascript, jsonata};
use crate::error::FragsError;
use crate::functions::RunnerHandle;
use crate::template::Evaluator;

/// Runs transformer scripts. Implementations get `args` and may call back into
/// the function registry through `runner` (the `runFunction` bridge); they must
/// not perform other I/O.
#[async_trait]
pub trait ScriptEngine: Send + Sync {
    async fn run(
        &self,
        engine: &str,
        source: &str,
        args: Value,
        runner: &RunnerHandle,
    ) -> Result<Value, FragsError>;
}

/// Rejects every script.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopScriptEngine;

#[async_trait]
impl ScriptEngine for NoopScriptEngine {
    async fn run(
        &self,
        engine: &str,
        _source: &str,
        _args: Value,
        _runner: &RunnerHandle,
    ) -> Result<Value, FragsError> {
        Err(FragsError::Config(format!(
            "No script engine available for '{}'",
            engine
        )))
    }
}

/// Engine names served by [`TemplateScriptEngine`].
pub const TEMPLATE_ENGINES: &[&str] = &["minijinja", "jinja", "template"];

/// Renders the script as a template over `{ args }` and parses the output as JSON
/// (falling back to the trimmed text).
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateScriptEngine;

#[async_trait]
impl ScriptEngine for TemplateScriptEngine {
    async fn run(
        &self,
        engine: &str,
        source: &str,
        args: Value,
        runner: &RunnerHandle,
    ) -> Result<Value, FragsError> {
        if !TEMPLATE_ENGINES.contains(&engine) {
            return NoopScriptEngine.run(engine, source, args, runner).await;
        }
        let rendered = Evaluator::strict().render(source, &json!({ "args": args }))?;
        let trimmed = rendered.trim();
        Ok(serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string())))
    }
}

/// Every built-in engine: JavaScript (boa), JSONata and templates.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardScriptEngine;

#[async_trait]
impl ScriptEngine for StandardScriptEngine {
    async fn run(
        &self,
        engine: &str,
        source: &str,
        args: Value,
        runner: &RunnerHandle,
    ) -> Result<Value, FragsError> {
        if javascript::JAVASCRIPT_ENGINES.contains(&engine) {
            return run_javascript(source, args, runner).await;
        }
        if engine == "jsonata" {
            return jsonata::evaluate(source, &args);
        }
        TemplateScriptEngine.run(engine, source, args, runner).await
    }
}

/// boa is synchronous, so the script runs on a blocking thread and `runFunction`
/// drives the registry call back on the runtime.
async fn run_javascript(source: &str, args: Value, runner: &RunnerHandle) -> Result<Value, FragsError> {
    let runtime = tokio::runtime::Handle::current();
    let runner = runner.clone();
    let source = source.to_string();
    tokio::task::spawn_blocking(move || {
        javascript::run_script(&source, &args, move |name, params| {
            runtime.block_on(runner.run_function(name, params))
        })
    })
    .await
    .map_err(|e| FragsError::Internal(format!("Script task failed: {}", e)))?
}

/// Engine name implied by a script file extension.
pub fn engine_for_path(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("j2" | "jinja" | "jinja2" | "tpl") => "minijinja",
        Some("jsonata") => "jsonata",
        Some("js" | "mjs") => "javascript",
        _ => "minijinja",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::{FunctionRegistry, SimpleFunction};
    use crate::schema::{Schema, SchemaType};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn handle() -> RunnerHandle {
        RunnerHandle::new(Arc::new(FunctionRegistry::new()), CancellationToken::new())
    }

    fn handle_with_lookup() -> RunnerHandle {
        let schema = Schema::object([("key".to_string(), Schema::of_type(SchemaType::String))])
            .with_required(&["key"]);
        let mut registry = FunctionRegistry::new();
        registry.register(
            "lookup",
            Arc::new(SimpleFunction::new("Look up a key", schema, |args| {
                let key = args["key"].as_str().unwrap_or_default().to_string();
                Ok(json!({"value": key.to_uppercase()}).as_object().cloned().unwrap_or_default())
            })),
        );
        RunnerHandle::new(Arc::new(registry), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_standard_engine_runs_javascript_with_run_function() {
        let out = StandardScriptEngine
            .run(
                "javascript",
                r#"
const found = args.keys.map((key) => runFunction("lookup", { key }).value);
return { n: args.keys.length, found };
"#,
                json!({"keys": ["a", "b"]}),
                &handle_with_lookup(),
            )
            .await
            .unwrap();
        assert_eq!(out, json!({"n": 2, "found": ["A", "B"]}));
    }

    #[tokio::test]
    async fn test_standard_engine_surfaces_registry_validation() {
        let out = StandardScriptEngine
            .run(
                "js",
                r#"try { runFunction("lookup", { key: 5 }); } catch (e) { return e.message; }"#,
                json!({}),
                &handle_with_lookup(),
            )
            .await
            .unwrap();
        assert!(out.as_str().unwrap().contains("Invalid arguments for 'lookup'"));
    }

    #[tokio::test]
    async fn test_standard_engine_other_languages() {
        let out = StandardScriptEngine
            .run("jsonata", "$count(items)", json!({"items": [1, 2, 3]}), &handle())
            .await
            .unwrap();
        assert_eq!(out, json!(3));

        let out = StandardScriptEngine
            .run("minijinja", "{{ args.items | length }}", json!({"items": [1, 2]}), &handle())
            .await
            .unwrap();
        assert_eq!(out, json!(2));

        let err = StandardScriptEngine
            .run("python", "print(1)", json!({}), &handle())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[tokio::test]
    async fn test_template_engine_parses_json_output() {
        let out = TemplateScriptEngine
            .run(
                "minijinja",
                r#"{"count": {{ args.items | length }}, "first": {{ args.items[0] | tojson }}}"#,
                json!({"items": ["a", "b"]}),
                &handle(),
            )
            .await
            .unwrap();
        assert_eq!(out, json!({"count": 2, "first": "a"}));
    }

    #[tokio::test]
    async fn test_noop_engine_rejects() {
        let err = NoopScriptEngine
            .run("javascript", "return 1", json!({}), &handle())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "config");
        let err = TemplateScriptEngine
            .run("javascript", "return 1", json!({}), &handle())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("javascript"));
    }

    #[test]
    fn test_engine_for_path() {
        assert_eq!(engine_for_path(std::path::Path::new("x.j2")), "minijinja");
        assert_eq!(engine_for_path(std::path::Path::new("x.js")), "javascript");
    }
}
