//! Integration tests for the frags-cli commands.
//!
//! These exercise the same code paths as the binary, with a scripted model
//! backend instead of a network endpoint.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use frags_cli::commands;
use frags_cli::commands::run::RunOptions;
use frags_core::ai::{BackendAiFactory, ModelTurn, ScriptedBackend};
use frags_core::output::OutputFormat;
use frags_core::{Runner, Settings};
use serde_json::json;

const PLAN: &str = r#"
parameters:
  type: object
  properties:
    count: { type: integer }
sessions:
  story:
    prompt: "Write {{ .params.count }} lines about {{ .env.FRAGS_MODEL }}"
schema:
  type: object
  properties:
    title:
      type: string
      x-session: story
    lines:
      type: array
      items: { type: string }
      x-session: story
"#;

fn scripted_runner(turns: Vec<ModelTurn>) -> (Runner, Arc<ScriptedBackend>) {
    let backend = Arc::new(ScriptedBackend::new(turns));
    let mut values = std::collections::HashMap::new();
    values.insert("FRAGS_MODEL".to_string(), "test-model".to_string());
    values.insert("FRAGS_API_KEY".to_string(), "sk-hidden".to_string());
    let settings = Settings::from_map(values).unwrap();
    let runner = commands::build_runner(&settings, Arc::new(BackendAiFactory::new(backend.clone())));
    (runner, backend)
}

fn story_reply() -> ModelTurn {
    ModelTurn::json(json!({"title": "Borrowing", "lines": ["one", "two"]}))
}

fn options(plan: &Path, format: OutputFormat) -> RunOptions {
    RunOptions {
        plan: plan.to_path_buf(),
        format,
        template: None,
        output: None,
        params: commands::parse_params(&["count=2".to_string()]).unwrap(),
        tools: None,
        verbose: false,
        timeout: Duration::from_secs(30),
    }
}

fn write_plan(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("story.yaml");
    std::fs::write(&path, PLAN).unwrap();
    path
}

#[tokio::test]
async fn test_run_renders_json_and_passes_env() {
    let dir = tempfile::tempdir().unwrap();
    let plan = write_plan(dir.path());
    let (runner, backend) = scripted_runner(vec![story_reply()]);

    let out = commands::run::execute(&runner, &options(&plan, OutputFormat::Json))
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(value["story"]["title"], "Borrowing");

    let prompt = backend.requests()[0].user_text.clone().unwrap();
    assert_eq!(prompt, "Write 2 lines about test-model");
}

#[tokio::test]
async fn test_run_yaml_is_default_format() {
    let dir = tempfile::tempdir().unwrap();
    let plan = write_plan(dir.path());
    let (runner, _) = scripted_runner(vec![story_reply()]);

    let out = commands::run::execute(&runner, &options(&plan, OutputFormat::default()))
        .await
        .unwrap();
    assert!(out.contains("title: Borrowing"));
}

#[tokio::test]
async fn test_run_with_template_and_output_file() {
    let dir = tempfile::tempdir().unwrap();
    let plan = write_plan(dir.path());
    let template = dir.path().join("story.tpl");
    std::fs::write(
        &template,
        "# {{ .story.title }}\n{{ range .progress.story.lines }}- {{ . }}\n{{ end }}",
    )
    .unwrap();
    let output = dir.path().join("out.md");
    let (runner, _) = scripted_runner(vec![story_reply()]);

    let mut opts = options(&plan, OutputFormat::Template);
    opts.template = Some(template);
    opts.output = Some(output.clone());
    commands::run::run(&runner, opts).await.unwrap();

    let written = std::fs::read_to_string(output).unwrap();
    assert_eq!(written.trim(), "# Borrowing\n- one\n- two");
}

#[tokio::test]
async fn test_run_reports_plan_errors_before_asking() {
    let dir = tempfile::tempdir().unwrap();
    let plan = dir.path().join("bad.yaml");
    std::fs::write(&plan, "sessions:\n  a: { prompt: x, dependsOn: [a] }\nschema: {type: object}\n").unwrap();
    let (runner, backend) = scripted_runner(vec![]);

    let err = commands::run::execute(&runner, &options(&plan, OutputFormat::Json))
        .await
        .unwrap_err();
    assert!(err.contains("Dependency cycle"), "{}", err);
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn test_missing_template_fails_before_run() {
    let dir = tempfile::tempdir().unwrap();
    let plan = write_plan(dir.path());
    let (runner, backend) = scripted_runner(vec![story_reply()]);

    let mut opts = options(&plan, OutputFormat::Template);
    opts.template = Some(dir.path().join("nope.tpl"));
    let err = commands::run::execute(&runner, &opts).await.unwrap_err();
    assert!(err.contains("Failed to read"));
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn test_ask() {
    let backend = Arc::new(ScriptedBackend::new([ModelTurn::text("Hello there")]));
    let factory = BackendAiFactory::new(backend.clone());

    let reply = commands::ask::ask(&factory, "Say hi", Some("Be brief")).await.unwrap();
    assert_eq!(reply, "Hello there");
    let request = &backend.requests()[0];
    assert_eq!(request.system_prompt.as_deref(), Some("Be brief"));
    assert!(request.schema.is_none());

    assert!(commands::ask::ask(&factory, "  ", None).await.is_err());
}

#[test]
fn test_render_saved_output() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("out.yaml");
    std::fs::write(&data, "story:\n  title: Saved\n").unwrap();
    let template = dir.path().join("t.tpl");
    std::fs::write(&template, "Title: {{ .progress.story.title }}").unwrap();

    assert_eq!(commands::render::render(&data, &template).unwrap(), "Title: Saved");
}

#[tokio::test]
async fn test_script_command() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("total.j2");
    std::fs::write(&script, r#"{"total": {{ args.items | sum }}}"#).unwrap();

    let out = commands::script::run_script(&script, Some(r#"{"items": [1, 2, 3]}"#))
        .await
        .unwrap();
    assert_eq!(out, json!({"total": 6}));

    let err = commands::script::run_script(&script, Some("{not json"))
        .await
        .unwrap_err();
    assert!(err.contains("--args"));
}

#[tokio::test]
async fn test_script_command_runs_javascript_and_jsonata() {
    let dir = tempfile::tempdir().unwrap();
    let js = dir.path().join("count.js");
    std::fs::write(&js, "return { n: args.items.length, last: args.items[args.items.length - 1] };").unwrap();
    let out = commands::script::run_script(&js, Some(r#"{"items": ["a", "b", "c"]}"#))
        .await
        .unwrap();
    assert_eq!(out, json!({"n": 3, "last": "c"}));

    let jsonata = dir.path().join("total.jsonata");
    std::fs::write(&jsonata, "$sum(items)").unwrap();
    let out = commands::script::run_script(&jsonata, Some(r#"{"items": [1, 2, 3]}"#))
        .await
        .unwrap();
    assert_eq!(out, json!(6));
}

#[tokio::test]
async fn test_run_applies_javascript_transformer() {
    let dir = tempfile::tempdir().unwrap();
    let plan = dir.path().join("plan.yaml");
    std::fs::write(
        &plan,
        r#"
sessions:
  story:
    prompt: Write a story.
    transformers:
      - script: "return { title: args.title.toUpperCase(), lineCount: args.lines.length }"
schema:
  type: object
  properties:
    title: { type: string, x-session: story }
    lines: { type: array, items: { type: string }, x-session: story }
"#,
    )
    .unwrap();
    let (runner, _backend) = scripted_runner(vec![story_reply()]);

    let out = commands::run::execute(&runner, &options(&plan, OutputFormat::Json))
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(value["story"], json!({"title": "BORROWING", "lineCount": 2}));
}

#[test]
fn test_missing_config_writes_template() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".env");

    let err = commands::load_settings(&path).unwrap_err();
    assert!(err.contains(&path.display().to_string()));
    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("FRAGS_MODEL="));

    // The template is loadable once written.
    let settings = commands::load_settings(&path).unwrap();
    assert_eq!(settings.parallel_workers, 1);
}

#[test]
fn test_config_hides_secrets() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".env");
    std::fs::write(&path, "FRAGS_API_KEY=sk-secret\nFRAGS_MODEL=m1\n").unwrap();
    let settings = commands::load_settings(&path).unwrap();

    let text = commands::config::describe(&path, &settings);
    assert!(text.contains("api_key: <set>"));
    assert!(!text.contains("sk-secret"));
}
