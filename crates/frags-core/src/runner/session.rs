//! Drives one session through its phases.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::ai::{Ai, AiFactory, AskRequest};
use crate::error::FragsError;
use crate::events::{Event, EventEmitter};
use crate::functions::{FunctionRegistry, RunnerHandle, SessionTools};
use crate::plan::{Plan, Session};
use crate::resources::{Resource, ResourceCache};
use crate::schema::{Schema, ValidateOptions, ValidationError};
use crate::template::{EvalScope, Evaluator};
use crate::transform::{self, ScriptEngine};

/// Everything the workers of one run share. Read-only once the run starts.
pub(crate) struct RunShared {
    pub plan: Plan,
    /// Output schema with `$ref`s resolved.
    pub schema: Schema,
    pub params: Value,
    pub vars: Value,
    pub env: Value,
    pub tools: HashMap<String, SessionTools>,
    pub registry: Arc<FunctionRegistry>,
    pub ai_factory: Arc<dyn AiFactory>,
    pub script_engine: Arc<dyn ScriptEngine>,
    pub resources: ResourceCache,
    pub events: EventEmitter,
    pub cancel: CancellationToken,
}

/// Run session `id` against its dependencies' outputs and return its slice.
pub(crate) async fn run_session(
    shared: &RunShared,
    id: &str,
    progress: Map<String, Value>,
) -> Result<Map<String, Value>, FragsError> {
    let session = shared
        .plan
        .sessions
        .get(id)
        .ok_or_else(|| FragsError::Internal(format!("Unknown session '{}'", id)))?;

    shared.events.progress("session_start", id, None);
    let result = drive(shared, id, session, progress).await;
    match &result {
        Ok(_) => shared.events.progress("session_end", id, None),
        Err(e) => {
            let mut event = Event::progress("error", id, None);
            event.args["error"] = Value::String(e.to_string());
            shared.events.emit(event);
        }
    }
    result
}

async fn drive(
    shared: &RunShared,
    id: &str,
    session: &Session,
    progress: Map<String, Value>,
) -> Result<Map<String, Value>, FragsError> {
    let evaluator = Evaluator::lenient();
    let mut scope = EvalScope::new()
        .with_params(shared.params.clone())
        .with_vars(shared.vars.clone())
        .with_progress(Value::Object(progress))
        .with_env(shared.env.clone());

    let resources = materialize_resources(shared, session, &evaluator, &scope).await?;

    let mut ai = shared.ai_factory.new_ai();
    let system_prompt = session
        .system_prompt
        .as_deref()
        .or(shared.plan.system_prompt.as_deref());
    if let Some(system_prompt) = system_prompt {
        ai.set_system_prompt(&evaluator.render_scope(system_prompt, &scope)?);
    }
    ai.set_functions(shared.tools.get(id).cloned().unwrap_or_default());

    let runner = RunnerHandle::new(shared.registry.clone(), shared.cancel.clone());
    let session_schema = shared.schema.get_session(id);
    let phases = session_schema.get_phase_indexes();
    let mut pre_prompt = render_pre_prompt(session, &evaluator, &scope)?;
    let mut resources = Some(resources);
    let mut slice = Map::new();

    if phases.is_empty() {
        tracing::info!("[Runner] session '{}' has no output properties; asking without a schema", id);
        let text = compose(pre_prompt.take(), evaluator.render_scope(&session.prompt, &scope)?);
        ai.ask(AskRequest {
            cancel: &shared.cancel,
            text,
            schema: None,
            tools: None,
            runner: &runner,
            resources: resources.take().unwrap_or_default(),
        })
        .await?;
    }

    for phase in phases {
        shared.events.progress("phase_start", id, Some(phase));
        let phase_schema = session_schema.get_phase(phase);

        // Earlier phases of this session are visible to later prompts.
        if let Value::Object(progress) = &mut scope.progress {
            progress.insert(id.to_string(), Value::Object(slice.clone()));
        }
        let text = compose(pre_prompt.take(), evaluator.render_scope(&session.prompt, &scope)?);

        let output = ask_validated(
            ai.as_mut(),
            shared,
            &runner,
            text,
            &phase_schema,
            resources.take().unwrap_or_default(),
        )
        .await?;

        for (key, value) in output {
            if phase_schema.property(&key).is_none() {
                tracing::debug!("[Runner] {}: dropping key '{}' outside phase {}", id, key, phase);
                continue;
            }
            if slice.contains_key(&key) {
                tracing::warn!("[Runner] {}: key '{}' already written; keeping the first value", id, key);
                continue;
            }
            slice.insert(key, value);
        }

        let phase_transformers: Vec<&transform::Transformer> = session.transformers.iter().filter(|t| t.phase == Some(phase)).collect();
        transform::apply_all(phase_transformers, &mut slice, shared.script_engine.as_ref(), &runner).await?;
        shared.events.progress("phase_end", id, Some(phase));
    }

    let session_transformers: Vec<&transform::Transformer> = session.transformers.iter().filter(|t| t.phase.is_none()).collect();
    transform::apply_all(session_transformers, &mut slice, shared.script_engine.as_ref(), &runner).await?;
    Ok(slice)
}

async fn materialize_resources(
    shared: &RunShared,
    session: &Session,
    evaluator: &Evaluator,
    scope: &EvalScope,
) -> Result<Vec<Resource>, FragsError> {
    let mut loaded = Vec::with_capacity(session.resources.len());
    for spec in &session.resources {
        let mut spec = spec.clone();
        spec.identifier = evaluator.render_scope(&spec.identifier, scope)?.trim().to_string();
        if spec.identifier.is_empty() {
            return Err(FragsError::Resource("resource identifier rendered empty".to_string()));
        }
        let resource = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => {
                return Err(FragsError::Cancelled(format!("loading {} interrupted", spec.identifier)));
            }
            resource = shared.resources.materialize(&spec) => resource?,
        };
        loaded.push(resource);
    }
    Ok(loaded)
}

fn render_pre_prompt(
    session: &Session,
    evaluator: &Evaluator,
    scope: &EvalScope,
) -> Result<Option<String>, FragsError> {
    let Some(pre) = &session.pre_prompt else {
        return Ok(None);
    };
    let rendered = pre
        .texts()
        .into_iter()
        .map(|text| evaluator.render_scope(text, scope))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(rendered.join("\n\n")))
}

fn compose(pre_prompt: Option<String>, prompt: String) -> String {
    match pre_prompt {
        Some(pre) if !pre.trim().is_empty() => format!("{}\n\n{}", pre, prompt),
        _ => prompt,
    }
}

/// Ask for one phase; one corrective retry when the reply does not validate.
async fn ask_validated(
    ai: &mut dyn Ai,
    shared: &RunShared,
    runner: &RunnerHandle,
    text: String,
    schema: &Schema,
    resources: Vec<Resource>,
) -> Result<Map<String, Value>, FragsError> {
    let mut text = text;
    let mut resources = resources;
    let mut retried = false;
    loop {
        let reply = ai
            .ask(AskRequest {
                cancel: &shared.cancel,
                text,
                schema: Some(schema),
                tools: None,
                runner,
                resources: std::mem::take(&mut resources),
            })
            .await?;

        match parse_output(&reply, schema) {
            Ok(map) => return Ok(map),
            Err(e) if !retried => {
                tracing::warn!("[Runner] output failed validation, retrying once: {}", e);
                retried = true;
                text = format!("your previous output failed validation: {}", e);
            }
            Err(e) => return Err(FragsError::Validation(e)),
        }
    }
}

/// Parse a model reply as a JSON object and validate it strictly.
///
/// An empty reply contributes nothing to the slice.
pub(crate) fn parse_output(reply: &str, schema: &Schema) -> Result<Map<String, Value>, ValidationError> {
    let body = strip_code_fence(reply);
    if body.is_empty() {
        return Ok(Map::new());
    }
    let value: Value = serde_json::from_str(body).map_err(|e| ValidationError {
        path: String::new(),
        reason: format!("output is not valid JSON ({})", e),
    })?;
    schema.validate(&value, ValidateOptions::strict())?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ValidationError {
            path: String::new(),
            reason: format!("expected a JSON object, got {}", other),
        }),
    }
}

/// Models often wrap JSON in a Markdown fence.
fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
