//! Plan execution API
//!
//! POST /execute     - Run a plan sent in the request body
//! POST /run/{file}  - Run a plan from the plans directory
//!
//! Both return the progress map as JSON, or stream events over SSE with
//! `?streaming=true&level=<debug|info|warn|error>`.

use std::collections::HashMap;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use frags_core::events::{Event, EventEmitter, EventLevel};
use frags_core::resources::{FileResourceLoader, MemoryResourceLoader, ResourceLoader};
use frags_core::{FragsContext, FragsError, SessionManager, ToolsConfig};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::plans::resolve_plan_path;
use crate::state::AppState;

type SseStream = Pin<Box<dyn tokio_stream::Stream<Item = Result<SseEvent, Infallible>> + Send>>;

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub streaming: bool,
    pub level: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    /// YAML text or an already-parsed plan object.
    pub plan: Value,
    #[serde(default)]
    pub tools: Option<ToolsConfig>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Resource name to base64 content.
    #[serde(default)]
    pub resources: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

/// One prepared run, ready to execute inline or behind an SSE stream.
struct RunJob {
    manager: SessionManager,
    params: Map<String, Value>,
    tools: Option<ToolsConfig>,
    loader: Arc<dyn ResourceLoader>,
}

pub async fn execute_plan(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    Json(body): Json<ExecuteRequest>,
) -> Result<Response, FragsError> {
    let manager = match body.plan {
        Value::String(yaml) => SessionManager::from_yaml(&yaml)?,
        other => SessionManager::from_value(other)?,
    };
    let loader = MemoryResourceLoader::from_base64(&body.resources)?;
    tracing::info!(
        "[Execute] plan with {} sessions, {} uploaded resources",
        manager.session_ids().len(),
        body.resources.len()
    );

    let job = RunJob {
        manager,
        params: body.parameters,
        tools: body.tools,
        loader: Arc::new(loader),
    };
    respond(state, query, job).await
}

pub async fn run_plan_file(
    State(state): State<AppState>,
    Path(file): Path<String>,
    Query(query): Query<StreamQuery>,
    body: Bytes,
) -> Result<Response, FragsError> {
    let request: RunRequest = if body.is_empty() {
        RunRequest::default()
    } else {
        serde_json::from_slice(&body)?
    };

    let path = resolve_plan_path(&state.plans_dir, &file)?;
    let manager = SessionManager::from_file(&path)?;
    let base_dir = path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| state.plans_dir.clone());
    tracing::info!("[Execute] running {}", path.display());

    let job = RunJob {
        manager,
        params: request.parameters,
        tools: None,
        loader: Arc::new(FileResourceLoader::new(base_dir)),
    };
    respond(state, query, job).await
}

async fn respond(state: AppState, query: StreamQuery, job: RunJob) -> Result<Response, FragsError> {
    if query.streaming {
        let level = match query.level.as_deref() {
            Some(level) => level.parse::<EventLevel>()?,
            None => EventLevel::Info,
        };
        return Ok(Sse::new(stream_run(state, job, level))
            .keep_alive(KeepAlive::default())
            .into_response());
    }

    let output = run_job(&state, job, &EventEmitter::disabled(), FragsContext::new()).await?;
    Ok(Json(Value::Object(output)).into_response())
}

async fn run_job(
    state: &AppState,
    job: RunJob,
    events: &EventEmitter,
    ctx: FragsContext,
) -> Result<Map<String, Value>, FragsError> {
    let RunJob {
        mut manager,
        params,
        tools,
        loader,
    } = job;
    let ctx = ctx.with_timeout(state.run_timeout);
    let tools = tools.as_ref().unwrap_or(&state.tools);
    state
        .runner
        .execute(&ctx, &mut manager, params, tools, loader, events)
        .await
}

/// Forward run events as SSE, named by type, then one terminal `result` or `error`.
fn stream_run(state: AppState, job: RunJob, level: EventLevel) -> SseStream {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<SseEvent, Infallible>>(EVENT_BUFFER);

    tokio::spawn(async move {
        let (events, mut event_rx) = EventEmitter::channel(EVENT_BUFFER, level);
        let ctx = FragsContext::new();
        let cancel = ctx.cancel.clone();
        let run = run_job(&state, job, &events, ctx);
        tokio::pin!(run);

        let output = loop {
            tokio::select! {
                biased;
                Some(event) = event_rx.recv() => {
                    if tx.send(Ok(to_sse(&event))).await.is_err() {
                        tracing::info!("[Execute] client disconnected; cancelling run");
                        cancel.cancel();
                    }
                }
                output = &mut run => break output,
            }
        };

        while let Ok(event) = event_rx.try_recv() {
            let _ = tx.send(Ok(to_sse(&event))).await;
        }
        if events.dropped() > 0 {
            tracing::warn!("[Execute] {} events dropped (slow client)", events.dropped());
        }

        let terminal = match output {
            Ok(map) => Event::result(Value::Object(map)),
            Err(e) => Event::failure(&e),
        };
        let _ = tx.send(Ok(to_sse(&terminal))).await;
    });

    Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx))
}

fn to_sse(event: &Event) -> SseEvent {
    SseEvent::default()
        .event(event.event_type.as_str())
        .data(serde_json::to_string(event).unwrap_or_default())
}
