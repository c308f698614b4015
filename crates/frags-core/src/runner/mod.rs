//! Runner: executes a plan end to end.
//!
//! The runner:
//! 1. Checks parameters against the plan's `parameters` schema (strict unless the
//!    context allows loose, string-typed input)
//! 2. Resolves `$ref`s in the output schema and evaluates `vars`
//! 3. Builds the session DAG (explicit `dependsOn` plus `.progress.X` references)
//! 4. Dispatches ready sessions to a fixed pool of workers
//! 5. Merges each finished session slice into the progress map
//!
//! A single scheduler loop owns the progress map. Workers get a snapshot of their
//! dependencies' outputs and send their slice back, so the map needs no lock.
//! The first session error cancels the run and is returned; partial output is not.

pub mod dag;
pub(crate) mod session;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::ai::AiFactory;
use crate::error::FragsError;
use crate::events::EventEmitter;
use crate::functions::{build_registry, FunctionRegistry, ToolsConfig};
use crate::plan::SessionManager;
use crate::resources::{FileResourceLoader, ResourceCache, ResourceLoader};
use crate::schema::ValidateOptions;
use crate::template::{EvalScope, Evaluator};
use crate::transform::{NoopScriptEngine, ScriptEngine};

pub use dag::SessionGraph;
use session::RunShared;

/// Default bound on a whole run.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Cancellation, deadline and parameter typing for one run.
#[derive(Debug, Clone)]
pub struct FragsContext {
    pub cancel: CancellationToken,
    pub timeout: Duration,
    /// Accept strings for numeric and boolean parameters (command-line `-p k=v` input).
    pub loose_params: bool,
}

impl Default for FragsContext {
    fn default() -> Self {
        Self {
            cancel: CancellationToken::new(),
            timeout: DEFAULT_RUN_TIMEOUT,
            loose_params: false,
        }
    }
}

impl FragsContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_loose_params(mut self, loose: bool) -> Self {
        self.loose_params = loose;
        self
    }
}

/// Reusable plan executor; each [`Runner::execute`] call is an independent run.
pub struct Runner {
    ai_factory: Arc<dyn AiFactory>,
    script_engine: Arc<dyn ScriptEngine>,
    functions: FunctionRegistry,
    parallel_workers: usize,
    env: Map<String, Value>,
}

impl Runner {
    pub fn new(ai_factory: Arc<dyn AiFactory>) -> Self {
        Self {
            ai_factory,
            script_engine: Arc::new(NoopScriptEngine),
            functions: FunctionRegistry::new(),
            parallel_workers: 1,
            env: Map::new(),
        }
    }

    pub fn with_script_engine(mut self, engine: Arc<dyn ScriptEngine>) -> Self {
        self.script_engine = engine;
        self
    }

    /// Local functions available to every session that is granted them.
    pub fn with_functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = functions;
        self
    }

    pub fn with_parallel_workers(mut self, workers: usize) -> Self {
        self.parallel_workers = workers;
        self
    }

    /// Environment visible to vars and prompts as `.env`.
    pub fn with_env(mut self, env: Map<String, Value>) -> Self {
        self.env = env;
        self
    }

    /// Run with default context, no tools file and files resolved from the working directory.
    pub async fn run(
        &self,
        manager: &mut SessionManager,
        params: Map<String, Value>,
    ) -> Result<Map<String, Value>, FragsError> {
        let loader: Arc<dyn ResourceLoader> = Arc::new(FileResourceLoader::new("."));
        self.execute(
            &FragsContext::default(),
            manager,
            params,
            &ToolsConfig::default(),
            loader,
            &EventEmitter::disabled(),
        )
        .await
    }

    /// Execute the plan held by `manager` and return the progress map.
    pub async fn execute(
        &self,
        ctx: &FragsContext,
        manager: &mut SessionManager,
        params: Map<String, Value>,
        tools_config: &ToolsConfig,
        loader: Arc<dyn ResourceLoader>,
        events: &EventEmitter,
    ) -> Result<Map<String, Value>, FragsError> {
        let plan = manager.plan();

        let mut params = Value::Object(params);
        if let Some(parameters) = &plan.parameters {
            let mut parameters = parameters.clone();
            parameters.resolve(&plan.schemas)?;
            if ctx.loose_params {
                parameters.coerce_loose(&mut params);
                parameters.validate(&params, ValidateOptions::soft())?;
            } else {
                parameters.validate(&params, ValidateOptions::strict())?;
                // Only fills defaults here: strict input has no strings to convert.
                parameters.coerce_loose(&mut params);
            }
        }

        let mut schema = plan.schema.clone();
        schema.resolve(&plan.schemas)?;

        let env = Value::Object(self.env.clone());
        let scope = EvalScope::new().with_params(params.clone()).with_env(env.clone());
        let vars = Evaluator::strict().evaluate_map_values(manager.vars(), &scope)?;
        manager.set_vars(vars.clone());
        let plan = manager.plan();

        let graph = SessionGraph::build(&plan.sessions)?;
        tracing::info!(
            "[Runner] {} sessions, order: {}",
            graph.len(),
            graph.order().join(", ")
        );

        let (registry, mcp_clients) = build_registry(self.functions.clone(), tools_config).await?;
        let shared = RunShared {
            plan: plan.clone(),
            schema,
            params,
            vars: Value::Object(vars),
            env,
            tools: HashMap::new(),
            registry: Arc::new(registry),
            ai_factory: self.ai_factory.clone(),
            script_engine: self.script_engine.clone(),
            resources: ResourceCache::new(loader),
            events: events.clone(),
            cancel: ctx.cancel.child_token(),
        };
        let result = self.run_sessions(shared, &graph, ctx.timeout).await;

        for client in mcp_clients {
            client.shutdown().await;
        }
        result
    }

    async fn run_sessions(
        &self,
        mut shared: RunShared,
        graph: &SessionGraph,
        timeout: Duration,
    ) -> Result<Map<String, Value>, FragsError> {
        for (id, session) in &shared.plan.sessions {
            let tools = shared.registry.specs_for(&session.tools)?;
            shared.tools.insert(id.clone(), tools);
        }
        schedule(Arc::new(shared), graph, self.parallel_workers, timeout).await
    }
}

struct Job {
    session: String,
    progress: Map<String, Value>,
}

type Done = (String, Result<Map<String, Value>, FragsError>);

async fn schedule(
    shared: Arc<RunShared>,
    graph: &SessionGraph,
    parallel_workers: usize,
    timeout: Duration,
) -> Result<Map<String, Value>, FragsError> {
    let total = graph.len();
    let workers = parallel_workers.max(1).min(total.max(1));
    let (job_tx, job_rx) = mpsc::channel::<Job>(total.max(1));
    let (done_tx, mut done_rx) = mpsc::channel::<Done>(total.max(1));
    let job_rx = Arc::new(Mutex::new(job_rx));

    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let shared = shared.clone();
        let jobs = job_rx.clone();
        let done = done_tx.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let job = jobs.lock().await.recv().await;
                let Some(job) = job else {
                    break;
                };
                tracing::debug!("[Runner] worker {} takes '{}'", worker_id, job.session);
                let result = session::run_session(&shared, &job.session, job.progress).await;
                if done.send((job.session, result)).await.is_err() {
                    break;
                }
            }
        }));
    }
    drop(done_tx);

    let mut remaining: HashMap<&str, usize> = graph
        .order()
        .iter()
        .map(|id| (id.as_str(), graph.dependencies(id).len()))
        .collect();
    let mut progress: Map<String, Value> = Map::new();
    let mut finished = 0usize;
    let mut failure: Option<FragsError> = None;

    for id in graph.order() {
        if remaining[id.as_str()] == 0 {
            dispatch(&job_tx, graph, id, &progress).await?;
        }
    }

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    while finished < total {
        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => {
                failure = Some(FragsError::Cancelled("run cancelled".to_string()));
                break;
            }
            _ = &mut deadline => {
                shared.cancel.cancel();
                failure = Some(FragsError::Cancelled(format!("run timed out after {:?}", timeout)));
                break;
            }
            done = done_rx.recv() => {
                let Some((id, result)) = done else {
                    failure = Some(FragsError::Internal("all workers exited".to_string()));
                    break;
                };
                match result {
                    Ok(slice) => {
                        tracing::info!("[Runner] session '{}' finished", id);
                        progress.insert(id.clone(), Value::Object(slice));
                        finished += 1;
                        for dependent in graph.dependents(&id) {
                            if let Some(count) = remaining.get_mut(dependent) {
                                *count -= 1;
                                if *count == 0 {
                                    dispatch(&job_tx, graph, dependent, &progress).await?;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!("[Runner] session '{}' failed: {}", id, e);
                        shared.cancel.cancel();
                        failure = Some(e);
                        break;
                    }
                }
            }
        }
    }

    drop(job_tx);
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!("[Runner] worker panicked: {}", e);
        }
    }

    if let Some(e) = failure {
        return Err(e);
    }
    let mut ordered = Map::new();
    for id in shared.plan.sessions.keys() {
        if let Some(slice) = progress.remove(id) {
            ordered.insert(id.clone(), slice);
        }
    }
    Ok(ordered)
}

async fn dispatch(
    jobs: &mpsc::Sender<Job>,
    graph: &SessionGraph,
    id: &str,
    progress: &Map<String, Value>,
) -> Result<(), FragsError> {
    let snapshot: Map<String, Value> = graph
        .dependencies(id)
        .iter()
        .filter_map(|dep| progress.get(dep).map(|v| (dep.clone(), v.clone())))
        .collect();
    jobs.send(Job {
        session: id.to_string(),
        progress: snapshot,
    })
    .await
    .map_err(|_| FragsError::Internal("worker pool closed".to_string()))
}

/// Free-function form of [`Runner::execute`].
pub async fn execute(
    ctx: &FragsContext,
    runner: &Runner,
    manager: &mut SessionManager,
    params: Map<String, Value>,
    tools_config: &ToolsConfig,
    loader: Arc<dyn ResourceLoader>,
    events: &EventEmitter,
) -> Result<Map<String, Value>, FragsError> {
    runner
        .execute(ctx, manager, params, tools_config, loader, events)
        .await
}
