//! `frags run`: Execute a plan file and print or save its output.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use frags_core::events::{EventEmitter, EventLevel};
use frags_core::output::{self, OutputFormat};
use frags_core::resources::FileResourceLoader;
use frags_core::{FragsContext, Runner, SessionManager, ToolsConfig};
use serde_json::{Map, Value};

use super::read_file;

pub struct RunOptions {
    pub plan: PathBuf,
    pub format: OutputFormat,
    pub template: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub params: Map<String, Value>,
    pub tools: Option<PathBuf>,
    /// Print runner events to stderr while running.
    pub verbose: bool,
    pub timeout: Duration,
}

pub async fn run(runner: &Runner, options: RunOptions) -> Result<(), String> {
    let rendered = execute(runner, &options).await?;
    match &options.output {
        Some(path) => {
            std::fs::write(path, &rendered)
                .map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
            eprintln!("Output written to {}", path.display());
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

/// Run the plan and render its output in the requested format.
pub async fn execute(runner: &Runner, options: &RunOptions) -> Result<String, String> {
    // Read the template first so a typo fails before any model call.
    let template = options.template.as_deref().map(read_file).transpose()?;

    let mut manager = SessionManager::from_file(&options.plan).map_err(|e| e.to_string())?;
    let tools = match &options.tools {
        Some(path) => ToolsConfig::from_file(path).map_err(|e| e.to_string())?,
        None => ToolsConfig::default(),
    };
    let loader = Arc::new(FileResourceLoader::new(plan_dir(&options.plan)));

    let ctx = FragsContext::new()
        .with_timeout(options.timeout)
        .with_loose_params(true);
    let cancel = ctx.cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, cancelling run...");
            cancel.cancel();
        }
    });

    let (events, printer) = if options.verbose {
        let (events, mut rx) = EventEmitter::channel(256, EventLevel::Debug);
        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                eprintln!("[{}] {}", event.event_type, event.message);
            }
        });
        (events, Some(printer))
    } else {
        (EventEmitter::disabled(), None)
    };

    let result = runner
        .execute(&ctx, &mut manager, options.params.clone(), &tools, loader, &events)
        .await;
    interrupt.abort();
    drop(events);
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    let progress = result.map_err(|e| e.to_string())?;
    output::render(&progress, options.format, template.as_deref()).map_err(|e| e.to_string())
}

fn plan_dir(plan: &Path) -> PathBuf {
    match plan.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
