//! `frags ask`: Send one prompt to the configured model.

use std::sync::Arc;

use frags_core::ai::{AiFactory, AskRequest};
use frags_core::functions::{FunctionRegistry, RunnerHandle};
use tokio_util::sync::CancellationToken;

pub async fn ask(factory: &dyn AiFactory, prompt: &str, system: Option<&str>) -> Result<String, String> {
    if prompt.trim().is_empty() {
        return Err("Prompt is empty".to_string());
    }
    let mut ai = factory.new_ai();
    if let Some(system) = system {
        ai.set_system_prompt(system);
    }

    let cancel = CancellationToken::new();
    let runner = RunnerHandle::new(Arc::new(FunctionRegistry::new()), cancel.clone());
    ai.ask(AskRequest {
        cancel: &cancel,
        text: prompt.to_string(),
        schema: None,
        tools: None,
        runner: &runner,
        resources: Vec::new(),
    })
    .await
    .map_err(|e| e.to_string())
}
