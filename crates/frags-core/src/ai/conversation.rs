//! The function-call loop shared by every backend.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Ai, AskRequest, ChatBackend, ChatRequest, Message, DEFAULT_MAX_TOOL_ROUNDS};
use crate::error::FragsError;
use crate::functions::SessionTools;

/// [`Ai`] over any [`ChatBackend`]; keeps the transcript between asks.
pub struct ConversationAi<B> {
    backend: B,
    system_prompt: Option<String>,
    tools: SessionTools,
    transcript: Vec<Message>,
    max_tool_rounds: usize,
}

impl<B: ChatBackend> ConversationAi<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            system_prompt: None,
            tools: SessionTools::default(),
            transcript: Vec::new(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }
}

#[async_trait]
impl<B: ChatBackend> Ai for ConversationAi<B> {
    fn set_system_prompt(&mut self, prompt: &str) {
        self.system_prompt = Some(prompt.to_string()).filter(|p| !p.trim().is_empty());
    }

    fn set_functions(&mut self, tools: SessionTools) {
        self.tools = tools;
    }

    async fn ask(&mut self, request: AskRequest<'_>) -> Result<String, FragsError> {
        let tools = request.tools.cloned().unwrap_or_else(|| self.tools.clone());
        self.transcript.push(Message::User {
            text: request.text,
            resources: request.resources,
        });

        let mut rounds = 0usize;
        loop {
            let chat = ChatRequest {
                system_prompt: self.system_prompt.as_deref(),
                messages: &self.transcript,
                schema: request.schema,
                functions: &tools.functions,
                internet_search: tools.internet_search,
            };
            let turn = tokio::select! {
                biased;
                _ = request.cancel.cancelled() => {
                    return Err(FragsError::Cancelled("model call interrupted".to_string()));
                }
                turn = self.backend.complete(chat) => turn?,
            };

            let calls = turn.function_calls.clone();
            self.transcript.push(Message::Assistant {
                text: turn.text.clone(),
                function_calls: turn.function_calls,
            });
            if calls.is_empty() {
                return Ok(turn.text);
            }

            if rounds >= self.max_tool_rounds {
                return Err(FragsError::Ai(format!(
                    "model kept calling functions after {} round-trips",
                    self.max_tool_rounds
                )));
            }
            rounds += 1;

            // Calls within one turn run one after another.
            for call in calls {
                let result = if tools.functions.iter().any(|f| f.name == call.name) {
                    match request.runner.run_function(&call.name, call.args).await {
                        Ok(map) => Value::Object(map),
                        Err(e) if !e.is_fatal_in_turn() => {
                            tracing::debug!("[Ai] function {} failed: {}", call.name, e);
                            json!({ "error": e.to_string() })
                        }
                        Err(e) => return Err(e),
                    }
                } else {
                    json!({ "error": format!("function '{}' is not available", call.name) })
                };
                self.transcript.push(Message::FunctionResult {
                    call_id: call.id,
                    name: call.name,
                    result,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{ModelTurn, ScriptedBackend};
    use crate::functions::{FunctionRegistry, FunctionSpec, RunnerHandle, SimpleFunction};
    use crate::schema::{Schema, SchemaType};
    use serde_json::Map;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn die_registry() -> (Arc<FunctionRegistry>, SessionTools) {
        let schema = Schema::of_type(SchemaType::Object);
        let mut registry = FunctionRegistry::new();
        registry.register(
            "roll_die",
            Arc::new(SimpleFunction::new("Roll a die", schema.clone(), |_| {
                let mut out = Map::new();
                out.insert("value".into(), json!(4));
                Ok(out)
            })),
        );
        let tools = SessionTools {
            functions: vec![FunctionSpec {
                name: "roll_die".into(),
                description: "Roll a die".into(),
                input_schema: schema,
            }],
            internet_search: false,
        };
        (Arc::new(registry), tools)
    }

    #[tokio::test]
    async fn test_function_result_is_folded_back() {
        let (registry, tools) = die_registry();
        let backend = Arc::new(ScriptedBackend::new([
            ModelTurn::call("roll_die", json!({})),
            ModelTurn::json(json!({"result": 4})),
        ]));
        let mut ai = ConversationAi::new(backend.clone());
        ai.set_functions(tools);

        let cancel = CancellationToken::new();
        let runner = RunnerHandle::new(registry, cancel.clone());
        let out = ai
            .ask(AskRequest {
                cancel: &cancel,
                text: "roll".into(),
                schema: None,
                tools: None,
                runner: &runner,
                resources: Vec::new(),
            })
            .await
            .unwrap();

        assert_eq!(out, r#"{"result":4}"#);
        let transcript = ai.transcript();
        assert_eq!(transcript.len(), 4);
        assert!(matches!(
            &transcript[2],
            Message::FunctionResult { result, .. } if result["value"] == 4
        ));
        assert_eq!(backend.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_tool_round_bound() {
        let (registry, tools) = die_registry();
        let backend = Arc::new(ScriptedBackend::responder(|_| {
            Ok(ModelTurn::call("roll_die", json!({})))
        }));
        let mut ai = ConversationAi::new(backend.clone()).with_max_tool_rounds(3);
        ai.set_functions(tools);

        let cancel = CancellationToken::new();
        let runner = RunnerHandle::new(registry, cancel.clone());
        let err = ai
            .ask(AskRequest {
                cancel: &cancel,
                text: "roll forever".into(),
                schema: None,
                tools: None,
                runner: &runner,
                resources: Vec::new(),
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "ai");
        assert_eq!(backend.requests().len(), 4);
        let executed = ai
            .transcript()
            .iter()
            .filter(|m| matches!(m, Message::FunctionResult { .. }))
            .count();
        assert_eq!(executed, 3);
    }

    #[tokio::test]
    async fn test_unavailable_function_is_reported_to_model() {
        let (registry, _) = die_registry();
        let backend = Arc::new(ScriptedBackend::new([
            ModelTurn::call("roll_die", json!({})),
            ModelTurn::text("done"),
        ]));
        let mut ai = ConversationAi::new(backend);

        let cancel = CancellationToken::new();
        let runner = RunnerHandle::new(registry, cancel.clone());
        ai.ask(AskRequest {
            cancel: &cancel,
            text: "x".into(),
            schema: None,
            tools: None,
            runner: &runner,
            resources: Vec::new(),
        })
        .await
        .unwrap();

        assert!(matches!(
            &ai.transcript()[2],
            Message::FunctionResult { result, .. } if result["error"].as_str().unwrap().contains("not available")
        ));
    }
}
