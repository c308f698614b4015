//! Model-agnostic conversation contract.
//!
//! The runner only talks to [`Ai`]; each session gets a fresh instance from an
//! [`AiFactory`] and keeps it across its phases. Vendor code lives behind
//! [`ChatBackend`], which performs exactly one model call; the function-call loop
//! is shared in [`ConversationAi`].

pub mod conversation;
pub mod openai;
pub mod scripted;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::FragsError;
use crate::functions::{FunctionSpec, RunnerHandle, SessionTools};
use crate::resources::Resource;
use crate::schema::Schema;

pub use conversation::ConversationAi;
pub use openai::{OpenAiBackend, OpenAiConfig};
pub use scripted::{RecordedRequest, ScriptedBackend};

/// Default bound on function-call round-trips per ask.
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 16;

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionCall {
    pub id: String,
    pub name: String,
    pub args: Map<String, Value>,
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    User {
        text: String,
        resources: Vec<Resource>,
    },
    Assistant {
        text: String,
        function_calls: Vec<FunctionCall>,
    },
    FunctionResult {
        call_id: String,
        name: String,
        result: Value,
    },
}

/// Input to a single model call.
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub system_prompt: Option<&'a str>,
    pub messages: &'a [Message],
    /// Response schema; `x-phase`/`x-session` must be stripped before sending upstream.
    pub schema: Option<&'a Schema>,
    pub functions: &'a [FunctionSpec],
    pub internet_search: bool,
}

/// What the model answered in one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelTurn {
    pub text: String,
    pub function_calls: Vec<FunctionCall>,
}

impl ModelTurn {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            function_calls: Vec::new(),
        }
    }

    pub fn json(value: Value) -> Self {
        Self::text(value.to_string())
    }

    pub fn call(name: impl Into<String>, args: Value) -> Self {
        let name = name.into();
        Self {
            text: String::new(),
            function_calls: vec![FunctionCall {
                id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                name,
                args: args.as_object().cloned().unwrap_or_default(),
            }],
        }
    }
}

/// One vendor call.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, request: ChatRequest<'_>) -> Result<ModelTurn, FragsError>;
}

#[async_trait]
impl<B: ChatBackend + ?Sized> ChatBackend for Arc<B> {
    async fn complete(&self, request: ChatRequest<'_>) -> Result<ModelTurn, FragsError> {
        (**self).complete(request).await
    }
}

/// Everything one `ask` needs.
pub struct AskRequest<'a> {
    pub cancel: &'a CancellationToken,
    pub text: String,
    pub schema: Option<&'a Schema>,
    /// Overrides the functions set with [`Ai::set_functions`] for this ask.
    pub tools: Option<&'a SessionTools>,
    pub runner: &'a RunnerHandle,
    pub resources: Vec<Resource>,
}

/// A conversation with a model; owns one transcript.
#[async_trait]
pub trait Ai: Send {
    fn set_system_prompt(&mut self, prompt: &str);

    fn set_functions(&mut self, tools: SessionTools);

    /// Send `request.text` and return the model's final text once no more
    /// function calls are requested.
    async fn ask(&mut self, request: AskRequest<'_>) -> Result<String, FragsError>;
}

/// Creates a fresh [`Ai`] per session.
pub trait AiFactory: Send + Sync {
    fn new_ai(&self) -> Box<dyn Ai>;
}

/// Factory sharing one backend between all conversations.
pub struct BackendAiFactory<B> {
    backend: Arc<B>,
    max_tool_rounds: usize,
}

impl<B: ChatBackend + 'static> BackendAiFactory<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }
}

impl<B: ChatBackend + 'static> AiFactory for BackendAiFactory<B> {
    fn new_ai(&self) -> Box<dyn Ai> {
        Box::new(ConversationAi::new(self.backend.clone()).with_max_tool_rounds(self.max_tool_rounds))
    }
}
