//! Deterministic backend for tests and offline runs.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ChatBackend, ChatRequest, Message, ModelTurn};
use crate::error::FragsError;
use crate::schema::Schema;

type Responder = Box<dyn Fn(&ChatRequest<'_>) -> Result<ModelTurn, FragsError> + Send + Sync>;

/// What a scripted backend saw in one call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub system_prompt: Option<String>,
    /// Text of the latest user message.
    pub user_text: Option<String>,
    pub schema: Option<Schema>,
    pub function_names: Vec<String>,
    pub message_count: usize,
}

/// Replays queued turns, then falls back to an optional responder.
pub struct ScriptedBackend {
    turns: Mutex<VecDeque<ModelTurn>>,
    responder: Option<Responder>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedBackend {
    pub fn new(turns: impl IntoIterator<Item = ModelTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into_iter().collect()),
            responder: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A backend computing every reply from the request.
    pub fn responder<F>(responder: F) -> Self
    where
        F: Fn(&ChatRequest<'_>) -> Result<ModelTurn, FragsError> + Send + Sync + 'static,
    {
        Self {
            turns: Mutex::new(VecDeque::new()),
            responder: Some(Box::new(responder)),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, turn: ModelTurn) {
        if let Ok(mut turns) = self.turns.lock() {
            turns.push_back(turn);
        }
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

/// Text of the last user message in a transcript.
pub fn last_user_text(messages: &[Message]) -> Option<&str> {
    messages.iter().rev().find_map(|m| match m {
        Message::User { text, .. } => Some(text.as_str()),
        _ => None,
    })
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn complete(&self, request: ChatRequest<'_>) -> Result<ModelTurn, FragsError> {
        let record = RecordedRequest {
            system_prompt: request.system_prompt.map(str::to_string),
            user_text: last_user_text(request.messages).map(str::to_string),
            schema: request.schema.cloned(),
            function_names: request.functions.iter().map(|f| f.name.clone()).collect(),
            message_count: request.messages.len(),
        };
        self.requests
            .lock()
            .map_err(|e| FragsError::Internal(format!("Lock poisoned: {}", e)))?
            .push(record);

        let queued = self
            .turns
            .lock()
            .map_err(|e| FragsError::Internal(format!("Lock poisoned: {}", e)))?
            .pop_front();
        match (queued, &self.responder) {
            (Some(turn), _) => Ok(turn),
            (None, Some(responder)) => responder(&request),
            (None, None) => Err(FragsError::Ai("scripted backend has no more replies".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_queue_then_exhaustion() {
        let backend = ScriptedBackend::new([ModelTurn::json(json!({"a": 1}))]);
        let messages = vec![Message::User {
            text: "hi".into(),
            resources: Vec::new(),
        }];
        let request = ChatRequest {
            system_prompt: Some("sys"),
            messages: &messages,
            schema: None,
            functions: &[],
            internet_search: false,
        };

        assert_eq!(backend.complete(request).await.unwrap().text, r#"{"a":1}"#);
        assert_eq!(backend.complete(request).await.unwrap_err().kind(), "ai");

        let seen = backend.requests();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].user_text.as_deref(), Some("hi"));
        assert_eq!(seen[0].system_prompt.as_deref(), Some("sys"));
    }
}
