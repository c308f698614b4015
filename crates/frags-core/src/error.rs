//! Core error type for the frags runtime.
//!
//! `FragsError` is used throughout the core (schema, runner, functions, adapters).
//! When the `axum` feature is enabled, it also implements `IntoResponse`
//! so it can be used directly as an axum handler error type.

use crate::schema::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum FragsError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Plan error: {0}")]
    PlanParse(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Tool error: {message}")]
    Tool { message: String, fatal: bool },

    #[error("AI error: {0}")]
    Ai(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FragsError {
    /// A recoverable tool failure; surfaced to the model as a function response.
    pub fn tool(message: impl Into<String>) -> Self {
        FragsError::Tool {
            message: message.into(),
            fatal: false,
        }
    }

    /// A tool failure that aborts the current phase.
    pub fn fatal_tool(message: impl Into<String>) -> Self {
        FragsError::Tool {
            message: message.into(),
            fatal: true,
        }
    }

    /// Stable lowercase name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            FragsError::Config(_) => "config",
            FragsError::PlanParse(_) => "plan-parse",
            FragsError::Validation(_) => "schema-validation",
            FragsError::Resource(_) => "resource",
            FragsError::Tool { .. } => "tool",
            FragsError::Ai(_) => "ai",
            FragsError::Cancelled(_) => "cancelled",
            FragsError::Internal(_) => "internal",
        }
    }

    /// Whether this error must stop the tool loop instead of being fed back to the model.
    pub fn is_fatal_in_turn(&self) -> bool {
        match self {
            FragsError::Tool { fatal, .. } => *fatal,
            FragsError::Validation(_) => false,
            _ => true,
        }
    }
}

impl From<serde_json::Error> for FragsError {
    fn from(e: serde_json::Error) -> Self {
        FragsError::Internal(format!("JSON error: {}", e))
    }
}

// ---------------------------------------------------------------------------
// axum integration (opt-in via feature flag)
// ---------------------------------------------------------------------------

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for FragsError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        tracing::warn!("[Error] request failed ({}): {}", self.kind(), self);
        let body = serde_json::json!({ "error": self.to_string() });
        (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(body)).into_response()
    }
}
