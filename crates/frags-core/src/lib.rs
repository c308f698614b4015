//! Frags Core: transport-agnostic plan runtime.
//!
//! A plan is a YAML document of sessions whose outputs are constrained by one
//! extended JSON Schema (`x-session`, `x-phase`). This crate parses plans, runs
//! their sessions in dependency order against a model, dispatches function calls
//! and applies transformers. It has **no HTTP framework dependency** by default,
//! making it suitable for use in:
//!
//! - HTTP servers (via `frags-server`)
//! - CLI tools (via `frags-cli`)
//!
//! # Feature Flags
//!
//! - `axum`: Enables `IntoResponse` impl on `FragsError` for use in axum handlers.

pub mod ai;
pub mod config;
pub mod error;
pub mod events;
pub mod functions;
pub mod output;
pub mod plan;
pub mod resources;
pub mod runner;
pub mod schema;
pub mod template;
pub mod transform;

// Convenience re-exports
pub use ai::{AiFactory, BackendAiFactory, OpenAiBackend, ScriptedBackend};
pub use config::Settings;
pub use error::FragsError;
pub use events::{Event, EventEmitter, EventLevel, EventType};
pub use functions::{FunctionRegistry, ToolsConfig};
pub use plan::SessionManager;
pub use runner::{execute, FragsContext, Runner};
pub use schema::Schema;
