//! HTTP API routes, grouped by the server mode that exposes them.

pub mod auth;
pub mod execute;

use axum::{middleware, routing::post, Router};

use crate::mcp;
use crate::state::AppState;
use crate::ServeMode;

/// Authenticated routes for `mode`; `/health` is added by the caller.
pub fn api_router(state: AppState, mode: ServeMode) -> Router<AppState> {
    let mut router = Router::new().route("/run/{file}", post(execute::run_plan_file));
    router = match mode {
        ServeMode::Execute => router.route("/execute", post(execute::execute_plan)),
        ServeMode::Run => router.nest_service("/mcp", mcp::service(state.clone())),
    };
    router.layer(middleware::from_fn_with_state(state, auth::require_api_key))
}
