//! HTTP API under `/api/v1`
//!
//! Every response, success or failure, is the canonical envelope
//! `{code, message, data}`. Everything except `/health` requires the
//! daemon's bearer token.

mod auth;
mod console;
mod error;
mod form;
mod storage;
mod tasks;
mod templates;
mod vms;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::{middleware, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::OrchestratorState;

pub use auth::require_token;
pub use error::{ok, ApiError, ApiResult};

/// State shared by every handler
pub type SharedState = Arc<OrchestratorState>;

/// Path prefix of every route
pub const API_PREFIX: &str = "/api/v1";

#[derive(Debug, Serialize)]
pub struct Health {
    status: &'static str,
    version: &'static str,
}

async fn health() -> ApiResult<Health> {
    ok(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Build the API router
pub fn router(state: SharedState) -> Router {
    let uploads = Router::new()
        .route("/templates/upload", post(templates::upload))
        .route("/nodes/storage/upload", post(storage::upload))
        .layer(DefaultBodyLimit::disable());

    let protected = Router::new()
        .route("/tasks", post(tasks::submit))
        .route("/tasks/cluster", get(tasks::list_cluster))
        .route("/tasks/node", get(tasks::list_node))
        .route("/tasks/status", get(tasks::status))
        .route("/tasks/log", get(tasks::log))
        .route("/tasks/stop", delete(tasks::stop))
        .route("/templates/import", post(templates::import))
        .route("/templates/sync-tasks", get(templates::list_sync_tasks))
        .route("/templates/sync-tasks/:task_id", get(templates::get_sync_task))
        .route(
            "/templates/sync-tasks/:task_id/retry",
            post(templates::retry_sync_task),
        )
        .route("/templates/:id", get(templates::get_template))
        .route("/templates/:id/sync", post(templates::sync))
        .route("/uploads", get(storage::list_uploads))
        .route("/nodes/console", post(console::node_console))
        .route("/vms/console", post(console::vm_console))
        .route("/vms/config", get(vms::get_config).put(vms::update_config))
        .merge(uploads)
        .layer(middleware::from_fn_with_state(state.clone(), require_token));

    let api = Router::new()
        .route("/health", get(health))
        .merge(protected);

    Router::new().nest(API_PREFIX, api).with_state(state)
}
