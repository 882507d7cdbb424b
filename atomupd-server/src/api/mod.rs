use crate::{admin::AdminRequest, state::ServerState};
use axum::{
    Router,
    routing::{get, post},
};
use tokio::sync::mpsc;

pub mod admin;
pub mod update;

/// Public routes, answering update queries.
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(update::updates))
        .with_state(state)
}

/// Routes of the admin port.
pub fn admin_router(requests: mpsc::Sender<AdminRequest>) -> Router {
    Router::new()
        .route("/reload", post(admin::reload))
        .route("/dump", post(admin::dump))
        .with_state(requests)
}
