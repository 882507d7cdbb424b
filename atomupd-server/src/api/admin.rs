use crate::{admin::AdminRequest, state::AdminCommand};
use axum::{extract::State, http::StatusCode};
use tokio::sync::{mpsc, oneshot};

/// Rebuild the pool from disk.
pub async fn reload(State(requests): State<mpsc::Sender<AdminRequest>>) -> StatusCode {
    submit(requests, AdminCommand::Reload).await
}

/// Print the pool being served.
pub async fn dump(State(requests): State<mpsc::Sender<AdminRequest>>) -> StatusCode {
    submit(requests, AdminCommand::Dump).await
}

async fn submit(requests: mpsc::Sender<AdminRequest>, command: AdminCommand) -> StatusCode {
    let (reply, started) = oneshot::channel();
    let request = AdminRequest {
        command,
        reply: Some(reply),
    };
    if requests.send(request).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    match started.await {
        Ok(true) => StatusCode::ACCEPTED,
        Ok(false) => StatusCode::CONFLICT,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
