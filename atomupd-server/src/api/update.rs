use crate::{extract::QueryImage, state::ServerState};
use axum::{
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::{debug, error};

/// Answer an update query: the `Update` as JSON, or an empty body when there
/// is nothing newer.
pub async fn updates(State(state): State<ServerState>, QueryImage(image): QueryImage) -> Response {
    debug!(image = %image, "Request");

    let update = match state.pool().get_updates(&image) {
        Ok(Some(update)) => update,
        Ok(None) => return StatusCode::OK.into_response(),
        Err(error) => {
            error!(image = %image, error = %error, "Failed to resolve updates");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match serde_json::to_string(&update) {
        Ok(body) => {
            debug!(reply = %body, "Reply");
            ([(header::CONTENT_TYPE, "application/json")], body).into_response()
        }
        Err(error) => {
            error!(error = %error, "Failed to serialize update");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
