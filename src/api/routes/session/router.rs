//! Router for the session API

use anyhow::anyhow;
use axum::{Router, extract::State, routing::post};
use uuid::Uuid;

use super::public;
use crate::api::state::SharedState;

/// Issue a new opaque session id
async fn create_session(
    State(state): State<SharedState>,
) -> Result<axum::Json<public::SessionResponse>, crate::api::public::ApiError> {
    let session_id = Uuid::new_v4().to_string();
    state
        .write()
        .map_err(|_| anyhow!("Unable to write shared state"))?
        .sessions
        .insert(session_id.clone());

    tracing::debug!("Created session {}", session_id);

    Ok(axum::Json(public::SessionResponse { session_id }))
}

/// Create the session router
pub fn router() -> Router<SharedState> {
    Router::new().route("/", post(create_session))
}
