//! Router for the chat API
//!
//! Stands in for the real assistant backend: replies echo the query
//! back one word per frame using the same line protocol.

use std::convert::Infallible;
use std::time::Duration;

use anyhow::anyhow;
use axum::{
    Router,
    body::Body,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::post,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::StreamExt as _;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::public;
use crate::api::state::SharedState;

const END_OF_STREAM: &str = "event: end-of-stream\n";

/// Splits the canned reply into word tokens, keeping the whitespace
/// attached so the tokens concatenate back to the full reply.
pub fn reply_tokens(query: &str) -> Vec<String> {
    let reply = format!(
        "You asked: \"{}\". I'm the local development assistant so all I can do is echo. \
         Have a look at #projects or https://github.com in the meantime.",
        query.trim()
    );
    reply.split_inclusive(' ').map(String::from).collect()
}

fn token_line(token: &str) -> String {
    format!("data: {}\n", json!({ "token": token }))
}

/// Stream a reply for the session
async fn chat_handler(
    State(state): State<SharedState>,
    axum::Json(payload): axum::Json<public::ChatRequest>,
) -> Result<impl IntoResponse, crate::api::public::ApiError> {
    let (known_session, delay) = {
        let shared_state = state
            .read()
            .map_err(|_| anyhow!("Unable to read shared state"))?;
        (
            shared_state.sessions.contains(&payload.session_id),
            Duration::from_millis(shared_state.config.token_delay_ms),
        )
    };

    if !known_session {
        return Ok((
            StatusCode::NOT_FOUND,
            format!("Chat session {} not found", payload.session_id),
        )
            .into_response());
    }

    if payload.query.trim().is_empty() {
        return Ok((StatusCode::BAD_REQUEST, "Query is empty").into_response());
    }

    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let tokens = reply_tokens(&payload.query);

    tokio::spawn(async move {
        for token in tokens {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            // The receiver is gone when the client disconnects
            if tx.send(token_line(&token)).is_err() {
                tracing::debug!("Client disconnected mid-stream");
                return;
            }
        }
        let _ = tx.send(format!("data: {}\n", json!({ "status": "done" })));
        let _ = tx.send(END_OF_STREAM.to_string());
    });

    let body_stream = UnboundedReceiverStream::new(rx).map(Ok::<String, Infallible>);

    let resp = (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(body_stream),
    )
        .into_response();

    Ok(resp)
}

/// Create the chat router
pub fn router() -> Router<SharedState> {
    Router::new().route("/", post(chat_handler))
}
