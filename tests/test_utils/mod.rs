//! Test utilities for integration tests
use std::sync::{Arc, RwLock};

use axum::{Router, body::Body};

use folio::api::{AppState, SharedState};
use folio::api::app;
use folio::core::AppConfig;

/// Config for tests. Tokens are sent without delay.
pub fn test_config() -> AppConfig {
    AppConfig {
        chat_api_url: String::from("http://127.0.0.1:2222"),
        greeting: String::from("Hi! Ask me anything."),
        token_delay_ms: 0,
    }
}

/// Creates a test application router with fresh state.
pub fn test_app() -> Router {
    test_app_with_state().0
}

/// Like `test_app` but also hands back the shared state.
pub fn test_app_with_state() -> (Router, SharedState) {
    let shared_state = Arc::new(RwLock::new(AppState::new(test_config())));
    (app(Arc::clone(&shared_state)), shared_state)
}

/// Poisons the state lock by panicking while holding the write guard.
pub fn poison_state(shared_state: &SharedState) {
    let shared_state = Arc::clone(shared_state);
    let _ = std::thread::spawn(move || {
        let _guard = shared_state.write().unwrap();
        panic!("Poisoning shared state");
    })
    .join();
}

/// Reads a whole response body into a string.
pub async fn body_to_string(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Failed to read body");
    String::from_utf8(bytes.to_vec()).expect("Body is not utf-8")
}

/// Creates a session against `app` and returns its id.
pub async fn create_session(app: &Router) -> String {
    use axum::http::Request;
    use tower::util::ServiceExt;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/session")
                .method("POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_to_string(response.into_body()).await;
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    json["session_id"].as_str().unwrap().to_string()
}
