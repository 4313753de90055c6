//! Integration tests for the chat API endpoint

mod test_utils;

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use serde_json::json;
    use tower::util::ServiceExt;

    use folio::api::routes::chat::reply_tokens;
    use folio::chat::{Frame, FrameParser};

    use crate::test_utils::{body_to_string, create_session, test_app};

    fn chat_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .uri("/chat")
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    /// Tests the reply streams as token frames followed by the done
    /// status and the end of stream marker
    #[tokio::test]
    async fn it_streams_a_reply() {
        let app = test_app();
        let session_id = create_session(&app).await;

        let response = app
            .oneshot(chat_request(json!({
                "session_id": session_id,
                "query": "what have you built?"
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );

        let body = body_to_string(response.into_body()).await;
        let mut parser = FrameParser::new();
        let frames = parser.push(&body);
        assert_eq!(parser.finish(), None);

        let tokens: Vec<String> = frames
            .iter()
            .filter_map(|f| match f {
                Frame::Token(t) => Some(t.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(tokens, reply_tokens("what have you built?"));

        let n = frames.len();
        assert_eq!(frames[n - 2], Frame::StatusDone);
        assert_eq!(frames[n - 1], Frame::EndOfStream);
    }

    /// Tests an unknown session is not found
    #[tokio::test]
    async fn it_rejects_unknown_session() {
        let app = test_app();

        let response = app
            .oneshot(chat_request(json!({
                "session_id": "nope",
                "query": "hello"
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    /// Tests a blank query is a bad request
    #[tokio::test]
    async fn it_rejects_empty_query() {
        let app = test_app();
        let session_id = create_session(&app).await;

        let response = app
            .oneshot(chat_request(json!({
                "session_id": session_id,
                "query": "   "
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    /// Tests a failure reading shared state is a server error
    #[tokio::test]
    async fn it_reports_poisoned_state() {
        let (app, shared_state) = crate::test_utils::test_app_with_state();
        let session_id = create_session(&app).await;
        crate::test_utils::poison_state(&shared_state);

        let response = app
            .oneshot(chat_request(json!({
                "session_id": session_id,
                "query": "hello"
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_to_string(response.into_body()).await;
        assert!(body.contains("Unable to read shared state"));
    }

    /// Tests a body without a query fails to deserialize
    #[tokio::test]
    async fn it_rejects_missing_query() {
        let app = test_app();

        let response = app
            .oneshot(chat_request(json!({ "session_id": "abc123" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
