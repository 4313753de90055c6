//! HTTP transport for the chat backend.
//!
//! The response body of `POST /chat` is exposed as a stream of raw
//! byte chunks. Chunk boundaries are whatever the network delivers so
//! decoding to text has to carry incomplete UTF-8 sequences from one
//! chunk into the next.

use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use futures::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use super::error::ChatError;
use super::session::SessionId;

pub type ByteStream = BoxStream<'static, Result<Vec<u8>, ChatError>>;

#[derive(Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub session_id: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ChatRequest {
    pub session_id: String,
    pub query: String,
}

/// The two endpoints the chat widget needs from the backend.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn create_session(&self) -> Result<SessionId, ChatError>;

    /// Opens a streamed chat response. Dropping the returned stream
    /// aborts the request.
    async fn open_stream(
        &self,
        session_id: &SessionId,
        query: &str,
    ) -> Result<ByteStream, ChatError>;
}

#[derive(Clone)]
pub struct HttpChatApi {
    api_base_url: String,
    client: reqwest::Client,
}

impl HttpChatApi {
    pub fn new(api_base_url: &str) -> Self {
        Self {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base_url, path)
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn create_session(&self) -> Result<SessionId, ChatError> {
        let response = self
            .client
            .post(self.url("session"))
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(ChatError::session_creation)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::SessionCreation(format!(
                "unexpected status {}",
                status
            )));
        }

        let body: SessionResponse = response
            .json()
            .await
            .map_err(ChatError::session_creation)?;

        Ok(SessionId::new(&body.session_id))
    }

    async fn open_stream(
        &self,
        session_id: &SessionId,
        query: &str,
    ) -> Result<ByteStream, ChatError> {
        let payload = ChatRequest {
            session_id: session_id.to_string(),
            query: query.to_string(),
        };

        // No timeout here, the server closes the body when it's done
        let response = self
            .client
            .post(self.url("chat"))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(ChatError::connection)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::Connection(format!("unexpected status {}", status)));
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(ChatError::connection))
            .boxed();

        Ok(stream)
    }
}

/// Stateful UTF-8 decoder. Incomplete sequences at the end of a chunk
/// are held back until the next chunk completes them, invalid bytes
/// become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::new();
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // `valid_up_to` guarantees this prefix decodes
                    if let Ok(valid) = std::str::from_utf8(valid) {
                        out.push_str(valid);
                    }
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        // Incomplete sequence, wait for more bytes
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let tail = rest.to_vec();
        self.pending = tail;
        out
    }

    /// Flushes the decoder at end of stream. A dangling incomplete
    /// sequence decodes to a single replacement character.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        self.pending.clear();
        char::REPLACEMENT_CHARACTER.to_string()
    }
}

/// Turns a stream of raw byte chunks into a stream of decoded text
/// fragments. Empty fragments are skipped.
pub fn decode_stream(mut bytes: ByteStream) -> impl Stream<Item = Result<String, ChatError>> + Send {
    async_stream::try_stream! {
        let mut decoder = Utf8Decoder::new();
        while let Some(chunk) = bytes.next().await {
            let text = decoder.decode(&chunk?);
            if !text.is_empty() {
                yield text;
            }
        }
        let tail = decoder.finish();
        if !tail.is_empty() {
            yield tail;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn test_decoder_handles_split_multibyte_chars() {
        let text = "héllo 👋 wörld";
        let bytes = text.as_bytes();

        for split in 0..=bytes.len() {
            let mut decoder = Utf8Decoder::new();
            let mut out = decoder.decode(&bytes[..split]);
            out.push_str(&decoder.decode(&bytes[split..]));
            out.push_str(&decoder.finish());
            assert_eq!(out, text, "split at {}", split);
        }
    }

    #[test]
    fn test_decoder_byte_at_a_time() {
        let text = "日本語 and emoji 🦀";
        let mut decoder = Utf8Decoder::new();
        let mut out = String::new();
        for b in text.as_bytes() {
            out.push_str(&decoder.decode(&[*b]));
        }
        assert_eq!(out, text);
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::new();
        let out = decoder.decode(&[b'a', 0xFF, b'b']);
        assert_eq!(out, "a\u{FFFD}b");
    }

    #[test]
    fn test_decoder_flushes_dangling_sequence() {
        let mut decoder = Utf8Decoder::new();
        // First two bytes of a four byte sequence
        let out = decoder.decode(&[b'x', 0xF0, 0x9F]);
        assert_eq!(out, "x");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert_eq!(decoder.finish(), "");
    }

    #[tokio::test]
    async fn test_decode_stream_joins_fragments() {
        let bytes = "ça va? ✓".as_bytes().to_vec();
        let chunks: Vec<Result<Vec<u8>, ChatError>> =
            bytes.chunks(1).map(|c| Ok(c.to_vec())).collect();
        let decoded: Vec<String> = decode_stream(stream::iter(chunks).boxed())
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(decoded.concat(), "ça va? ✓");
        assert!(decoded.iter().all(|s| !s.is_empty()));
    }

    #[tokio::test]
    async fn test_decode_stream_propagates_errors() {
        let chunks: Vec<Result<Vec<u8>, ChatError>> = vec![
            Ok(b"ok".to_vec()),
            Err(ChatError::Connection("reset".to_string())),
        ];
        let mut decoded = Box::pin(decode_stream(stream::iter(chunks).boxed()));
        assert_eq!(decoded.next().await.unwrap().unwrap(), "ok");
        assert!(matches!(
            decoded.next().await,
            Some(Err(ChatError::Connection(_)))
        ));
    }

    #[tokio::test]
    async fn test_create_session() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/session")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"session_id":"abc123"}"#)
            .create_async()
            .await;

        let api = HttpChatApi::new(&format!("{}/", server.url()));
        let session_id = api.create_session().await.unwrap();

        mock.assert_async().await;
        assert_eq!(session_id.as_str(), "abc123");
    }

    #[tokio::test]
    async fn test_create_session_server_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/session")
            .with_status(500)
            .create_async()
            .await;

        let api = HttpChatApi::new(&server.url());
        let result = api.create_session().await;
        assert!(matches!(result, Err(ChatError::SessionCreation(_))));
    }

    #[tokio::test]
    async fn test_open_stream_sends_session_and_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat")
            .match_body(mockito::Matcher::Json(serde_json::json!({
                "session_id": "abc123",
                "query": "hello"
            })))
            .with_status(200)
            .with_body("data: {\"token\":\"Hi\"}\n")
            .create_async()
            .await;

        let api = HttpChatApi::new(&server.url());
        let mut stream = api
            .open_stream(&SessionId::new("abc123"), "hello")
            .await
            .unwrap();

        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend(chunk.unwrap());
        }

        mock.assert_async().await;
        assert_eq!(body, b"data: {\"token\":\"Hi\"}\n");
    }

    #[tokio::test]
    async fn test_open_stream_non_success_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat")
            .with_status(502)
            .create_async()
            .await;

        let api = HttpChatApi::new(&server.url());
        let result = api.open_stream(&SessionId::new("abc123"), "hello").await;
        assert!(matches!(result, Err(ChatError::Connection(_))));
    }

    #[tokio::test]
    async fn test_open_stream_unreachable() {
        // Nothing listens on port 9 locally
        let api = HttpChatApi::new("http://127.0.0.1:9");
        let result = api.open_stream(&SessionId::new("abc123"), "hello").await;
        assert!(matches!(result, Err(ChatError::Connection(_))));
    }
}
