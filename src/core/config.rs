use std::env;

use crate::chat::DEFAULT_GREETING;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub chat_api_url: String,
    pub greeting: String,
    pub token_delay_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        let host = "127.0.0.1";
        let port = "2222";
        let chat_api_url =
            env::var("FOLIO_CHAT_API_URL").unwrap_or(format!("http://{}:{}", host, port));
        let greeting =
            env::var("FOLIO_GREETING").unwrap_or_else(|_| DEFAULT_GREETING.to_string());
        let token_delay_ms = env::var("FOLIO_TOKEN_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(25);

        Self {
            chat_api_url,
            greeting,
            token_delay_ms,
        }
    }
}
