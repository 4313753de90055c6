//! Session bootstrap. The session id is requested lazily the first
//! time the chat is opened and kept for the lifetime of the widget.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::transport::ChatApi;

/// Opaque, server issued session identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: &str) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Default)]
pub struct SessionManager {
    id: Option<SessionId>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.id.as_ref()
    }

    /// Returns the cached session id or creates one. A failed creation
    /// leaves the manager empty so the next call tries again.
    pub async fn ensure_session(&mut self, api: &dyn ChatApi) -> Option<SessionId> {
        if let Some(id) = &self.id {
            return Some(id.clone());
        }

        match api.create_session().await {
            Ok(id) => {
                tracing::debug!("Created chat session {}", id);
                self.id = Some(id.clone());
                Some(id)
            }
            Err(e) => {
                tracing::warn!("Unable to create chat session: {}", e);
                None
            }
        }
    }
}
