//! The chat panel: open/close state, lazy session bootstrap and
//! submission gating. One turn streams at a time.

use std::sync::Arc;

use super::error::ChatError;
use super::session::{SessionId, SessionManager};
use super::store::{MessageStore, TurnId};
use super::transport::{ChatApi, decode_stream};
use super::turn::{TurnOutcome, drive_turn, fail_turn};

pub const DEFAULT_GREETING: &str =
    "Hi! Ask me anything about my projects, experience, or certifications.";

pub struct ChatWidget {
    api: Arc<dyn ChatApi>,
    session: SessionManager,
    store: MessageStore,
    open: bool,
}

impl ChatWidget {
    pub fn new(api: Arc<dyn ChatApi>, greeting: &str) -> Self {
        Self {
            api,
            session: SessionManager::new(),
            store: MessageStore::with_greeting(greeting),
            open: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session.session_id()
    }

    /// Opens the panel and makes sure a session exists. Returns false
    /// if the session could not be created; opening again retries.
    pub async fn open(&mut self) -> bool {
        self.open = true;
        self.session.ensure_session(self.api.as_ref()).await.is_some()
    }

    /// Closes the panel. An in-flight turn keeps streaming until the
    /// future driving it is dropped.
    pub fn close(&mut self) {
        self.open = false;
    }

    pub async fn toggle(&mut self) -> bool {
        if self.open {
            self.close();
        } else {
            self.open().await;
        }
        self.open
    }

    pub fn can_submit(&self) -> bool {
        self.open && self.session.session_id().is_some() && !self.store.is_streaming()
    }

    /// Sends `text` and streams the reply into a new bot turn. Returns
    /// once the turn is sealed. Dropping the future aborts the request;
    /// call `abandon_streaming` afterwards to seal the orphaned turn.
    pub async fn submit(&self, text: &str) -> Result<(TurnId, TurnOutcome), ChatError> {
        let query = text.trim();
        if query.is_empty() {
            return Err(ChatError::Rejected("message is empty"));
        }
        if !self.open {
            return Err(ChatError::Rejected("chat is closed"));
        }
        let Some(session_id) = self.session.session_id().cloned() else {
            return Err(ChatError::Rejected("no chat session"));
        };
        if self.store.is_streaming() {
            return Err(ChatError::Rejected("a reply is still streaming"));
        }

        self.store.append_user_turn(query);
        let turn = self.store.begin_bot_turn();

        let outcome = match self.api.open_stream(&session_id, query).await {
            Ok(bytes) => drive_turn(&self.store, &turn, decode_stream(bytes)).await,
            Err(e) => fail_turn(&self.store, &turn, &e),
        };

        Ok((turn, outcome))
    }

    /// Seals a turn left streaming by a cancelled `submit`, keeping
    /// whatever text had arrived.
    pub fn abandon_streaming(&self) -> Option<TurnId> {
        let turn = self.store.snapshot().streaming_turn()?.id.clone();
        tracing::debug!("Abandoning streaming turn {}", turn);
        self.store.seal_turn(&turn);
        Some(turn)
    }
}
