//! The conversation log and the store that mutates it.
//!
//! Every mutation publishes a new `ConversationLog` snapshot on a
//! `watch` channel. Snapshots are immutable; the store copies the
//! underlying turns on write only when a previous snapshot is still
//! held somewhere.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct TurnId(String);

impl TurnId {
    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "bot")]
    Bot,
}

#[derive(Clone, Debug, Serialize)]
pub struct ConversationTurn {
    pub id: TurnId,
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub streaming: bool,
}

impl ConversationTurn {
    fn new(role: Role, text: &str, streaming: bool) -> Self {
        Self {
            id: TurnId::generate(),
            role,
            text: text.to_string(),
            created_at: Utc::now(),
            streaming,
        }
    }
}

/// Immutable, cheap to clone view of the conversation in
/// chronological order.
#[derive(Clone, Debug, Default)]
pub struct ConversationLog(Arc<Vec<ConversationTurn>>);

impl ConversationLog {
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConversationTurn> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, id: &TurnId) -> Option<&ConversationTurn> {
        self.0.iter().find(|t| t.id == *id)
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.0.last()
    }

    pub fn streaming_turn(&self) -> Option<&ConversationTurn> {
        self.0.iter().find(|t| t.streaming)
    }
}

pub struct MessageStore {
    tx: watch::Sender<ConversationLog>,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConversationLog::default());
        Self { tx }
    }

    /// Creates a store seeded with a sealed bot greeting.
    pub fn with_greeting(greeting: &str) -> Self {
        let store = Self::new();
        store.update(|turns| {
            turns.push(ConversationTurn::new(Role::Bot, greeting, false));
            true
        });
        store
    }

    pub fn snapshot(&self) -> ConversationLog {
        self.tx.borrow().clone()
    }

    /// Receives a new snapshot after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<ConversationLog> {
        self.tx.subscribe()
    }

    pub fn is_streaming(&self) -> bool {
        self.tx.borrow().streaming_turn().is_some()
    }

    pub fn append_user_turn(&self, text: &str) -> TurnId {
        let turn = ConversationTurn::new(Role::User, text, false);
        let id = turn.id.clone();
        self.update(|turns| {
            turns.push(turn);
            true
        });
        id
    }

    /// Appends an empty streaming bot turn. A turn that is somehow
    /// still streaming is sealed first so only one turn streams at a
    /// time.
    pub fn begin_bot_turn(&self) -> TurnId {
        let turn = ConversationTurn::new(Role::Bot, "", true);
        let id = turn.id.clone();
        self.update(|turns| {
            for stale in turns.iter_mut().filter(|t| t.streaming) {
                tracing::warn!("Sealing turn {} that was still streaming", stale.id);
                stale.streaming = false;
            }
            turns.push(turn);
            true
        });
        id
    }

    /// Appends a token to a streaming turn. Returns false and leaves
    /// the log untouched if the turn is sealed or unknown.
    pub fn append_token(&self, id: &TurnId, token: &str) -> bool {
        self.update_turn(id, |turn| {
            if !turn.streaming {
                return false;
            }
            turn.text.push_str(token);
            true
        })
    }

    pub fn seal_turn(&self, id: &TurnId) -> bool {
        self.update_turn(id, |turn| {
            if !turn.streaming {
                return false;
            }
            turn.streaming = false;
            true
        })
    }

    /// Seals the turn and replaces its text with `message`.
    pub fn seal_turn_with_error(&self, id: &TurnId, message: &str) -> bool {
        self.update_turn(id, |turn| {
            if !turn.streaming {
                return false;
            }
            turn.streaming = false;
            turn.text = message.to_string();
            true
        })
    }

    fn update_turn(&self, id: &TurnId, f: impl FnOnce(&mut ConversationTurn) -> bool) -> bool {
        self.update(|turns| match turns.iter_mut().find(|t| t.id == *id) {
            Some(turn) => f(turn),
            None => {
                tracing::warn!("Ignoring update for unknown turn {}", id);
                false
            }
        })
    }

    // Only publishes when `f` reports a change. The closure must not
    // modify `turns` when it returns false.
    fn update(&self, f: impl FnOnce(&mut Vec<ConversationTurn>) -> bool) -> bool {
        self.tx
            .send_if_modified(|log| f(Arc::make_mut(&mut log.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_is_sealed_bot_turn() {
        let store = MessageStore::with_greeting("Hi, I'm the portfolio assistant.");
        let log = store.snapshot();
        assert_eq!(log.len(), 1);
        let greeting = log.last().unwrap();
        assert_eq!(greeting.role, Role::Bot);
        assert!(!greeting.streaming);
        assert!(!store.is_streaming());
    }

    #[test]
    fn test_streaming_turn_lifecycle() {
        let store = MessageStore::new();
        let user = store.append_user_turn("hello");
        let bot = store.begin_bot_turn();
        assert!(store.is_streaming());

        assert!(store.append_token(&bot, "Hi"));
        assert!(store.append_token(&bot, " there"));
        assert!(store.seal_turn(&bot));

        let log = store.snapshot();
        assert_eq!(log.len(), 2);
        assert_eq!(log.get(&user).unwrap().text, "hello");
        let turn = log.get(&bot).unwrap();
        assert_eq!(turn.text, "Hi there");
        assert!(!turn.streaming);
        assert!(!store.is_streaming());
    }

    #[test]
    fn test_tokens_after_seal_are_ignored() {
        let store = MessageStore::new();
        let bot = store.begin_bot_turn();
        store.append_token(&bot, "done");
        store.seal_turn(&bot);

        assert!(!store.append_token(&bot, " late"));
        assert!(!store.seal_turn(&bot));
        assert!(!store.seal_turn_with_error(&bot, "nope"));
        assert_eq!(store.snapshot().get(&bot).unwrap().text, "done");
    }

    #[test]
    fn test_user_turns_are_not_appendable() {
        let store = MessageStore::new();
        let user = store.append_user_turn("hello");
        assert!(!store.append_token(&user, "!"));
        assert_eq!(store.snapshot().get(&user).unwrap().text, "hello");
    }

    #[test]
    fn test_seal_with_error_replaces_text() {
        let store = MessageStore::new();
        let bot = store.begin_bot_turn();
        store.append_token(&bot, "half a sent");
        assert!(store.seal_turn_with_error(&bot, "Sorry"));

        let turn = store.snapshot().get(&bot).cloned().unwrap();
        assert_eq!(turn.text, "Sorry");
        assert!(!turn.streaming);
    }

    #[test]
    fn test_snapshots_are_immutable() {
        let store = MessageStore::new();
        let bot = store.begin_bot_turn();
        let before = store.snapshot();
        store.append_token(&bot, "new");

        assert_eq!(before.get(&bot).unwrap().text, "");
        assert_eq!(store.snapshot().get(&bot).unwrap().text, "new");
    }

    #[test]
    fn test_only_one_streaming_turn() {
        let store = MessageStore::new();
        let first = store.begin_bot_turn();
        let second = store.begin_bot_turn();

        let log = store.snapshot();
        assert!(!log.get(&first).unwrap().streaming);
        assert!(log.get(&second).unwrap().streaming);
        assert_eq!(log.iter().filter(|t| t.streaming).count(), 1);
        assert!(!store.append_token(&first, "late"));
    }

    #[test]
    fn test_unknown_turn_is_ignored() {
        let store = MessageStore::new();
        assert!(!store.append_token(&TurnId("missing".to_string()), "x"));
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_see_each_mutation() {
        let store = MessageStore::new();
        let mut rx = store.subscribe();

        let bot = store.begin_bot_turn();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().get(&bot).unwrap().streaming);

        store.append_token(&bot, "a");
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().get(&bot).unwrap().text, "a");

        // A no-op mutation does not notify
        store.seal_turn(&bot);
        rx.changed().await.unwrap();
        rx.borrow_and_update();
        store.append_token(&bot, "b");
        assert!(!rx.has_changed().unwrap());
    }
}
