//! Drives a single bot turn from decoded stream fragments to a sealed
//! turn in the store.

use futures::Stream;
use futures_util::StreamExt;

use super::error::{ChatError, TURN_ERROR_MESSAGE};
use super::frame::{Frame, FrameParser};
use super::store::{MessageStore, TurnId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// A terminal frame arrived
    Completed,
    /// The stream ended without a terminal frame. Whatever arrived is
    /// kept and the turn is sealed normally.
    PrematureClose,
    /// Nothing usable arrived, the turn shows the error message
    Failed,
}

struct TurnState<'a> {
    store: &'a MessageStore,
    turn: &'a TurnId,
    received: bool,
    done: bool,
}

impl TurnState<'_> {
    /// Applies one frame. Returns true when reading should stop.
    fn apply(&mut self, frame: Frame) -> bool {
        match frame {
            Frame::Token(token) => {
                if self.store.append_token(self.turn, &token) {
                    self.received = true;
                }
                false
            }
            Frame::StatusDone => {
                self.store.seal_turn(self.turn);
                self.done = true;
                false
            }
            Frame::EndOfStream => {
                self.store.seal_turn(self.turn);
                self.done = true;
                true
            }
            Frame::Unknown => false,
        }
    }
}

/// Pulls decoded text fragments, parses them into frames, and applies
/// them to `turn` in arrival order. The turn is always sealed when
/// this returns.
pub async fn drive_turn<S>(store: &MessageStore, turn: &TurnId, fragments: S) -> TurnOutcome
where
    S: Stream<Item = Result<String, ChatError>>,
{
    let mut fragments = std::pin::pin!(fragments);
    let mut parser = FrameParser::new();
    let mut state = TurnState {
        store,
        turn,
        received: false,
        done: false,
    };

    while let Some(fragment) = fragments.next().await {
        let text = match fragment {
            Ok(text) => text,
            Err(e) => return fail_mid_stream(&state, e),
        };
        for frame in parser.push(&text) {
            if state.apply(frame) {
                tracing::debug!("End of stream for turn {}", turn);
                return TurnOutcome::Completed;
            }
        }
    }

    if let Some(frame) = parser.finish() {
        state.apply(frame);
    }

    if state.done {
        return TurnOutcome::Completed;
    }

    tracing::warn!("Stream for turn {} closed without a terminal frame", turn);
    store.seal_turn(turn);
    TurnOutcome::PrematureClose
}

/// Seals a turn whose stream could not be opened.
pub fn fail_turn(store: &MessageStore, turn: &TurnId, err: &ChatError) -> TurnOutcome {
    tracing::error!("Chat turn {} failed: {}", turn, err);
    store.seal_turn_with_error(turn, TURN_ERROR_MESSAGE);
    TurnOutcome::Failed
}

fn fail_mid_stream(state: &TurnState, err: ChatError) -> TurnOutcome {
    if state.done {
        return TurnOutcome::Completed;
    }
    if !state.received {
        return fail_turn(state.store, state.turn, &err);
    }
    tracing::warn!(
        "Stream for turn {} failed after partial content: {}",
        state.turn,
        err
    );
    state.store.seal_turn(state.turn);
    TurnOutcome::PrematureClose
}
