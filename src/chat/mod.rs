//! Streaming chat client used by the portfolio assistant.
//!
//! Data flows leaf to root: `transport` yields decoded text, `frame`
//! parses it into frames, `turn` applies frames to the `store`, and
//! `render` turns the current text of a turn into blocks. `widget`
//! ties these together behind open/close and submit.

pub mod error;
pub mod frame;
pub mod render;
pub mod session;
pub mod store;
pub mod transport;
pub mod turn;
pub mod widget;

pub use error::{ChatError, TURN_ERROR_MESSAGE};
pub use frame::{Frame, FrameParser};
pub use session::{SessionId, SessionManager};
pub use store::{ConversationLog, ConversationTurn, MessageStore, Role, TurnId};
pub use transport::{ChatApi, HttpChatApi};
pub use turn::TurnOutcome;
pub use widget::{ChatWidget, DEFAULT_GREETING};
