//! Errors raised while talking to the chat backend.

use thiserror::Error;

/// Shown in place of a bot turn that failed before any content
/// arrived.
pub const TURN_ERROR_MESSAGE: &str = "Sorry, I encountered an error. Please try again.";

#[derive(Debug, Error)]
pub enum ChatError {
    /// The session endpoint was unreachable or answered with a
    /// non-success status.
    #[error("session creation failed: {0}")]
    SessionCreation(String),

    /// The chat request failed outright or answered with a
    /// non-success status before any bytes were read.
    #[error("chat connection failed: {0}")]
    Connection(String),

    /// The shell refused a submission.
    #[error("submission rejected: {0}")]
    Rejected(&'static str),
}

impl ChatError {
    pub fn connection(err: impl std::fmt::Display) -> Self {
        Self::Connection(err.to_string())
    }

    pub fn session_creation(err: impl std::fmt::Display) -> Self {
        Self::SessionCreation(err.to_string())
    }
}
