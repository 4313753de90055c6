//! Public types for the session API
pub use crate::chat::transport::SessionResponse;
