//! Public types for the chat API
pub use crate::chat::transport::ChatRequest;
