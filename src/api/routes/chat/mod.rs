pub mod public;
mod router;
pub use router::{reply_tokens, router};
