//! Domain layer for gemchat.
//!
//! Holds the conversation model, the error taxonomy, configuration types and
//! the traits the other crates implement (`ConversationRepository`,
//! `CompletionService`). Nothing in this crate performs I/O.

pub mod completion;
pub mod config;
pub mod conversation;
pub mod error;

// Re-export common error type
pub use error::{ChatError, Result};
