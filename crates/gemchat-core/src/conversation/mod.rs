//! Conversation domain module.
//!
//! # Module Structure
//!
//! - `message`: Message types (`Sender`, `Message`)
//! - `model`: The `Conversation` aggregate and listing helpers
//! - `repository`: Repository trait for conversation persistence

mod message;
mod model;
mod repository;

pub use message::{Message, Sender};
pub use model::{Conversation, UNTITLED, provisional_title, sort_for_listing};
pub use repository::ConversationRepository;
