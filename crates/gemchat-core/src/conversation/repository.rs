//! Conversation repository trait.
//!
//! Defines the interface for the local conversation store.

use super::model::Conversation;
use crate::error::Result;
use async_trait::async_trait;

/// An abstract repository for persisting conversations.
///
/// Records are keyed by conversation id and written with full-record
/// replacement semantics: there are no partial field updates at this layer,
/// so callers that change one field must read, modify, then save.
///
/// Every operation is atomic from the caller's point of view. A failed `save`
/// must never leave a partially written record behind.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Finds a conversation by its ID.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Conversation))`: Conversation found
    /// - `Ok(None)`: No record with this id
    /// - `Err(_)`: Error occurred during retrieval
    async fn find_by_id(&self, conversation_id: &str) -> Result<Option<Conversation>>;

    /// Inserts or replaces a conversation.
    async fn save(&self, conversation: &Conversation) -> Result<()>;

    /// Deletes a conversation. Deleting an unknown id is not an error.
    async fn delete(&self, conversation_id: &str) -> Result<()>;

    /// Lists all stored conversations, most recently modified first.
    async fn list_all(&self) -> Result<Vec<Conversation>>;
}
