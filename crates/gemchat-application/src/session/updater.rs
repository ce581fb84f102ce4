//! Ordered writes of conversation records.
//!
//! The store only replaces whole records, so two writers racing on the same
//! conversation can undo each other. Every write for a conversation goes
//! through one async lock, and the record to write is taken only once the
//! lock is held, so the last write always carries the newest state.

use gemchat_core::conversation::{Conversation, ConversationRepository};
use gemchat_core::error::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;

/// Serializes store writes per conversation id.
pub struct ConversationUpdater {
    repository: Arc<dyn ConversationRepository>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ConversationUpdater {
    pub fn new(repository: Arc<dyn ConversationRepository>) -> Self {
        Self {
            repository,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, conversation_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(conversation_id.to_string())
            .or_default()
            .clone()
    }

    /// Saves the record returned by `latest`.
    ///
    /// `latest` runs after every earlier write for `conversation_id` has
    /// finished. When it returns `None` nothing is written and `Ok(None)` is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns the store error if saving fails.
    pub async fn save_latest<F>(
        &self,
        conversation_id: &str,
        latest: F,
    ) -> Result<Option<Conversation>>
    where
        F: FnOnce() -> Option<Conversation>,
    {
        let lock = self.lock_for(conversation_id);
        let _held = lock.lock().await;

        let Some(conversation) = latest() else {
            tracing::debug!(conversation_id = %conversation_id, "Nothing to save");
            return Ok(None);
        };

        tracing::debug!(
            conversation_id = %conversation.id,
            title = %conversation.title,
            pinned = conversation.pinned,
            messages = conversation.messages.len(),
            "Saving conversation"
        );
        self.repository.save(&conversation).await?;
        Ok(Some(conversation))
    }

    /// Deletes the record once earlier writes for it have finished.
    pub async fn delete(&self, conversation_id: &str) -> Result<()> {
        let lock = self.lock_for(conversation_id);
        let result = {
            let _held = lock.lock().await;
            self.repository.delete(conversation_id).await
        };
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(conversation_id);
        result
    }
}
