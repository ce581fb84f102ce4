//! AsyncDirStorage-based ConversationRepository implementation

use crate::dto::create_conversation_migrator;
use crate::paths::GemchatPaths;
use async_trait::async_trait;
use gemchat_core::conversation::{Conversation, ConversationRepository};
use gemchat_core::error::{ChatError, Result};
use std::path::Path;
use tokio::fs;
use version_migrate::{AsyncDirStorage, DirStorageStrategy, FilenameEncoding, FormatStrategy};

const ENTITY_NAME: &str = "conversation";
const DOMAIN_DIR: &str = "conversations";

/// AsyncDirStorage-based conversation repository.
///
/// Directory structure:
/// ```text
/// base_dir/
/// └── conversations/
///     ├── conversation-id-1.toml
///     └── conversation-id-2.toml
/// ```
///
/// Each save rewrites one whole file through AsyncDirStorage, so a record is
/// either fully replaced or left untouched.
pub struct AsyncDirConversationRepository {
    storage: AsyncDirStorage,
}

impl AsyncDirConversationRepository {
    /// Creates a repository at the default location (`~/.config/gemchat`).
    pub async fn default_location() -> Result<Self> {
        Self::new(None).await
    }

    /// Creates a repository rooted at `base_dir`, or at the default location.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Store` if the directory cannot be resolved or
    /// created, or if AsyncDirStorage initialization fails.
    pub async fn new(base_dir: Option<&Path>) -> Result<Self> {
        let paths = GemchatPaths::new(base_dir);
        let config_dir = paths
            .config_dir()
            .map_err(|e| ChatError::store(format!("Failed to get config directory: {}", e)))?;

        fs::create_dir_all(&config_dir)
            .await
            .map_err(|e| ChatError::store(format!("Failed to create base directory: {}", e)))?;

        let app_paths = paths
            .app_paths()
            .map_err(|e| ChatError::store(format!("Failed to resolve storage paths: {}", e)))?;

        let strategy = DirStorageStrategy::default()
            .with_format(FormatStrategy::Toml)
            .with_filename_encoding(FilenameEncoding::Direct);

        let storage = AsyncDirStorage::new(
            app_paths,
            DOMAIN_DIR,
            create_conversation_migrator(),
            strategy,
        )
        .await
        .map_err(|e| ChatError::store(format!("Failed to create conversation storage: {}", e)))?;

        Ok(Self { storage })
    }

    /// Returns the directory holding conversation files.
    pub fn conversations_dir(&self) -> &Path {
        self.storage.base_path()
    }
}

/// Whether a storage error means "no such record".
fn is_not_found(error: &impl std::fmt::Display) -> bool {
    let error_str = error.to_string();
    error_str.contains("No such file or directory")
        || error_str.contains("not found")
        || error_str.contains("cannot find")
}

#[async_trait]
impl ConversationRepository for AsyncDirConversationRepository {
    async fn find_by_id(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        match self
            .storage
            .load::<Conversation>(ENTITY_NAME, conversation_id)
            .await
        {
            Ok(conversation) => Ok(Some(conversation)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(ChatError::store(format!(
                "Failed to load conversation '{}': {}",
                conversation_id, e
            ))),
        }
    }

    async fn save(&self, conversation: &Conversation) -> Result<()> {
        tracing::debug!(
            conversation_id = %conversation.id,
            messages = conversation.messages.len(),
            "Saving conversation"
        );
        self.storage
            .save(ENTITY_NAME, &conversation.id, conversation)
            .await
            .map_err(|e| ChatError::store(format!("Failed to save conversation: {}", e)))
    }

    async fn delete(&self, conversation_id: &str) -> Result<()> {
        match self.storage.delete(conversation_id).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(ChatError::store(format!(
                "Failed to delete conversation: {}",
                e
            ))),
        }
    }

    async fn list_all(&self) -> Result<Vec<Conversation>> {
        let all = self
            .storage
            .load_all::<Conversation>(ENTITY_NAME)
            .await
            .map_err(|e| ChatError::store(format!("Failed to load all conversations: {}", e)))?;

        let mut conversations: Vec<Conversation> =
            all.into_iter().map(|(_, conversation)| conversation).collect();

        // Most recent first
        conversations.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));

        Ok(conversations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use gemchat_core::conversation::Sender;
    use tempfile::TempDir;

    async fn create_test_repository() -> (AsyncDirConversationRepository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let repo = AsyncDirConversationRepository::new(Some(temp_dir.path()))
            .await
            .unwrap();
        (repo, temp_dir)
    }

    fn create_test_conversation(text: &str) -> Conversation {
        let mut conversation = Conversation::start(text, 4);
        conversation.set_agent_reply("Hi there!");
        conversation
    }

    #[tokio::test]
    async fn test_save_and_find_by_id() {
        let (repository, _temp) = create_test_repository().await;
        let conversation = create_test_conversation("Hello world");

        repository.save(&conversation).await.unwrap();
        let loaded = repository.find_by_id(&conversation.id).await.unwrap();

        let loaded = loaded.expect("conversation should exist");
        assert_eq!(loaded.id, conversation.id);
        assert_eq!(loaded.title, "Hello world");
        assert_eq!(loaded.messages, conversation.messages);
        assert_eq!(loaded.messages[1].sender, Sender::Agent);
    }

    #[tokio::test]
    async fn test_save_replaces_whole_record() {
        let (repository, _temp) = create_test_repository().await;
        let mut conversation = create_test_conversation("Replace me");
        repository.save(&conversation).await.unwrap();

        conversation.title = "Renamed".to_string();
        conversation.pinned = true;
        conversation.push_user_message("second");
        repository.save(&conversation).await.unwrap();

        let loaded = repository
            .find_by_id(&conversation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.title, "Renamed");
        assert!(loaded.pinned);
        assert_eq!(loaded.messages.len(), 3);
        assert_eq!(repository.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_all_most_recent_first() {
        let (repository, _temp) = create_test_repository().await;
        let now = Utc::now();

        let mut old = create_test_conversation("old");
        old.last_modified = now - Duration::minutes(10);
        let mut new = create_test_conversation("new");
        new.last_modified = now;

        repository.save(&old).await.unwrap();
        repository.save(&new).await.unwrap();

        let conversations = repository.list_all().await.unwrap();
        assert_eq!(conversations.len(), 2);
        assert_eq!(conversations[0].id, new.id);
        assert_eq!(conversations[1].id, old.id);
    }

    #[tokio::test]
    async fn test_delete() {
        let (repository, _temp) = create_test_repository().await;
        let conversation = create_test_conversation("delete me");
        repository.save(&conversation).await.unwrap();

        repository.delete(&conversation.id).await.unwrap();

        assert!(
            repository
                .find_by_id(&conversation.id)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_find_nonexistent() {
        let (repository, _temp) = create_test_repository().await;
        let result = repository.find_by_id("nonexistent").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_records_are_files_in_conversations_dir() {
        let (repository, temp) = create_test_repository().await;
        let dir = repository.conversations_dir().to_path_buf();
        assert!(dir.starts_with(temp.path()));

        let conversation = create_test_conversation("on disk");
        repository.save(&conversation).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|name| name.contains(&conversation.id)));
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let conversation = create_test_conversation("durable");
        {
            let repository = AsyncDirConversationRepository::new(Some(temp_dir.path()))
                .await
                .unwrap();
            repository.save(&conversation).await.unwrap();
        }

        let reopened = AsyncDirConversationRepository::new(Some(temp_dir.path()))
            .await
            .unwrap();
        let loaded = reopened.find_by_id(&conversation.id).await.unwrap();
        assert_eq!(loaded.map(|c| c.messages), Some(conversation.messages));
    }
}
