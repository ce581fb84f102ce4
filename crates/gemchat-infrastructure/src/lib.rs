//! Infrastructure layer for gemchat: on-disk conversation store, versioned
//! DTOs, path resolution and configuration loading.

pub mod async_dir_conversation_repository;
pub mod config_service;
pub mod dto;
pub mod paths;

pub use crate::async_dir_conversation_repository::AsyncDirConversationRepository;
pub use crate::config_service::{ConfigService, SecretConfig};
pub use crate::paths::GemchatPaths;
