//! Data Transfer Objects (DTOs) for persistence.
//!
//! DTOs are versioned with `version-migrate` so records written by older
//! clients keep loading after the schema changes.

mod conversation;

pub use conversation::{
    ConversationV1_0_0, ConversationV1_1_0, LegacyMessageDTO, MessageDTO, SenderDTO,
    create_conversation_migrator,
};
