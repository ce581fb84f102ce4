//! Conversation DTOs and migrations

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use version_migrate::{FromDomain, IntoDomain, MigratesTo, Versioned};

use gemchat_core::conversation::{Conversation, Message, Sender, UNTITLED};

// ============================================================================
// Message DTOs
// ============================================================================

/// Legacy message shape written by the browser client.
///
/// `sender` is a free-form display name: "Me" for the user, anything else
/// ("Gemini") for the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyMessageDTO {
    pub sender: String,
    pub text: String,
}

/// Sender DTO matching the domain model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SenderDTO {
    User,
    Agent,
}

impl From<SenderDTO> for Sender {
    fn from(dto: SenderDTO) -> Self {
        match dto {
            SenderDTO::User => Sender::User,
            SenderDTO::Agent => Sender::Agent,
        }
    }
}

impl From<Sender> for SenderDTO {
    fn from(sender: Sender) -> Self {
        match sender {
            Sender::User => SenderDTO::User,
            Sender::Agent => SenderDTO::Agent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDTO {
    pub id: String,
    pub sender: SenderDTO,
    pub text: String,
}

impl From<MessageDTO> for Message {
    fn from(dto: MessageDTO) -> Self {
        Message {
            id: dto.id,
            sender: dto.sender.into(),
            text: dto.text,
        }
    }
}

impl From<Message> for MessageDTO {
    fn from(message: Message) -> Self {
        MessageDTO {
            id: message.id,
            sender: message.sender.into(),
            text: message.text,
        }
    }
}

// ============================================================================
// Conversation DTOs
// ============================================================================

/// Represents V1.0.0 of the conversation schema.
/// Legacy browser record with 'name' instead of 'title' and no message ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Versioned)]
#[versioned(version = "1.0.0")]
pub struct ConversationV1_0_0 {
    /// Conversation identifier (millisecond timestamp in legacy data)
    pub id: String,
    /// Display name (renamed to 'title' in V1.1.0)
    pub name: String,
    pub messages: Vec<LegacyMessageDTO>,
    /// Last update time (ISO 8601), absent in the oldest records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Represents V1.1.0 of the conversation schema.
/// Adds message ids, typed senders, `last_modified` and `pinned`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Versioned)]
#[versioned(version = "1.1.0")]
pub struct ConversationV1_1_0 {
    pub id: String,
    pub title: String,
    pub messages: Vec<MessageDTO>,
    /// Last update time (RFC 3339)
    pub last_modified: String,
    #[serde(default)]
    pub pinned: bool,
}

/// Deterministic message id for legacy messages, stable across reloads.
fn legacy_message_id(conversation_id: &str, index: usize) -> String {
    let combined = format!("{}:{}", conversation_id, index);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, combined.as_bytes()).to_string()
}

/// Resolves the legacy modification time.
///
/// Legacy ids are `Date.now()` values, so they double as a creation time
/// when no timestamp was recorded.
fn legacy_last_modified(id: &str, timestamp: Option<&str>) -> DateTime<Utc> {
    timestamp
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.with_timezone(&Utc))
        .or_else(|| {
            id.parse::<i64>()
                .ok()
                .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
        })
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Migration from V1.0.0 to V1.1.0.
impl MigratesTo<ConversationV1_1_0> for ConversationV1_0_0 {
    fn migrate(self) -> ConversationV1_1_0 {
        let last_modified = legacy_last_modified(&self.id, self.timestamp.as_deref());
        let messages = self
            .messages
            .into_iter()
            .enumerate()
            .map(|(index, message)| MessageDTO {
                id: legacy_message_id(&self.id, index),
                sender: if message.sender == "Me" {
                    SenderDTO::User
                } else {
                    SenderDTO::Agent
                },
                text: message.text,
            })
            .collect();

        let title = if self.name.trim().is_empty() {
            UNTITLED.to_string()
        } else {
            self.name
        };

        ConversationV1_1_0 {
            id: self.id,
            title,
            messages,
            last_modified: last_modified.to_rfc3339(),
            pinned: false,
        }
    }
}

// ============================================================================
// Domain model conversions
// ============================================================================

/// Convert ConversationV1_1_0 DTO to domain model.
impl IntoDomain<Conversation> for ConversationV1_1_0 {
    fn into_domain(self) -> Conversation {
        let last_modified = DateTime::parse_from_rfc3339(&self.last_modified)
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(|e| {
                tracing::warn!(
                    conversation_id = %self.id,
                    "Invalid last_modified '{}': {}",
                    self.last_modified,
                    e
                );
                DateTime::<Utc>::UNIX_EPOCH
            });

        Conversation {
            id: self.id,
            title: self.title,
            messages: self.messages.into_iter().map(Into::into).collect(),
            last_modified,
            pinned: self.pinned,
        }
    }
}

/// Convert domain model to ConversationV1_1_0 DTO for persistence.
impl FromDomain<Conversation> for ConversationV1_1_0 {
    fn from_domain(conversation: Conversation) -> Self {
        ConversationV1_1_0 {
            id: conversation.id,
            title: conversation.title,
            messages: conversation.messages.into_iter().map(Into::into).collect(),
            last_modified: conversation.last_modified.to_rfc3339(),
            pinned: conversation.pinned,
        }
    }
}

// ============================================================================
// Migrator factory
// ============================================================================

/// Creates and configures a Migrator instance for Conversation entities.
///
/// # Migration Path
///
/// - V1.0.0 → V1.1.0: `name` → `title`, sender names → `User`/`Agent`,
///   generated message ids, `timestamp` → `last_modified`, `pinned = false`
/// - V1.1.0 → Conversation: Converts DTO to domain model
pub fn create_conversation_migrator() -> version_migrate::Migrator {
    let mut migrator = version_migrate::Migrator::builder().build();

    let conversation_path = version_migrate::Migrator::define("conversation")
        .from::<ConversationV1_0_0>()
        .step::<ConversationV1_1_0>()
        .into_with_save::<Conversation>();

    migrator
        .register(conversation_path)
        .expect("Failed to register conversation migration path");

    migrator
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_record_migrates_to_domain() {
        let migrator = create_conversation_migrator();

        let toml_str = r#"
version = "1.0.0"
id = "1717000000000"
name = "Explain recursion"

[[messages]]
sender = "Me"
text = "Explain recursion"

[[messages]]
sender = "Gemini"
text = "Recursion is..."
"#;
        let toml_value: toml::Value = toml::from_str(toml_str).unwrap();

        let result: Result<Conversation, _> = migrator.load_flat_from("conversation", toml_value);
        assert!(result.is_ok(), "Migration failed: {:?}", result.err());
        let conversation = result.unwrap();

        assert_eq!(conversation.id, "1717000000000");
        assert_eq!(conversation.title, "Explain recursion");
        assert!(!conversation.pinned);
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[0].sender, Sender::User);
        assert_eq!(conversation.messages[1].sender, Sender::Agent);
        assert_eq!(conversation.messages[1].text, "Recursion is...");
        assert_eq!(
            conversation.messages[0].id,
            legacy_message_id("1717000000000", 0)
        );
        assert_eq!(conversation.last_modified.timestamp_millis(), 1_717_000_000_000);
    }

    #[test]
    fn test_legacy_timestamp_wins_over_id() {
        let ts = legacy_last_modified("1717000000000", Some("2024-01-01T00:00:00Z"));
        assert_eq!(ts.to_rfc3339(), "2024-01-01T00:00:00+00:00");

        let ts = legacy_last_modified("not-a-number", None);
        assert_eq!(ts, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn test_current_record_round_trips_metadata() {
        let mut conversation = Conversation::start("pinned chat", 4);
        conversation.pinned = true;
        let dto = ConversationV1_1_0::from_domain(conversation.clone());
        let restored = dto.into_domain();

        assert_eq!(restored.id, conversation.id);
        assert!(restored.pinned);
        assert_eq!(restored.messages, conversation.messages);
    }
}
