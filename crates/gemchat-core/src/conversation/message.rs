//! Conversation message types.
//!
//! A message is one turn-half in a conversation: either the user's input or
//! the agent's (model's) reply.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Represents who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sender {
    /// Message typed by the user.
    User,
    /// Message produced by the generation service.
    Agent,
}

impl Sender {
    /// Role name used on the generation endpoint's wire format.
    pub fn wire_role(self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Agent => "model",
        }
    }
}

/// A single message in a conversation history.
///
/// The `id` is assigned at creation and never changes. The `text` of an agent
/// message grows in place while its turn is in flight and is fixed once the
/// turn is committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Opaque unique identifier (UUID v4).
    pub id: String,
    /// The author of the message.
    pub sender: Sender,
    /// The message text.
    pub text: String,
}

impl Message {
    /// Creates a message with a freshly generated id.
    pub fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender,
            text: text.into(),
        }
    }

    /// Creates a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Sender::User, text)
    }

    /// Creates an agent message.
    pub fn agent(text: impl Into<String>) -> Self {
        Self::new(Sender::Agent, text)
    }

    pub fn is_agent(&self) -> bool {
        self.sender == Sender::Agent
    }
}
