//! Error types for the gemchat application.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A shared error type for the entire gemchat application.
///
/// Transport and network failures abort the current turn only. Frame parse
/// failures are local to a single frame and never leave the stream client.
/// Store failures are logged by the session controller and do not roll back
/// optimistic in-memory state.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChatError {
    /// Non-2xx HTTP status returned before any streaming began
    #[error("Transport error: HTTP {status}: {message}")]
    Transport { status: u16, message: String },

    /// Connection-level failure (reset, DNS, timeout) at any point of a request
    #[error("Network error: {0}")]
    Network(String),

    /// A single SSE payload could not be decoded
    #[error("Frame parse error: {0}")]
    FrameParse(String),

    /// Persistence failure in the conversation store
    #[error("Store error: {0}")]
    Store(String),

    /// Entity not found error with type information
    #[error("Entity not found: {entity_type} '{id}'")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization {
        format: String, // "TOML", "JSON", etc.
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller supplied input that violates an operation precondition
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A turn is already in flight for the targeted conversation
    #[error("A turn is already in flight{}", in_flight_suffix(.conversation_id))]
    TurnInFlight { conversation_id: Option<String> },

    /// An operation needed a selected conversation but none is selected
    #[error("No conversation is selected")]
    NoActiveConversation,

    /// The request was cancelled cooperatively
    #[error("Request cancelled")]
    Cancelled,

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

fn in_flight_suffix(conversation_id: &Option<String>) -> String {
    conversation_id
        .as_deref()
        .map(|id| format!(" for conversation '{id}'"))
        .unwrap_or_default()
}

impl ChatError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    /// Creates a Transport error
    pub fn transport(status: u16, message: impl Into<String>) -> Self {
        Self::Transport {
            status,
            message: message.into(),
        }
    }

    /// Creates a Network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Creates a FrameParse error
    pub fn frame_parse(message: impl Into<String>) -> Self {
        Self::FrameParse(message.into())
    }

    /// Creates a Store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Creates a NotFound error
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    /// Creates a Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates an InvalidInput error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    // ============================================================================
    // Type checking methods
    // ============================================================================

    /// Check if this is a Transport error
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Check if this is a Network error
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Check if this is a Store error
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Check if this is a NotFound error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a Cancelled error
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// HTTP status code carried by a Transport error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this error ends the turn it occurred in.
    ///
    /// Frame parse errors are per-frame and never abort a stream.
    pub fn aborts_turn(&self) -> bool {
        !matches!(self, Self::FrameParse(_))
    }
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        Self::Store(format!("{} (kind: {:?})", err, err.kind()))
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for ChatError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::ser::Error> for ChatError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for ChatError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// A type alias for `Result<T, ChatError>`.
pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_carries_status() {
        let err = ChatError::transport(500, "Internal Server Error");
        assert!(err.is_transport());
        assert_eq!(err.status_code(), Some(500));
        assert_eq!(
            err.to_string(),
            "Transport error: HTTP 500: Internal Server Error"
        );
    }

    #[test]
    fn test_frame_parse_does_not_abort_turn() {
        assert!(!ChatError::frame_parse("bad json").aborts_turn());
        assert!(ChatError::network("reset").aborts_turn());
        assert!(ChatError::transport(429, "slow down").aborts_turn());
    }

    #[test]
    fn test_turn_in_flight_message() {
        let err = ChatError::TurnInFlight {
            conversation_id: Some("abc".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "A turn is already in flight for conversation 'abc'"
        );

        let err = ChatError::TurnInFlight {
            conversation_id: None,
        };
        assert_eq!(err.to_string(), "A turn is already in flight");
    }

    #[test]
    fn test_io_error_maps_to_store() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: ChatError = io.into();
        assert!(err.is_store());
    }
}
