//! Per-turn state machine and the UI-facing turn flags.
//!
//! ```text
//! Idle -> PersistUserMessage -> AwaitingFirstByte
//! AwaitingFirstByte -> Streaming          (first delta)
//! AwaitingFirstByte -> PersistFinal       (stream ended without text)
//! AwaitingFirstByte -> Failed
//! Streaming -> Streaming                  (further deltas)
//! Streaming -> PersistFinal -> Idle
//! Streaming -> Failed
//! Failed -> PersistErrorMessage -> Idle
//! ```

use std::fmt;

/// Phase of one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnPhase {
    #[default]
    Idle,
    PersistUserMessage,
    AwaitingFirstByte,
    Streaming,
    PersistFinal,
    Failed,
    PersistErrorMessage,
}

/// Something that happened during a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEvent {
    /// The user submitted a message.
    Submitted,
    /// The store write for the user message returned (successfully or not).
    UserMessagePersisted,
    /// A text delta arrived.
    DeltaReceived,
    /// The stream resolved normally.
    StreamEnded,
    /// The stream failed or was cancelled without text.
    StreamFailed,
    /// The fallback error text is being committed.
    ErrorRecorded,
    /// The terminal store write returned.
    Committed,
}

impl TurnPhase {
    /// Returns the phase reached by applying `event`, or `None` when the
    /// transition is not allowed from this phase.
    pub fn next(self, event: TurnEvent) -> Option<TurnPhase> {
        use TurnEvent as E;
        use TurnPhase as P;

        match (self, event) {
            (P::Idle, E::Submitted) => Some(P::PersistUserMessage),
            (P::PersistUserMessage, E::UserMessagePersisted) => Some(P::AwaitingFirstByte),
            (P::AwaitingFirstByte | P::Streaming, E::DeltaReceived) => Some(P::Streaming),
            (P::AwaitingFirstByte | P::Streaming, E::StreamEnded) => Some(P::PersistFinal),
            (P::AwaitingFirstByte | P::Streaming, E::StreamFailed) => Some(P::Failed),
            (P::Failed, E::ErrorRecorded) => Some(P::PersistErrorMessage),
            (P::PersistFinal | P::PersistErrorMessage, E::Committed) => Some(P::Idle),
            _ => None,
        }
    }

    /// Applies `event` in place. Disallowed transitions leave the phase
    /// unchanged and return `false`.
    pub fn advance(&mut self, event: TurnEvent) -> bool {
        match self.next(event) {
            Some(next) => {
                if next != *self {
                    tracing::debug!(from = %self, to = %next, ?event, "Turn transition");
                }
                *self = next;
                true
            }
            None => {
                tracing::warn!(phase = %self, ?event, "Ignoring invalid turn transition");
                false
            }
        }
    }

    /// A request is in flight for every phase except `Idle`.
    pub fn is_loading(self) -> bool {
        self != TurnPhase::Idle
    }

    /// At least one delta has been received for the current turn.
    pub fn is_streaming(self) -> bool {
        self == TurnPhase::Streaming
    }
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnPhase::Idle => "idle",
            TurnPhase::PersistUserMessage => "persist_user_message",
            TurnPhase::AwaitingFirstByte => "awaiting_first_byte",
            TurnPhase::Streaming => "streaming",
            TurnPhase::PersistFinal => "persist_final",
            TurnPhase::Failed => "failed",
            TurnPhase::PersistErrorMessage => "persist_error_message",
        };
        f.write_str(name)
    }
}

/// Flags the view layer uses to disable input and show progress.
///
/// Always describes the currently selected conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnState {
    pub is_loading: bool,
    pub is_streaming: bool,
    pub active_conversation_id: Option<String>,
    pub phase: TurnPhase,
}

impl TurnState {
    pub fn idle(active_conversation_id: Option<String>) -> Self {
        Self {
            active_conversation_id,
            ..Self::default()
        }
    }

    pub fn for_phase(active_conversation_id: Option<String>, phase: TurnPhase) -> Self {
        Self {
            is_loading: phase.is_loading(),
            is_streaming: phase.is_streaming(),
            active_conversation_id,
            phase,
        }
    }
}
