//! Application layer for gemchat.
//!
//! Coordinates the conversation store and the completion service to run chat
//! turns, and publishes the live state the view layer renders.

pub mod session;

pub use session::{
    ChatSessionController, ConversationUpdater, LiveSnapshot, TurnEvent, TurnOutcome, TurnPhase,
    TurnState, TurnStatus,
};
