//! Conversation session services.
//!
//! The controller runs turns and owns the live view. The updater orders
//! store writes per conversation, and the turn state machine tracks where
//! each turn is.

mod controller;
mod turn_state;
mod updater;

pub use controller::{ChatSessionController, LiveSnapshot, TurnOutcome, TurnStatus};
pub use turn_state::{TurnEvent, TurnPhase, TurnState};
pub use updater::ConversationUpdater;
