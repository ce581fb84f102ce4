//! Conversation session controller.
//!
//! Sequences turns (user message in, streamed agent reply out), keeps the
//! in-memory conversation list and publishes a [`LiveSnapshot`] of the
//! selected conversation after every change so the view layer can re-render.
//!
//! All mutable state sits behind one `std::sync::Mutex` that is never held
//! across an `.await`. Several turns may be in flight at once, but only for
//! different conversations.

use gemchat_core::completion::{CompletionOptions, CompletionService};
use gemchat_core::config::ChatSettings;
use gemchat_core::conversation::{
    Conversation, ConversationRepository, Message, sort_for_listing,
};
use gemchat_core::error::{ChatError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::turn_state::{TurnEvent, TurnPhase, TurnState};
use super::updater::ConversationUpdater;

/// What the view layer renders: the selected conversation and its turn flags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveSnapshot {
    pub conversation: Option<Conversation>,
    pub turn: TurnState,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnStatus {
    /// The stream resolved; its text (or the empty-reply text) was committed.
    Completed,
    /// The stream failed; the fallback error text was committed.
    Failed(ChatError),
    /// The turn was cancelled; partial text or the error text was committed.
    Cancelled,
    /// The conversation was removed mid-turn; nothing was committed.
    Discarded,
}

/// Result of one turn.
#[derive(Debug)]
pub struct TurnOutcome {
    pub conversation_id: String,
    pub status: TurnStatus,
    /// Text committed as the agent message.
    pub agent_text: String,
    /// Background title generation started after the first turn of a new
    /// conversation.
    pub title_task: Option<JoinHandle<()>>,
}

struct ActiveTurn {
    phase: TurnPhase,
    cancel: CancellationToken,
    /// Set by `remove_chat`; the final commit is skipped.
    removed: bool,
    /// Leading messages that may be written to the store. The streaming
    /// agent message stays out until the turn commits it.
    durable_len: usize,
}

impl ActiveTurn {
    fn submitted(cancel: CancellationToken, durable_len: usize) -> Self {
        let mut phase = TurnPhase::Idle;
        phase.advance(TurnEvent::Submitted);
        Self {
            phase,
            cancel,
            removed: false,
            durable_len,
        }
    }
}

#[derive(Default)]
struct SessionState {
    /// Listing order: pinned first, then most recently modified.
    conversations: Vec<Conversation>,
    selected: Option<String>,
    turns: HashMap<String, ActiveTurn>,
}

impl SessionState {
    fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    fn conversation_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    fn upsert(&mut self, conversation: Conversation) {
        match self.conversation_mut(&conversation.id) {
            Some(existing) => *existing = conversation,
            None => self.conversations.push(conversation),
        }
        self.resort();
    }

    fn resort(&mut self) {
        sort_for_listing(&mut self.conversations);
    }

    fn is_visible(&self, id: &str) -> bool {
        self.selected.as_deref() == Some(id)
    }

    fn turn_state(&self) -> TurnState {
        match &self.selected {
            Some(id) => match self.turns.get(id) {
                Some(turn) => TurnState::for_phase(Some(id.clone()), turn.phase),
                None => TurnState::idle(Some(id.clone())),
            },
            None => TurnState::idle(None),
        }
    }

    /// The live copy of `id` as it may be written to the store.
    fn durable_copy(&self, id: &str) -> Option<Conversation> {
        let mut conversation = self.conversation(id)?.clone();
        if let Some(turn) = self.turns.get(id) {
            if turn.removed {
                return None;
            }
            conversation.messages.truncate(turn.durable_len);
        }
        Some(conversation)
    }

    fn snapshot(&self) -> LiveSnapshot {
        LiveSnapshot {
            conversation: self
                .selected
                .as_deref()
                .and_then(|id| self.conversation(id))
                .cloned(),
            turn: self.turn_state(),
        }
    }
}

/// Returns the turn to idle on every exit path, including a dropped future.
struct TurnGuard<'a> {
    controller: &'a ChatSessionController,
    conversation_id: String,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.controller.lock_state();
        if let Some(turn) = state.turns.remove(&self.conversation_id) {
            turn.cancel.cancel();
        }
        self.controller.publish(&state);
    }
}

/// Orchestrates turns for every conversation of one user.
pub struct ChatSessionController {
    repository: Arc<dyn ConversationRepository>,
    completion: Arc<dyn CompletionService>,
    updater: ConversationUpdater,
    settings: ChatSettings,
    state: Mutex<SessionState>,
    live: watch::Sender<LiveSnapshot>,
}

impl ChatSessionController {
    pub fn new(
        repository: Arc<dyn ConversationRepository>,
        completion: Arc<dyn CompletionService>,
        settings: ChatSettings,
    ) -> Self {
        let (live, _) = watch::channel(LiveSnapshot::default());
        Self {
            updater: ConversationUpdater::new(repository.clone()),
            repository,
            completion,
            settings,
            state: Mutex::new(SessionState::default()),
            live,
        }
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    /// Receives a new snapshot after every delta and every store commit.
    ///
    /// Slow receivers only ever see the latest snapshot; publishing never
    /// waits for them.
    pub fn subscribe(&self) -> watch::Receiver<LiveSnapshot> {
        self.live.subscribe()
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> LiveSnapshot {
        self.live.borrow().clone()
    }

    /// Turn flags for the selected conversation.
    pub fn turn_state(&self) -> TurnState {
        self.lock_state().turn_state()
    }

    /// The in-memory listing, pinned first then most recent first.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.lock_state().conversations.clone()
    }

    pub fn selected_conversation_id(&self) -> Option<String> {
        self.lock_state().selected.clone()
    }

    /// Reloads the listing from the store.
    ///
    /// Conversations with a turn in flight keep their live in-memory copy.
    pub async fn load_conversations(&self) -> Result<Vec<Conversation>> {
        let stored = self.repository.list_all().await.inspect_err(|e| {
            tracing::error!("Failed to load conversations: {}", e);
        })?;

        let mut state = self.lock_state();
        let mut merged: Vec<Conversation> = stored
            .into_iter()
            .filter(|c| !state.turns.contains_key(&c.id))
            .collect();
        merged.extend(
            state
                .conversations
                .iter()
                .filter(|c| state.turns.contains_key(&c.id))
                .cloned(),
        );
        sort_for_listing(&mut merged);
        state.conversations = merged;

        let selection_gone = state
            .selected
            .as_deref()
            .is_some_and(|id| state.conversation(id).is_none());
        if selection_gone {
            state.selected = None;
        }

        tracing::debug!(count = state.conversations.len(), "Loaded conversations");
        self.publish(&state);
        Ok(state.conversations.clone())
    }

    /// Changes the visible conversation. `None` clears the selection.
    ///
    /// Turns keep running when their conversation is hidden, but stop
    /// updating the live snapshot until it is selected again.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::NotFound` if `conversation_id` is neither loaded
    /// nor stored.
    pub async fn select_conversation(
        &self,
        conversation_id: Option<&str>,
    ) -> Result<Option<Conversation>> {
        let Some(id) = conversation_id else {
            let mut state = self.lock_state();
            state.selected = None;
            self.publish(&state);
            return Ok(None);
        };

        {
            let mut state = self.lock_state();
            if let Some(conversation) = state.conversation(id).cloned() {
                state.selected = Some(id.to_string());
                self.publish(&state);
                return Ok(Some(conversation));
            }
        }

        let conversation = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| ChatError::not_found("Conversation", id))?;

        let mut state = self.lock_state();
        if !state.turns.contains_key(id) {
            state.upsert(conversation);
        }
        state.selected = Some(id.to_string());
        self.publish(&state);
        Ok(state.conversation(id).cloned())
    }

    /// Starts a new conversation with `message` and runs its first turn.
    ///
    /// # Errors
    ///
    /// - `ChatError::InvalidInput` if `message` is blank
    /// - `ChatError::TurnInFlight` if the selected conversation has a turn in flight
    ///
    /// Generation failures are not errors: they end in a committed error
    /// message and [`TurnStatus::Failed`].
    pub async fn create_new_chat(
        self: &Arc<Self>,
        message: &str,
        search_enabled: bool,
    ) -> Result<TurnOutcome> {
        let text = validate_message(message)?;
        let conversation = Conversation::start(text, self.settings.title_word_count);
        let cancel = CancellationToken::new();

        {
            let mut state = self.lock_state();
            if let Some(selected) = &state.selected {
                if state.turns.contains_key(selected) {
                    return Err(ChatError::TurnInFlight {
                        conversation_id: Some(selected.clone()),
                    });
                }
            }
            state.upsert(conversation.clone());
            state.selected = Some(conversation.id.clone());
            state.turns.insert(
                conversation.id.clone(),
                ActiveTurn::submitted(cancel.clone(), conversation.messages.len()),
            );
            self.publish(&state);
        }

        let guard = TurnGuard {
            controller: self,
            conversation_id: conversation.id.clone(),
        };
        self.run_turn(guard, conversation, search_enabled, cancel, true)
            .await
    }

    /// Appends `message` to the selected conversation and runs a turn.
    ///
    /// # Errors
    ///
    /// - `ChatError::InvalidInput` if `message` is blank
    /// - `ChatError::NoActiveConversation` if nothing is selected
    /// - `ChatError::TurnInFlight` if the selected conversation has a turn in flight
    pub async fn send_message(
        self: &Arc<Self>,
        message: &str,
        search_enabled: bool,
    ) -> Result<TurnOutcome> {
        let text = validate_message(message)?;
        let cancel = CancellationToken::new();

        let conversation = {
            let mut state = self.lock_state();
            let id = state
                .selected
                .clone()
                .ok_or(ChatError::NoActiveConversation)?;
            if state.turns.contains_key(&id) {
                return Err(ChatError::TurnInFlight {
                    conversation_id: Some(id),
                });
            }

            let conversation = state
                .conversation_mut(&id)
                .ok_or_else(|| ChatError::not_found("Conversation", id.clone()))?;
            conversation.push_user_message(text);
            let working_copy = conversation.clone();

            state.resort();
            let durable_len = working_copy.messages.len();
            state
                .turns
                .insert(id, ActiveTurn::submitted(cancel.clone(), durable_len));
            self.publish(&state);
            working_copy
        };

        let guard = TurnGuard {
            controller: self,
            conversation_id: conversation.id.clone(),
        };
        self.run_turn(guard, conversation, search_enabled, cancel, false)
            .await
    }

    async fn run_turn(
        self: &Arc<Self>,
        _guard: TurnGuard<'_>,
        conversation: Conversation,
        search_enabled: bool,
        cancel: CancellationToken,
        first_turn: bool,
    ) -> Result<TurnOutcome> {
        let id = conversation.id.clone();
        tracing::info!(
            conversation_id = %id,
            messages = conversation.messages.len(),
            search = search_enabled,
            "Turn started"
        );

        // Written before generation starts so the user's message survives a
        // failure before the first byte.
        if let Err(e) = self.persist(&id).await {
            tracing::error!(conversation_id = %id, "Failed to persist user message: {}", e);
        }
        self.advance_turn(&id, TurnEvent::UserMessagePersisted);

        let history = conversation
            .history_window(self.settings.history_window)
            .to_vec();
        let options = CompletionOptions::new(search_enabled).with_cancel(cancel);

        let mut streamed = String::new();
        let result = {
            let streamed = &mut streamed;
            let conversation_id = id.as_str();
            let mut on_delta = |delta: &str| {
                streamed.push_str(delta);
                self.apply_delta(conversation_id, streamed.as_str());
            };
            self.completion
                .stream_completion(&history, &options, &mut on_delta)
                .await
        };

        let (status, agent_text) = match result {
            Ok(text) => {
                self.advance_turn(&id, TurnEvent::StreamEnded);
                let text = if text.is_empty() {
                    self.settings.empty_response_message.clone()
                } else {
                    text
                };
                (TurnStatus::Completed, text)
            }
            Err(ChatError::Cancelled) if !streamed.is_empty() => {
                tracing::info!(conversation_id = %id, "Turn cancelled; keeping partial reply");
                self.advance_turn(&id, TurnEvent::StreamEnded);
                (TurnStatus::Cancelled, streamed)
            }
            Err(ChatError::Cancelled) => {
                tracing::info!(conversation_id = %id, "Turn cancelled before first byte");
                self.advance_turn(&id, TurnEvent::StreamFailed);
                self.advance_turn(&id, TurnEvent::ErrorRecorded);
                (TurnStatus::Cancelled, self.settings.error_message.clone())
            }
            Err(err) => {
                tracing::warn!(
                    conversation_id = %id,
                    status = ?err.status_code(),
                    "Turn failed: {}",
                    err
                );
                self.advance_turn(&id, TurnEvent::StreamFailed);
                self.advance_turn(&id, TurnEvent::ErrorRecorded);
                (TurnStatus::Failed(err), self.settings.error_message.clone())
            }
        };

        let Some(committed) = self.stage_commit(&id, &agent_text) else {
            tracing::info!(conversation_id = %id, "Conversation removed during turn; discarding reply");
            return Ok(TurnOutcome {
                conversation_id: id,
                status: TurnStatus::Discarded,
                agent_text,
                title_task: None,
            });
        };

        if let Err(e) = self.persist(&id).await {
            tracing::error!(conversation_id = %id, "Failed to persist turn: {}", e);
        }
        self.advance_turn(&id, TurnEvent::Committed);

        tracing::info!(
            conversation_id = %id,
            status = ?status,
            chars = agent_text.len(),
            "Turn finished"
        );

        let title_task = (first_turn
            && self.settings.generate_titles
            && status == TurnStatus::Completed)
            .then(|| self.spawn_title_generation(id.clone(), committed.messages));

        Ok(TurnOutcome {
            conversation_id: id,
            status,
            agent_text,
            title_task,
        })
    }

    /// Writes the final agent text into the live copy and returns the record
    /// to persist. Title and pin state come from the live copy, so changes
    /// made during the turn are kept.
    fn stage_commit(&self, id: &str, agent_text: &str) -> Option<Conversation> {
        let mut state = self.lock_state();
        if state.turns.get(id).is_none_or(|turn| turn.removed) {
            return None;
        }

        let committed = state.conversation_mut(id).map(|conversation| {
            conversation.set_agent_reply(agent_text);
            conversation.touch();
            conversation.clone()
        })?;
        if let Some(turn) = state.turns.get_mut(id) {
            turn.durable_len = committed.messages.len();
        }
        state.resort();
        if state.is_visible(id) {
            self.publish(&state);
        }
        Some(committed)
    }

    fn apply_delta(&self, id: &str, text_so_far: &str) {
        let mut state = self.lock_state();
        let Some(turn) = state.turns.get_mut(id) else {
            return;
        };
        let first_delta = turn.phase == TurnPhase::AwaitingFirstByte;
        turn.phase.advance(TurnEvent::DeltaReceived);

        let Some(conversation) = state.conversation_mut(id) else {
            return;
        };
        if first_delta {
            conversation.begin_agent_reply();
        }
        conversation.set_agent_reply(text_so_far);

        if state.is_visible(id) {
            self.publish(&state);
        }
    }

    fn advance_turn(&self, id: &str, event: TurnEvent) {
        let mut state = self.lock_state();
        if let Some(turn) = state.turns.get_mut(id) {
            turn.phase.advance(event);
        }
        if state.is_visible(id) {
            self.publish(&state);
        }
    }

    fn spawn_title_generation(
        self: &Arc<Self>,
        conversation_id: String,
        history: Vec<Message>,
    ) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = controller.apply_generated_title(&conversation_id, &history).await {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    "Title generation failed: {}",
                    e
                );
            }
        })
    }

    /// Generates a fresh title for a loaded conversation and stores it.
    pub async fn refresh_title(&self, conversation_id: &str) -> Result<String> {
        let history = self
            .lock_state()
            .conversation(conversation_id)
            .map(|c| c.messages.clone())
            .ok_or_else(|| ChatError::not_found("Conversation", conversation_id))?;
        self.apply_generated_title(conversation_id, &history).await
    }

    async fn apply_generated_title(&self, id: &str, history: &[Message]) -> Result<String> {
        let title = self.completion.generate_title(history).await?;
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(ChatError::invalid_input("generated title is empty"));
        }

        {
            let mut state = self.lock_state();
            match state.conversation_mut(id) {
                Some(conversation) => conversation.title = title.clone(),
                None => {
                    tracing::debug!(conversation_id = %id, "Conversation gone; dropping title");
                    return Ok(title);
                }
            }
            if state.is_visible(id) {
                self.publish(&state);
            }
        }

        self.persist(id).await.inspect_err(|e| {
            tracing::error!(conversation_id = %id, "Failed to store title: {}", e);
        })?;

        tracing::info!(conversation_id = %id, title = %title, "Title updated");
        Ok(title)
    }

    /// Removes a conversation from the listing and the store.
    ///
    /// A turn in flight for it is cancelled and its reply is not committed.
    /// The in-memory removal is not rolled back if the store fails.
    pub async fn remove_chat(&self, conversation_id: &str) -> Result<()> {
        {
            let mut state = self.lock_state();
            state.conversations.retain(|c| c.id != conversation_id);
            if state.is_visible(conversation_id) {
                state.selected = None;
            }
            if let Some(turn) = state.turns.get_mut(conversation_id) {
                turn.removed = true;
                turn.cancel.cancel();
            }
            self.publish(&state);
        }

        tracing::info!(conversation_id = %conversation_id, "Removing conversation");
        self.updater
            .delete(conversation_id)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    conversation_id = %conversation_id,
                    "Failed to delete conversation: {}",
                    e
                );
            })
    }

    /// Flips the pinned flag and returns the new value.
    ///
    /// The in-memory flag is not rolled back if the store fails.
    pub async fn toggle_pin(&self, conversation_id: &str) -> Result<bool> {
        let pinned = {
            let mut state = self.lock_state();
            let conversation = state
                .conversation_mut(conversation_id)
                .ok_or_else(|| ChatError::not_found("Conversation", conversation_id))?;
            conversation.pinned = !conversation.pinned;
            let pinned = conversation.pinned;

            state.resort();
            if state.is_visible(conversation_id) {
                self.publish(&state);
            }
            pinned
        };

        self.persist(conversation_id).await.inspect_err(|e| {
            tracing::error!(
                conversation_id = %conversation_id,
                "Failed to store pin state: {}",
                e
            );
        })?;
        Ok(pinned)
    }

    /// Case-insensitive search over titles and message texts of the loaded
    /// conversations, in listing order.
    pub fn search_conversations(&self, query: &str) -> Vec<Conversation> {
        self.lock_state()
            .conversations
            .iter()
            .filter(|c| c.matches_query(query))
            .cloned()
            .collect()
    }

    /// Requests cancellation of the turn in flight for `conversation_id`.
    ///
    /// Returns `false` when no turn is in flight for it.
    pub fn cancel_turn(&self, conversation_id: &str) -> bool {
        match self.lock_state().turns.get(conversation_id) {
            Some(turn) => {
                tracing::debug!(conversation_id = %conversation_id, "Cancelling turn");
                turn.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Writes the current durable copy of `id`, ordered after earlier writes
    /// for it. Nothing is written once the conversation is gone from memory.
    async fn persist(&self, id: &str) -> Result<Option<Conversation>> {
        self.updater
            .save_latest(id, || self.lock_state().durable_copy(id))
            .await
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &SessionState) {
        self.live.send_replace(state.snapshot());
    }
}

fn validate_message(message: &str) -> Result<&str> {
    let text = message.trim();
    if text.is_empty() {
        return Err(ChatError::invalid_input("message must not be empty"));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_message_trims() {
        assert_eq!(validate_message("  hi  ").unwrap(), "hi");
        assert!(matches!(
            validate_message(" \n\t "),
            Err(ChatError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_turn_state_follows_selection() {
        let mut state = SessionState::default();
        let conversation = Conversation::start("hello there", 4);
        let id = conversation.id.clone();
        state.upsert(conversation);
        state
            .turns
            .insert(id.clone(), ActiveTurn::submitted(CancellationToken::new(), 1));

        assert_eq!(state.turn_state(), TurnState::idle(None));

        state.selected = Some(id.clone());
        let turn = state.turn_state();
        assert!(turn.is_loading);
        assert_eq!(turn.phase, TurnPhase::PersistUserMessage);

        let snapshot = state.snapshot();
        assert_eq!(snapshot.conversation.map(|c| c.id), Some(id));
    }
}
