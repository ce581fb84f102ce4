//! Completion service abstraction.
//!
//! The session controller depends on this trait rather than on a concrete HTTP
//! client, so turns can be driven by any generation backend.

use crate::conversation::Message;
use crate::error::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Per-request options for a streamed completion.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    /// Ask the backend to ground the answer with web search.
    pub search_enabled: bool,
    /// Cancelling this token stops reading the stream and ends the request
    /// with [`ChatError::Cancelled`](crate::ChatError::Cancelled).
    pub cancel: CancellationToken,
}

impl CompletionOptions {
    pub fn new(search_enabled: bool) -> Self {
        Self {
            search_enabled,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// A backend that turns a conversation history into generated text.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Streams a completion for `history`.
    ///
    /// `on_delta` is called synchronously once per non-empty delta, in the
    /// order the deltas were decoded. The returned string is the
    /// concatenation of every delta, or the backend's non-streaming result
    /// when no delta arrived, or an empty string.
    ///
    /// # Errors
    ///
    /// - `ChatError::InvalidInput` if `history` is empty
    /// - `ChatError::Transport` for a non-success HTTP status (no delta is emitted)
    /// - `ChatError::Network` for connection-level failures
    /// - `ChatError::Cancelled` when `options.cancel` fires
    async fn stream_completion(
        &self,
        history: &[Message],
        options: &CompletionOptions,
        on_delta: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String>;

    /// Generates a short title summarizing `history` (non-streaming).
    async fn generate_title(&self, history: &[Message]) -> Result<String>;
}
