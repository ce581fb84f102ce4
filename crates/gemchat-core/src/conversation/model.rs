//! Core conversation domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::{Message, Sender};

/// Title used when the first message has no usable words.
pub const UNTITLED: &str = "New chat";

/// An ordered sequence of messages plus listing metadata.
///
/// `messages` is never empty: a conversation only comes into existence
/// together with the user message that started it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation identifier (UUID v4).
    pub id: String,
    /// Human-readable title. Starts as the first words of the first message
    /// and may later be replaced by a generated summary.
    pub title: String,
    /// Messages in conversation order.
    pub messages: Vec<Message>,
    /// Last time a turn touched this conversation. Drives listing order.
    pub last_modified: DateTime<Utc>,
    /// Pinned conversations are listed before all others.
    pub pinned: bool,
}

impl Conversation {
    /// Starts a new conversation from the user's first message.
    pub fn start(first_message: &str, title_word_count: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: provisional_title(first_message, title_word_count),
            messages: vec![Message::user(first_message)],
            last_modified: Utc::now(),
            pinned: false,
        }
    }

    /// Appends a user message and refreshes `last_modified`.
    pub fn push_user_message(&mut self, text: &str) -> &Message {
        self.messages.push(Message::user(text));
        self.touch();
        // Just pushed
        &self.messages[self.messages.len() - 1]
    }

    /// Appends an empty agent message that will receive streamed text.
    pub fn begin_agent_reply(&mut self) {
        self.messages.push(Message::agent(""));
    }

    /// Sets the text of the current turn's agent message.
    ///
    /// If the turn has not produced an agent message yet (the last message is
    /// the user's), one is appended so the user message is never overwritten.
    pub fn set_agent_reply(&mut self, text: &str) {
        match self.messages.last_mut() {
            Some(last) if last.sender == Sender::Agent => {
                last.text.clear();
                last.text.push_str(text);
            }
            _ => self.messages.push(Message::agent(text)),
        }
    }

    /// Whether the last message is an agent message.
    pub fn has_agent_reply(&self) -> bool {
        self.messages.last().is_some_and(Message::is_agent)
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Returns the most recent `window` messages, oldest first.
    pub fn history_window(&self, window: usize) -> &[Message] {
        let window = window.max(1);
        let start = self.messages.len().saturating_sub(window);
        &self.messages[start..]
    }

    /// Refreshes `last_modified` to now.
    pub fn touch(&mut self) {
        self.last_modified = Utc::now();
    }

    /// Case-insensitive match against the title and every message text.
    pub fn matches_query(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.title.to_lowercase().contains(&needle)
            || self
                .messages
                .iter()
                .any(|m| m.text.to_lowercase().contains(&needle))
    }
}

/// Derives a provisional title from the first `word_count` words of a message.
pub fn provisional_title(message: &str, word_count: usize) -> String {
    let title = message
        .split_whitespace()
        .take(word_count.max(1))
        .collect::<Vec<_>>()
        .join(" ");
    if title.is_empty() {
        UNTITLED.to_string()
    } else {
        title
    }
}

/// Orders conversations for listing: pinned first, then most recently modified.
pub fn sort_for_listing(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| {
        b.pinned
            .cmp(&a.pinned)
            .then_with(|| b.last_modified.cmp(&a.last_modified))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_start_uses_first_four_words_as_title() {
        let conversation = Conversation::start("Explain recursion to me like I am five", 4);
        assert_eq!(conversation.title, "Explain recursion to me");
        assert_eq!(conversation.messages.len(), 1);
        assert_eq!(conversation.messages[0].sender, Sender::User);
        assert!(!conversation.pinned);
    }

    #[test]
    fn test_provisional_title_collapses_whitespace() {
        assert_eq!(provisional_title("  hello \n  world  ", 4), "hello world");
        assert_eq!(provisional_title("   ", 4), UNTITLED);
    }

    #[test]
    fn test_set_agent_reply_never_overwrites_user_message() {
        let mut conversation = Conversation::start("hi", 4);
        conversation.set_agent_reply("error text");

        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[0].text, "hi");
        assert_eq!(conversation.messages[1].sender, Sender::Agent);
        assert_eq!(conversation.messages[1].text, "error text");
    }

    #[test]
    fn test_set_agent_reply_updates_in_place() {
        let mut conversation = Conversation::start("hi", 4);
        conversation.begin_agent_reply();
        let id = conversation.messages[1].id.clone();

        conversation.set_agent_reply("Recur");
        conversation.set_agent_reply("Recursion is...");

        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[1].id, id);
        assert_eq!(conversation.messages[1].text, "Recursion is...");
    }

    #[test]
    fn test_history_window_keeps_most_recent() {
        let mut conversation = Conversation::start("m0", 4);
        for i in 1..15 {
            conversation.push_user_message(&format!("m{i}"));
        }

        let window = conversation.history_window(10);
        assert_eq!(window.len(), 10);
        assert_eq!(window[0].text, "m5");
        assert_eq!(window[9].text, "m14");

        assert_eq!(conversation.history_window(100).len(), 15);
    }

    #[test]
    fn test_matches_query() {
        let mut conversation = Conversation::start("Rust lifetimes", 4);
        conversation.set_agent_reply("Borrow checker details");

        assert!(conversation.matches_query("LIFETIMES"));
        assert!(conversation.matches_query("borrow"));
        assert!(conversation.matches_query(""));
        assert!(!conversation.matches_query("python"));
    }

    #[test]
    fn test_sort_for_listing_pinned_first() {
        let now = Utc::now();
        let mut old_pinned = Conversation::start("old pinned", 4);
        old_pinned.pinned = true;
        old_pinned.last_modified = now - Duration::hours(5);
        let mut recent = Conversation::start("recent", 4);
        recent.last_modified = now;
        let mut older = Conversation::start("older", 4);
        older.last_modified = now - Duration::hours(1);

        let mut list = vec![older.clone(), recent.clone(), old_pinned.clone()];
        sort_for_listing(&mut list);

        let ids: Vec<_> = list.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec![old_pinned.id.as_str(), recent.id.as_str(), older.id.as_str()]);
    }
}
