//! Incremental terminal rendering of live snapshots.

use gemchat_application::LiveSnapshot;

/// Tracks what has been printed of the agent message of the current turn.
#[derive(Debug, Default)]
pub struct StreamRenderer {
    message_id: Option<String>,
    printed: String,
    /// Agent message that was already on screen when the turn started.
    previous_id: Option<String>,
}

impl StreamRenderer {
    /// Starts a new turn. Agent messages already present in `snapshot` are
    /// not printed again.
    pub fn begin_turn(&mut self, snapshot: &LiveSnapshot) {
        self.message_id = None;
        self.printed.clear();
        self.previous_id = snapshot
            .conversation
            .as_ref()
            .and_then(|c| c.last_message())
            .filter(|m| m.is_agent())
            .map(|m| m.id.clone());
    }

    /// Returns the text to print for `snapshot`, if anything changed.
    ///
    /// Growing text yields only the new suffix. Text that no longer extends
    /// what was printed (an error message replacing a partial reply) is
    /// returned whole on a new line.
    pub fn next_output(&mut self, snapshot: &LiveSnapshot) -> Option<String> {
        let last = snapshot.conversation.as_ref()?.last_message()?;
        if !last.is_agent() || self.previous_id.as_deref() == Some(last.id.as_str()) {
            return None;
        }

        if self.message_id.as_deref() != Some(last.id.as_str()) {
            self.message_id = Some(last.id.clone());
            self.printed.clear();
        }

        match last.text.strip_prefix(self.printed.as_str()) {
            Some("") => None,
            Some(suffix) => {
                let suffix = suffix.to_string();
                self.printed.push_str(&suffix);
                Some(suffix)
            }
            None => {
                self.printed = last.text.clone();
                Some(format!("\n{}", last.text))
            }
        }
    }

    /// Whether anything was printed for the current turn.
    pub fn has_output(&self) -> bool {
        !self.printed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemchat_core::conversation::Conversation;

    fn snapshot(conversation: &Conversation) -> LiveSnapshot {
        LiveSnapshot {
            conversation: Some(conversation.clone()),
            ..LiveSnapshot::default()
        }
    }

    #[test]
    fn test_prints_only_new_suffix() {
        let mut conversation = Conversation::start("Explain recursion", 4);
        let mut renderer = StreamRenderer::default();
        renderer.begin_turn(&snapshot(&conversation));
        assert_eq!(renderer.next_output(&snapshot(&conversation)), None);

        conversation.begin_agent_reply();
        conversation.set_agent_reply("Recur");
        assert_eq!(
            renderer.next_output(&snapshot(&conversation)),
            Some("Recur".to_string())
        );
        assert_eq!(renderer.next_output(&snapshot(&conversation)), None);

        conversation.set_agent_reply("Recursion is...");
        assert_eq!(
            renderer.next_output(&snapshot(&conversation)),
            Some("sion is...".to_string())
        );
        assert!(renderer.has_output());
    }

    #[test]
    fn test_replaced_text_is_printed_whole() {
        let mut conversation = Conversation::start("hi", 4);
        let mut renderer = StreamRenderer::default();
        renderer.begin_turn(&snapshot(&conversation));

        conversation.set_agent_reply("partial");
        renderer.next_output(&snapshot(&conversation));
        conversation.set_agent_reply("Sorry");
        assert_eq!(
            renderer.next_output(&snapshot(&conversation)),
            Some("\nSorry".to_string())
        );
    }

    #[test]
    fn test_previous_reply_is_not_reprinted() {
        let mut conversation = Conversation::start("hi", 4);
        conversation.set_agent_reply("old answer");
        let mut renderer = StreamRenderer::default();
        renderer.begin_turn(&snapshot(&conversation));

        assert_eq!(renderer.next_output(&snapshot(&conversation)), None);
        assert!(renderer.next_output(&LiveSnapshot::default()).is_none());

        conversation.push_user_message("again");
        conversation.set_agent_reply("new");
        assert_eq!(
            renderer.next_output(&snapshot(&conversation)),
            Some("new".to_string())
        );
    }
}
