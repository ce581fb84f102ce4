//! Application configuration model.
//!
//! Loaded from `config.toml` by the infrastructure layer. Every field has a
//! default so a missing file or a partial file is always usable.

use serde::{Deserialize, Serialize};

pub const DEFAULT_HISTORY_WINDOW: usize = 10;
pub const DEFAULT_TITLE_WORD_COUNT: usize = 4;
pub const DEFAULT_ERROR_MESSAGE: &str = "Sorry, I encountered an error. Please try again.";
pub const DEFAULT_EMPTY_RESPONSE_MESSAGE: &str = "No response";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

/// Root of `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default)]
    pub chat: ChatSettings,
    #[serde(default)]
    pub gemini: GeminiSettings,
}

/// Behaviour of the session controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Number of most recent messages sent as history with each request.
    pub history_window: usize,
    /// Number of words of the first message used as the provisional title.
    pub title_word_count: usize,
    /// Agent text committed when a turn fails.
    pub error_message: String,
    /// Agent text committed when a turn completes without any text.
    pub empty_response_message: String,
    /// Request a generated title after the first turn of a new conversation.
    pub generate_titles: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            history_window: DEFAULT_HISTORY_WINDOW,
            title_word_count: DEFAULT_TITLE_WORD_COUNT,
            error_message: DEFAULT_ERROR_MESSAGE.to_string(),
            empty_response_message: DEFAULT_EMPTY_RESPONSE_MESSAGE.to_string(),
            generate_titles: true,
        }
    }
}

/// Generation endpoint settings. The API key lives in `secret.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiSettings {
    pub base_url: String,
    pub model: String,
    /// Model used for title generation; falls back to `model`.
    pub title_model: Option<String>,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            title_model: None,
        }
    }
}

impl GeminiSettings {
    pub fn title_model(&self) -> &str {
        self.title_model.as_deref().unwrap_or(&self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ChatConfig = toml::from_str(
            r#"
[chat]
history_window = 4

[gemini]
model = "gemini-2.0-flash"
"#,
        )
        .unwrap();

        assert_eq!(config.chat.history_window, 4);
        assert_eq!(config.chat.title_word_count, DEFAULT_TITLE_WORD_COUNT);
        assert_eq!(config.chat.error_message, DEFAULT_ERROR_MESSAGE);
        assert_eq!(config.gemini.model, "gemini-2.0-flash");
        assert_eq!(config.gemini.base_url, DEFAULT_GEMINI_BASE_URL);
        assert_eq!(config.gemini.title_model(), "gemini-2.0-flash");
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config: ChatConfig = toml::from_str("").unwrap();
        assert_eq!(config, ChatConfig::default());
    }
}
