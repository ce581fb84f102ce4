//! REPL command parsing.

/// Slash commands offered for completion and hints.
pub const COMMANDS: &[&str] = &[
    "/new", "/list", "/open", "/delete", "/pin", "/search", "/web", "/title", "/help", "/quit",
];

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Text to send to the model.
    Message(String),
    /// Clear the selection so the next message starts a new conversation.
    New,
    List,
    Open(String),
    Delete(String),
    Pin(String),
    Search(String),
    /// Toggle web search grounding for following messages.
    ToggleWeb,
    /// Regenerate the title of the current conversation.
    Title,
    Help,
    Quit,
    Unknown(String),
}

/// Parses one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line == "quit" || line == "exit" {
        return Some(Command::Quit);
    }
    if !line.starts_with('/') {
        return Some(Command::Message(line.to_string()));
    }

    let (name, arg) = match line.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim().to_string()),
        None => (line, String::new()),
    };

    let command = match name {
        "/new" => Command::New,
        "/list" | "/ls" => Command::List,
        "/open" if !arg.is_empty() => Command::Open(arg),
        "/delete" | "/rm" if !arg.is_empty() => Command::Delete(arg),
        "/pin" => Command::Pin(arg),
        "/search" => Command::Search(arg),
        "/web" => Command::ToggleWeb,
        "/title" => Command::Title,
        "/help" => Command::Help,
        "/quit" | "/exit" => Command::Quit,
        _ => Command::Unknown(line.to_string()),
    };
    Some(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_message() {
        assert_eq!(
            parse("  Explain recursion  "),
            Some(Command::Message("Explain recursion".to_string()))
        );
        assert_eq!(parse("   "), None);
    }

    #[test]
    fn test_commands_with_arguments() {
        assert_eq!(parse("/open 2"), Some(Command::Open("2".to_string())));
        assert_eq!(
            parse("/search  rust  async "),
            Some(Command::Search("rust  async".to_string()))
        );
        assert_eq!(parse("/pin"), Some(Command::Pin(String::new())));
        assert_eq!(parse("/rm abc"), Some(Command::Delete("abc".to_string())));
    }

    #[test]
    fn test_missing_argument_is_unknown() {
        assert_eq!(parse("/open"), Some(Command::Unknown("/open".to_string())));
        assert_eq!(parse("/frobnicate"), Some(Command::Unknown("/frobnicate".to_string())));
    }

    #[test]
    fn test_quit_aliases() {
        for input in ["quit", "exit", "/quit", "/exit"] {
            assert_eq!(parse(input), Some(Command::Quit), "{input}");
        }
    }
}
