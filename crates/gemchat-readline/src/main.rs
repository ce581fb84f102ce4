mod commands;
mod render;

use std::borrow::Cow::{self, Borrowed, Owned};
use std::io::Write;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use colored::Colorize;
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};
use rustyline::history::DefaultHistory;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use gemchat_application::{ChatSessionController, TurnOutcome, TurnStatus};
use gemchat_core::conversation::Sender;
use gemchat_core::error::Result as ChatResult;
use gemchat_infrastructure::{AsyncDirConversationRepository, ConfigService, GemchatPaths};
use gemchat_interaction::GeminiStreamClient;

use crate::commands::{COMMANDS, Command};
use crate::render::StreamRenderer;

const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// CLI helper for rustyline that provides command completion, highlighting and hints.
#[derive(Clone)]
struct CliHelper;

impl Helper for CliHelper {}

impl Completer for CliHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let line = &line[..pos];
        if !line.starts_with('/') || line.contains(' ') {
            return Ok((0, vec![]));
        }

        let candidates = COMMANDS
            .iter()
            .filter(|cmd| cmd.starts_with(line))
            .map(|cmd| Pair {
                display: cmd.to_string(),
                replacement: cmd.to_string(),
            })
            .collect();
        Ok((0, candidates))
    }
}

impl Highlighter for CliHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if line.starts_with('/') {
            Owned(line.bright_cyan().to_string())
        } else {
            Borrowed(line)
        }
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

impl Hinter for CliHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Option<String> {
        let line = &line[..pos];
        if !line.starts_with('/') || line.contains(' ') {
            return None;
        }
        COMMANDS
            .iter()
            .find(|cmd| cmd.starts_with(line) && cmd.len() > line.len())
            .map(|cmd| cmd[line.len()..].to_string())
    }
}

impl Validator for CliHelper {}

/// Logs go to a daily file under the config directory so they never
/// interleave with streamed output.
fn init_logging(paths: &GemchatPaths) -> Result<WorkerGuard> {
    let logs_dir = paths.logs_dir().context("Failed to resolve log directory")?;
    std::fs::create_dir_all(&logs_dir)
        .with_context(|| format!("Failed to create {}", logs_dir.display()))?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&logs_dir, "gemchat.log"));

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false),
        )
        .init();

    Ok(guard)
}

fn resolve_api_key(config_service: &ConfigService) -> Result<String> {
    if let Some(key) = config_service
        .load_api_key()
        .context("Failed to read secret.json")?
    {
        return Ok(key);
    }
    std::env::var(API_KEY_ENV).with_context(|| {
        format!(
            "No Gemini API key found: add {{\"gemini\": {{\"api_key\": \"...\"}}}} to secret.json or set {}",
            API_KEY_ENV
        )
    })
}

/// Resolves a 1-based listing index or an id prefix to a conversation id.
fn resolve_target(controller: &ChatSessionController, target: &str) -> Option<String> {
    let conversations = controller.conversations();
    if let Ok(index) = target.parse::<usize>() {
        return conversations
            .get(index.checked_sub(1)?)
            .map(|c| c.id.clone());
    }
    conversations
        .iter()
        .find(|c| c.id.starts_with(target))
        .map(|c| c.id.clone())
}

fn print_listing(controller: &ChatSessionController, query: Option<&str>) {
    let all = controller.conversations();
    let shown = match query {
        Some(query) => controller.search_conversations(query),
        None => all.clone(),
    };
    if shown.is_empty() {
        println!("{}", "No conversations.".bright_black());
        return;
    }

    let selected = controller.selected_conversation_id();
    for conversation in &shown {
        let index = all
            .iter()
            .position(|c| c.id == conversation.id)
            .map_or(0, |i| i + 1);
        let marker = if selected.as_deref() == Some(conversation.id.as_str()) {
            "*"
        } else {
            " "
        };
        let pin = if conversation.pinned { "📌 " } else { "" };
        println!(
            "{} {:>3}. {}{} {}",
            marker,
            index,
            pin,
            conversation.title.bold(),
            conversation
                .last_modified
                .format("%Y-%m-%d %H:%M")
                .to_string()
                .bright_black()
        );
    }
}

fn print_transcript(controller: &ChatSessionController) {
    let Some(conversation) = controller.snapshot().conversation else {
        return;
    };
    println!("{}", format!("=== {} ===", conversation.title).bright_magenta());
    for message in &conversation.messages {
        match message.sender {
            Sender::User => println!("{}", format!("> {}", message.text).green()),
            Sender::Agent => {
                for line in message.text.lines() {
                    println!("{}", line.bright_blue());
                }
            }
        }
    }
    println!();
}

fn print_help() {
    println!("{}", "Type a message to chat. Commands:".bright_black());
    for (command, description) in [
        ("/new", "start a new conversation with the next message"),
        ("/list", "list conversations"),
        ("/open <n|id>", "open a conversation"),
        ("/delete <n|id>", "delete a conversation"),
        ("/pin [n|id]", "pin or unpin (defaults to the current one)"),
        ("/search <text>", "search titles and messages"),
        ("/web", "toggle web search grounding"),
        ("/title", "regenerate the current title"),
        ("/quit", "exit"),
    ] {
        println!("  {:<16} {}", command.bright_cyan(), description.bright_black());
    }
}

/// Runs one turn, rendering live snapshots until it finishes. Ctrl-C
/// cancels the turn instead of exiting.
async fn run_turn(
    controller: &Arc<ChatSessionController>,
    message: String,
    search_enabled: bool,
) -> Result<()> {
    let mut live = controller.subscribe();
    let mut renderer = StreamRenderer::default();
    renderer.begin_turn(&live.borrow_and_update());

    let new_chat = controller.selected_conversation_id().is_none();
    let mut turn = tokio::spawn({
        let controller = Arc::clone(controller);
        async move {
            if new_chat {
                controller.create_new_chat(&message, search_enabled).await
            } else {
                controller.send_message(&message, search_enabled).await
            }
        }
    });

    let result: ChatResult<TurnOutcome> = loop {
        tokio::select! {
            joined = &mut turn => {
                render(&mut renderer, &live.borrow_and_update());
                break joined.context("Turn task panicked")?;
            }
            changed = live.changed() => {
                if changed.is_ok() {
                    render(&mut renderer, &live.borrow_and_update());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if let Some(id) = controller.selected_conversation_id() {
                    controller.cancel_turn(&id);
                }
                println!();
                println!("{}", "Cancelling...".yellow());
            }
        }
    };
    println!();

    match result {
        Ok(outcome) => {
            match &outcome.status {
                TurnStatus::Completed => {}
                TurnStatus::Failed(err) => {
                    eprintln!("{}", format!("Request failed: {}", err).red());
                }
                TurnStatus::Cancelled => println!("{}", "Cancelled.".yellow()),
                TurnStatus::Discarded => {}
            }
            if let Some(task) = outcome.title_task {
                // Wait so the title shows up in the next listing.
                if let Err(e) = task.await {
                    tracing::warn!("Title task did not finish: {}", e);
                }
            }
        }
        Err(err) => eprintln!("{}", format!("Error: {}", err).red()),
    }
    Ok(())
}

fn render(renderer: &mut StreamRenderer, snapshot: &gemchat_application::LiveSnapshot) {
    if let Some(text) = renderer.next_output(snapshot) {
        print!("{}", text.bright_blue());
        if let Err(e) = std::io::stdout().flush() {
            tracing::debug!("Failed to flush stdout: {}", e);
        }
    }
}

/// The main entry point for the gemchat REPL.
///
/// Loads configuration and the API key, opens the conversation store,
/// and hands every line to the session controller.
#[tokio::main]
async fn main() -> Result<()> {
    // ===== Backend Initialization =====
    let paths = GemchatPaths::default();
    let _log_guard = init_logging(&paths)?;

    let config_service = ConfigService::new(paths.clone());
    let config = config_service
        .get_config()
        .context("Failed to load config.toml")?;
    let api_key = resolve_api_key(&config_service)?;

    let repository = Arc::new(
        AsyncDirConversationRepository::default_location()
            .await
            .context("Failed to open conversation store")?,
    );
    tracing::info!(
        dir = %repository.conversations_dir().display(),
        "Conversation store opened"
    );
    let completion = Arc::new(GeminiStreamClient::from_settings(&config.gemini, api_key));
    let controller = Arc::new(ChatSessionController::new(
        repository,
        completion,
        config.chat.clone(),
    ));

    let loaded = controller
        .load_conversations()
        .await
        .context("Failed to load conversations")?;
    tracing::info!(conversations = loaded.len(), model = %config.gemini.model, "gemchat started");

    // ===== REPL Setup =====
    let mut rl: Editor<CliHelper, DefaultHistory> = Editor::new()?;
    rl.set_helper(Some(CliHelper));

    println!("{}", "=== gemchat ===".bright_magenta().bold());
    println!(
        "{}",
        format!(
            "{} saved conversations. Type /help for commands, /quit to exit.",
            loaded.len()
        )
        .bright_black()
    );
    println!();

    let mut search_enabled = false;

    // ===== Main REPL Loop =====
    loop {
        let prompt = if search_enabled { "web>> " } else { ">> " };
        let line = match rl.readline(prompt) {
            Ok(line) => line,
            Err(rustyline::error::ReadlineError::Interrupted) => {
                println!("{}", "CTRL-C detected. Type /quit to exit.".yellow());
                continue;
            }
            Err(rustyline::error::ReadlineError::Eof) => {
                println!("{}", "CTRL-D detected. Exiting...".bright_green());
                break;
            }
            Err(err) => {
                eprintln!("{}", format!("Error: {:?}", err).red());
                break;
            }
        };

        let Some(command) = commands::parse(&line) else {
            continue;
        };
        let _ = rl.add_history_entry(line.as_str());

        match command {
            Command::Quit => {
                println!("{}", "Goodbye!".bright_green());
                break;
            }
            Command::Message(text) => run_turn(&controller, text, search_enabled).await?,
            Command::New => {
                controller.select_conversation(None).await?;
                println!("{}", "Next message starts a new conversation.".bright_black());
            }
            Command::List => print_listing(&controller, None),
            Command::Search(query) => print_listing(&controller, Some(query.as_str())),
            Command::Open(target) => match resolve_target(&controller, &target) {
                Some(id) => match controller.select_conversation(Some(id.as_str())).await {
                    Ok(_) => print_transcript(&controller),
                    Err(err) => eprintln!("{}", format!("Error: {}", err).red()),
                },
                None => eprintln!("{}", format!("No conversation matches '{}'", target).red()),
            },
            Command::Delete(target) => match resolve_target(&controller, &target) {
                Some(id) => match controller.remove_chat(&id).await {
                    Ok(()) => println!("{}", "Deleted.".bright_black()),
                    Err(err) => eprintln!("{}", format!("Error: {}", err).red()),
                },
                None => eprintln!("{}", format!("No conversation matches '{}'", target).red()),
            },
            Command::Pin(target) => {
                let id = if target.is_empty() {
                    controller.selected_conversation_id()
                } else {
                    resolve_target(&controller, &target)
                };
                match id {
                    Some(id) => match controller.toggle_pin(&id).await {
                        Ok(true) => println!("{}", "Pinned.".bright_black()),
                        Ok(false) => println!("{}", "Unpinned.".bright_black()),
                        Err(err) => eprintln!("{}", format!("Error: {}", err).red()),
                    },
                    None => eprintln!("{}", "No conversation selected.".red()),
                }
            }
            Command::ToggleWeb => {
                search_enabled = !search_enabled;
                let state = if search_enabled { "on" } else { "off" };
                println!("{}", format!("Web search {}.", state).bright_black());
            }
            Command::Title => match controller.selected_conversation_id() {
                Some(id) => match controller.refresh_title(&id).await {
                    Ok(title) => println!("{}", format!("Title: {}", title).bright_magenta()),
                    Err(err) => eprintln!("{}", format!("Error: {}", err).red()),
                },
                None => eprintln!("{}", "No conversation selected.".red()),
            },
            Command::Help => print_help(),
            Command::Unknown(input) => {
                println!("{}", format!("Unknown command: {}", input).bright_black());
            }
        }
    }

    Ok(())
}
