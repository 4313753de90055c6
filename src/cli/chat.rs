use std::sync::Arc;

use anyhow::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::chat::render::{Block, Control, Navigator, Page, controls, render_turn, to_terminal};
use crate::chat::{ChatWidget, ConversationLog, HttpChatApi, Role, TurnId, TurnOutcome};
use crate::core::AppConfig;

const HELP: &str = "\
Commands:
  /open       open the chat (retries the session if it failed)
  /close      close the chat
  /follow N   follow link N from the last reply
  /history    print the conversation so far
  /help       show this message
  /quit       exit
Anything else is sent as a message. Ctrl-C stops a streaming reply.";

#[derive(Debug, PartialEq)]
enum Input<'a> {
    Open,
    Close,
    Follow(Option<usize>),
    History,
    Help,
    Quit,
    Message(&'a str),
    Unknown(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    let Some(command) = line.strip_prefix('/') else {
        return Input::Message(line);
    };
    let mut parts = command.split_whitespace();
    match parts.next().unwrap_or_default() {
        "open" => Input::Open,
        "close" => Input::Close,
        "follow" => Input::Follow(parts.next().and_then(|n| n.parse().ok())),
        "history" => Input::History,
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        _ => Input::Unknown(line),
    }
}

/// The terminal has no page to move around in so it only reports
/// where a control leads.
struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn open_external(&mut self, url: &str) {
        println!("Opening {} in a new window", url);
    }

    fn navigate_to(&mut self, page: Page) {
        println!("Going to the {} page", page);
    }

    fn scroll_to(&mut self, _id: &str) -> bool {
        false
    }

    fn navigate_raw(&mut self, href: &str) {
        println!("Going to {}", href);
    }
}

/// Works out what to print for each new snapshot of the reply being
/// streamed. The turn is rendered in full every time; when the last
/// render is a prefix of the new one only the rest is printed,
/// otherwise the reply is redrawn.
#[derive(Default)]
struct StreamPrinter {
    turn: Option<TurnId>,
    shown: String,
    thinking: bool,
}

impl StreamPrinter {
    fn update(&mut self, log: &ConversationLog) -> Option<String> {
        let turn = match &self.turn {
            Some(id) => log.get(id)?,
            None => {
                let turn = log.streaming_turn()?;
                self.turn = Some(turn.id.clone());
                turn
            }
        };

        let blocks = render_turn(turn);
        if blocks == [Block::Thinking] {
            if self.thinking {
                return None;
            }
            self.thinking = true;
            return Some(to_terminal(&blocks));
        }

        let rendered = to_terminal(&blocks);
        let mut out = String::new();
        if self.thinking {
            // Clear the placeholder line
            out.push_str("\r\x1b[2K");
            self.thinking = false;
        }
        match rendered.strip_prefix(self.shown.as_str()) {
            Some(rest) => out.push_str(rest),
            None => {
                out.push_str(&erase_lines(&self.shown));
                out.push_str(&rendered);
            }
        }
        self.shown = rendered;

        if out.is_empty() { None } else { Some(out) }
    }
}

/// Moves the cursor back to the start of `shown` and clears the
/// screen from there.
fn erase_lines(shown: &str) -> String {
    match shown.matches('\n').count() {
        0 => "\r\x1b[0J".to_string(),
        n => format!("\x1b[{}F\x1b[0J", n),
    }
}

fn print_flush(text: &str) {
    use std::io::Write;
    print!("{}", text);
    let _ = std::io::stdout().flush();
}

/// Submits `text` and prints the reply as it streams, until the turn
/// is sealed or `cancel` resolves. Returns the controls found in the
/// reply.
async fn stream_reply<F>(widget: &ChatWidget, text: &str, cancel: F) -> Vec<Control>
where
    F: Future<Output = ()>,
{
    let store = widget.store();
    let mut rx = store.subscribe();
    rx.borrow_and_update();
    let mut printer = StreamPrinter::default();

    let finished = {
        let submit = widget.submit(text);
        tokio::pin!(submit, cancel);
        loop {
            tokio::select! {
                result = &mut submit => break Some(result),
                changed = rx.changed() => {
                    if changed.is_ok() {
                        if let Some(out) = printer.update(&rx.borrow_and_update()) {
                            print_flush(&out);
                        }
                    }
                }
                _ = &mut cancel => break None,
            }
        }
    };

    // Catch up on anything published after the last wake up
    if let Some(out) = printer.update(&store.snapshot()) {
        print_flush(&out);
    }
    println!();

    let turn = match finished {
        Some(Ok((turn, outcome))) => {
            if outcome == TurnOutcome::PrematureClose {
                println!("(the reply may be incomplete)");
            }
            turn
        }
        Some(Err(e)) => {
            println!("{}", e);
            return Vec::new();
        }
        None => match widget.abandon_streaming() {
            Some(turn) => {
                println!("(stopped)");
                turn
            }
            None => return Vec::new(),
        },
    };

    let log = store.snapshot();
    let Some(turn) = log.get(&turn) else {
        return Vec::new();
    };
    let found = controls(&render_turn(turn));
    if !found.is_empty() {
        println!("(/follow N opens link [N])");
    }
    found
}

fn print_history(log: &ConversationLog) {
    for turn in log.iter() {
        let who = match turn.role {
            Role::User => "you",
            Role::Bot => "bot",
        };
        println!("{} [{}]:", who, turn.created_at.format("%H:%M:%S"));
        println!("{}\n", to_terminal(&render_turn(turn)));
    }
}

pub async fn run(api_url: Option<String>) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=warn", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = AppConfig::default();
    let api_url = api_url.unwrap_or(config.chat_api_url);
    let api = Arc::new(HttpChatApi::new(&api_url));
    let mut widget = ChatWidget::new(api, &config.greeting);

    let mut rl = DefaultEditor::new()?;

    if let Some(greeting) = widget.store().snapshot().last() {
        println!("{}\n", to_terminal(&render_turn(greeting)));
    }
    if !widget.open().await {
        println!("The assistant is unavailable right now. Type /open to try again.");
    }

    let mut last_controls: Vec<Control> = Vec::new();

    loop {
        let prompt = if widget.is_open() { ">>> " } else { "(closed) " };
        let line = match rl.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => break,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(line.as_str());

        match parse_input(&line) {
            Input::Open => {
                if widget.open().await {
                    println!("Chat is open.");
                } else {
                    println!("Still unable to reach the assistant.");
                }
            }
            Input::Close => {
                widget.close();
                println!("Chat closed. Type /open to continue.");
            }
            Input::Follow(Some(n)) if n > 0 && n <= last_controls.len() => {
                last_controls[n - 1].activate(&mut TerminalNavigator);
            }
            Input::Follow(_) if last_controls.is_empty() => {
                println!("The last reply has no links");
            }
            Input::Follow(_) => {
                println!("Pick a link between 1 and {}", last_controls.len());
            }
            Input::History => print_history(&widget.store().snapshot()),
            Input::Help => println!("{}", HELP),
            Input::Quit => break,
            Input::Unknown(command) => println!("Unknown command {}. Try /help", command),
            Input::Message(text) => {
                if !widget.can_submit() {
                    println!("Chat is not ready. Type /open first.");
                    continue;
                }
                let ctrl_c = async {
                    let _ = tokio::signal::ctrl_c().await;
                };
                last_controls = stream_reply(&widget, text, ctrl_c).await;
            }
        }
    }

    Ok(())
}
