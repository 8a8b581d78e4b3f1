//! Interactive REPL for gemchat
//!
//! Readline-driven front end over the conversation view-model:
//! - Command history and slash-command completion
//! - Buffered or streamed sends against the chat backend
//! - Explicit on-session-change handling (probe, history, session list)

pub mod colors;
mod commands;
mod helper;
mod streaming;

use anyhow::Result;
use rustyline::Editor;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::client::ApiClient;
use crate::state::{ChatState, Message, Sender, display_time};

use helper::ChatHelper;
use streaming::StreamOutcome;

/// REPL state
pub struct Repl {
    /// Readline editor with history and completion
    editor: Editor<ChatHelper, DefaultHistory>,
    /// Backend client
    client: ApiClient,
    /// Conversation view-model
    state: ChatState,
    /// Whether replies stream in incrementally
    streaming: bool,
    /// History file path
    history_path: PathBuf,
    /// Cancellation flag for Ctrl+C during streaming
    cancelled: Arc<AtomicBool>,
    /// When this client started (used for /uptime)
    start_time: Instant,
}

impl Repl {
    pub fn new(client: ApiClient, session_id: String, streaming: bool) -> Result<Self> {
        let mut editor = Editor::new()?;
        editor.set_helper(Some(ChatHelper::new()));

        // History file in ~/.gemchat/history
        let history_path = dirs::home_dir()
            .unwrap_or_default()
            .join(".gemchat")
            .join("history");

        Ok(Self {
            editor,
            client,
            state: ChatState::new(session_id),
            streaming,
            history_path,
            cancelled: Arc::new(AtomicBool::new(false)),
            start_time: Instant::now(),
        })
    }

    /// Load command history
    fn load_history(&mut self) {
        if self.history_path.exists() {
            let _ = self.editor.load_history(&self.history_path);
        }
    }

    /// Save command history
    fn save_history(&mut self) {
        if let Some(parent) = self.history_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = self.editor.save_history(&self.history_path);
    }

    /// Run the REPL loop
    pub async fn run(&mut self) -> Result<()> {
        self.load_history();

        // Set up Ctrl+C handler for cancelling in-flight streams
        let cancelled = Arc::clone(&self.cancelled);
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancelled.store(true, Ordering::SeqCst);
                }
            }
        });

        self.on_session_change().await;

        println!("Type your message (Ctrl+D to exit, /help for commands)");
        println!();

        loop {
            let line = match self.editor.readline(">>> ") {
                Ok(line) => line,
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => break,
                Err(err) => {
                    eprintln!("Error: {:?}", err);
                    break;
                }
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            self.editor.add_history_entry(&line)?;

            // Handle slash commands
            if trimmed.starts_with('/') {
                if !self.handle_command(trimmed).await? {
                    break;
                }
                continue;
            }

            // Reset cancellation flag before processing
            self.cancelled.store(false, Ordering::SeqCst);

            self.process_send(trimmed).await?;
        }

        println!("Goodbye!");
        self.save_history();
        Ok(())
    }

    /// Effects keyed off the active session id, run in order so input is
    /// only handled again once the new session's state is in place:
    /// connectivity probe, history load, session list load.
    pub(crate) async fn on_session_change(&mut self) {
        let connected = self.client.probe().await;
        self.state.set_connected(connected);
        if !connected {
            println!(
                "{}",
                colors::error("Backend unreachable; sending is disabled.")
            );
        }

        match self.client.history(self.state.session_id()).await {
            Ok(turns) => {
                self.state.replace_history(&turns);
                if !self.state.messages().is_empty() {
                    println!(
                        "{}",
                        colors::status(&format!(
                            "Restored {} messages.",
                            self.state.messages().len()
                        ))
                    );
                    self.print_transcript();
                }
            }
            Err(e) => {
                // Non-fatal: start with an empty transcript.
                tracing::warn!("history load failed: {}", e);
                self.state.replace_history(&[]);
            }
        }

        match self.client.sessions().await {
            Ok(sessions) => self.state.set_sessions(sessions),
            Err(e) => {
                // Non-fatal: prior list stays.
                tracing::warn!("session list load failed: {}", e);
            }
        }
    }

    /// Send one message, streamed or buffered per the active capability.
    async fn process_send(&mut self, input: &str) -> Result<()> {
        if !self.state.connected() {
            println!(
                "{}",
                colors::warning("Not connected; message not sent. Try /new to reconnect.")
            );
            return Ok(());
        }
        if self.state.begin_send(input).is_none() {
            return Ok(());
        }

        let result = if self.streaming {
            self.send_streaming(input).await
        } else {
            self.send_buffered(input).await
        };

        // Runs regardless of outcome.
        self.state.finish_send();
        result
    }

    /// Buffered send: whole reply in one response.
    async fn send_buffered(&mut self, input: &str) -> Result<()> {
        match self.client.send(input, self.state.session_id()).await {
            Ok(reply) => {
                let timestamp = display_time(&reply.timestamp);
                self.state.push_bot_reply(&reply.response, timestamp);
            }
            Err(e) => {
                tracing::warn!("send failed: {}", e);
                self.state.push_error_bubble();
            }
        }
        if let Some(msg) = self.state.messages().last() {
            print_message(msg);
        }
        Ok(())
    }

    /// Streamed send: placeholder first, then incremental decode.
    async fn send_streaming(&mut self, input: &str) -> Result<()> {
        let placeholder = self.state.begin_stream_reply();

        let mut rx = match self.client.send_stream(input, self.state.session_id()).await {
            Ok(rx) => rx,
            Err(e) => {
                // The empty placeholder stays; the failure gets its own bubble.
                tracing::warn!("stream open failed: {}", e);
                self.state.push_error_bubble();
                if let Some(msg) = self.state.messages().last() {
                    print_message(msg);
                }
                return Ok(());
            }
        };

        let header = self
            .state
            .messages()
            .last()
            .map(|m| format!("{} {} ", colors::timestamp(&m.timestamp), colors::bot_label()))
            .unwrap_or_default();
        print!("{}", header);
        io::stdout().flush()?;

        let outcome =
            streaming::consume(&mut rx, &mut self.state, &placeholder, &self.cancelled).await?;

        if outcome == StreamOutcome::Failed {
            if let Some(msg) = self.state.messages().last() {
                if msg.is_error {
                    print_message(msg);
                }
            }
        }
        Ok(())
    }

    /// Reprint the whole transcript.
    pub(crate) fn print_transcript(&self) {
        if self.state.messages().is_empty() {
            println!("(no messages)");
            return;
        }
        for msg in self.state.messages() {
            print_message(msg);
        }
    }
}

/// Render one message bubble to the terminal.
fn print_message(msg: &Message) {
    let label = match msg.sender {
        Sender::User => colors::user_label(),
        Sender::Bot => colors::bot_label(),
    };
    if msg.is_error {
        println!(
            "{} {} {}",
            colors::timestamp(&msg.timestamp),
            label,
            colors::error(&msg.text)
        );
    } else {
        println!("{} {} {}", colors::timestamp(&msg.timestamp), label, msg.text);
    }
}

/// Entry point for the REPL
pub async fn run(client: ApiClient, session_id: String, streaming: bool) -> Result<()> {
    let mut repl = Repl::new(client, session_id, streaming)?;
    repl.run().await
}
