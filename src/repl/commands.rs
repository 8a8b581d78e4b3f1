//! Slash command handlers for the REPL
//!
//! Handles /help, /status, /sessions, /new, /session, /history, /clear,
//! /stream, and friends.

use anyhow::Result;
use std::time::Duration;

use super::{Repl, colors};

impl Repl {
    /// Handle a slash command. Returns false when the REPL should exit.
    pub(super) async fn handle_command(&mut self, cmd: &str) -> Result<bool> {
        let parts: Vec<&str> = cmd.splitn(2, ' ').collect();
        let command = parts[0];
        let arg = parts.get(1).map(|s| s.trim()).unwrap_or("");

        match command {
            "/version" => {
                println!("gemchat v{}", env!("CARGO_PKG_VERSION"));
                println!("  Backend: {}", self.client.base_url());
            }
            "/uptime" => {
                println!("Uptime: {}", format_duration(self.start_time.elapsed()));
            }
            "/help" => {
                println!("Commands:");
                println!("  /help              - Show this help");
                println!("  /version           - Show version info");
                println!("  /uptime            - Show client uptime");
                println!("  /status            - Show connection and session state");
                println!("  /sessions          - List known sessions");
                println!("  /new               - Start a fresh session");
                println!("  /session <id>      - Switch to a session");
                println!("  /history           - Reprint the transcript");
                println!("  /clear             - Delete this session's history");
                println!("  /stream [on|off]   - Toggle streamed replies");
                println!("  /quit              - Exit");
            }
            "/status" => {
                self.cmd_status();
            }
            "/sessions" => {
                self.cmd_sessions().await;
            }
            "/new" => {
                let id = self.state.new_session();
                println!("Started session {}", colors::success(&id));
                self.on_session_change().await;
            }
            "/session" => {
                if arg.is_empty() {
                    println!("Usage: /session <id> (see /sessions)");
                } else {
                    self.state.select_session(arg);
                    println!("Switched to session {}", colors::success(arg));
                    self.on_session_change().await;
                }
            }
            "/history" => {
                self.print_transcript();
            }
            "/clear" => {
                self.cmd_clear().await;
            }
            "/stream" => match arg {
                "on" => {
                    self.streaming = true;
                    println!("Streamed replies enabled.");
                }
                "off" => {
                    self.streaming = false;
                    println!("Streamed replies disabled (buffered sends).");
                }
                "" => {
                    println!(
                        "Streaming is {}. Use /stream on|off to change.",
                        if self.streaming { "on" } else { "off" }
                    );
                }
                _ => println!("Usage: /stream on|off"),
            },
            "/quit" | "/exit" => {
                return Ok(false);
            }
            _ => {
                println!("Unknown command: {}. Try /help", command);
            }
        }
        Ok(true)
    }

    /// /status - Show connection and session state
    fn cmd_status(&self) {
        println!(
            "Backend: {} ({})",
            self.client.base_url(),
            if self.state.connected() {
                colors::success("connected")
            } else {
                colors::error("not connected")
            }
        );
        println!("Session: {}", self.state.session_id());
        println!("Messages: {}", self.state.messages().len());
        println!("Streaming: {}", if self.streaming { "on" } else { "off" });
    }

    /// /sessions - Fetch and list known sessions
    async fn cmd_sessions(&mut self) {
        match self.client.sessions().await {
            Ok(sessions) => self.state.set_sessions(sessions),
            Err(e) => {
                // Non-fatal: keep showing the last known list.
                tracing::warn!("session list fetch failed: {}", e);
                println!(
                    "{}",
                    colors::warning("Could not refresh sessions; showing last known list.")
                );
            }
        }

        if self.state.sessions().is_empty() {
            println!("No known sessions yet.");
            return;
        }

        println!("Sessions:");
        for session in self.state.sessions() {
            let marker = if session.id == self.state.session_id() {
                "*"
            } else {
                " "
            };
            match &session.created_at {
                Some(created) => println!("  {} {}  {}", marker, session.id, colors::status(created)),
                None => println!("  {} {}", marker, session.id),
            }
        }
    }

    /// /clear - Delete this session's backend history
    async fn cmd_clear(&mut self) {
        match self.client.clear_history(self.state.session_id()).await {
            Ok(()) => {
                self.state.clear_messages();
                println!("{}", colors::success("History cleared."));
            }
            Err(e) => {
                tracing::warn!("history clear failed: {}", e);
                println!(
                    "{}",
                    colors::error("Failed to clear history; transcript left unchanged.")
                );
            }
        }
    }
}

/// Format a duration in human-readable form
fn format_duration(d: Duration) -> String {
    let mut secs = d.as_secs();

    let hours = secs / 3_600;
    secs %= 3_600;
    let mins = secs / 60;
    secs %= 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}
