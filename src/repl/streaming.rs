//! Stream consumption for the REPL
//!
//! Drains decoded stream events into the view-model, printing reply text
//! incrementally as it arrives.

use anyhow::Result;
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

use crate::client::StreamEvent;
use crate::state::{ChatState, StreamStep};

use super::colors;

/// How a streamed turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The backend finished the reply normally.
    Finished,
    /// An error event or transport drop ended the turn; the view-model
    /// already holds the error bubble.
    Failed,
    /// The user hit Ctrl+C; display stopped, state keeps what arrived.
    Cancelled,
}

/// Process a stream of events, applying each to the placeholder and printing
/// text deltas immediately.
pub async fn consume(
    rx: &mut mpsc::Receiver<StreamEvent>,
    state: &mut ChatState,
    placeholder_id: &str,
    cancelled: &Arc<AtomicBool>,
) -> Result<StreamOutcome> {
    let mut printed_any = false;

    loop {
        // Check for cancellation
        if cancelled.load(Ordering::SeqCst) {
            if printed_any {
                println!();
            }
            println!("  {}", colors::status("[cancelled]"));
            return Ok(StreamOutcome::Cancelled);
        }

        // Use select! to allow cancellation checks even if recv blocks
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(event) => {
                        if let StreamEvent::Delta(ref chunk) = event {
                            print!("{}", chunk);
                            io::stdout().flush()?;
                            printed_any = true;
                        }

                        let failed = matches!(
                            event,
                            StreamEvent::ServerError(_) | StreamEvent::TransportError(_)
                        );
                        if state.apply_stream_event(placeholder_id, &event) == StreamStep::Stop {
                            if printed_any {
                                println!();
                            }
                            return Ok(if failed {
                                StreamOutcome::Failed
                            } else {
                                StreamOutcome::Finished
                            });
                        }
                    }
                    None => {
                        // Sender gone without a terminal event; treat as done.
                        if printed_any {
                            println!();
                        }
                        return Ok(StreamOutcome::Finished);
                    }
                }
            }
            // Small timeout to allow cancellation checks
            _ = tokio::time::sleep(tokio::time::Duration::from_millis(50)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DEFAULT_SESSION;

    fn streaming_state() -> (ChatState, String) {
        let mut state = ChatState::new(DEFAULT_SESSION.to_string());
        state.set_connected(true);
        state.begin_send("hi?").unwrap();
        let placeholder = state.begin_stream_reply();
        (state, placeholder)
    }

    #[tokio::test]
    async fn consume_accumulates_deltas_until_done() {
        let (mut state, placeholder) = streaming_state();
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(StreamEvent::Delta("H".into())).await.unwrap();
        tx.send(StreamEvent::Delta("i".into())).await.unwrap();
        tx.send(StreamEvent::Done).await.unwrap();

        let cancelled = Arc::new(AtomicBool::new(false));
        let outcome = consume(&mut rx, &mut state, &placeholder, &cancelled)
            .await
            .unwrap();

        assert_eq!(outcome, StreamOutcome::Finished);
        assert_eq!(state.messages()[1].text, "Hi");
    }

    #[tokio::test]
    async fn consume_stops_on_server_error() {
        let (mut state, placeholder) = streaming_state();
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(StreamEvent::Delta("par".into())).await.unwrap();
        tx.send(StreamEvent::ServerError("boom".into()))
            .await
            .unwrap();
        // Anything after the error must never be consumed.
        tx.send(StreamEvent::Delta("tial".into())).await.unwrap();

        let cancelled = Arc::new(AtomicBool::new(false));
        let outcome = consume(&mut rx, &mut state, &placeholder, &cancelled)
            .await
            .unwrap();

        assert_eq!(outcome, StreamOutcome::Failed);
        assert!(state.messages()[1].is_error);
        assert!(state.messages()[1].text.contains("boom"));
    }

    #[tokio::test]
    async fn consume_treats_closed_channel_as_finished() {
        let (mut state, placeholder) = streaming_state();
        let (tx, mut rx) = mpsc::channel::<StreamEvent>(8);
        drop(tx);

        let cancelled = Arc::new(AtomicBool::new(false));
        let outcome = consume(&mut rx, &mut state, &placeholder, &cancelled)
            .await
            .unwrap();
        assert_eq!(outcome, StreamOutcome::Finished);
    }

    #[tokio::test]
    async fn consume_respects_cancellation() {
        let (mut state, placeholder) = streaming_state();
        let (_tx, mut rx) = mpsc::channel::<StreamEvent>(8);

        let cancelled = Arc::new(AtomicBool::new(true));
        let outcome = consume(&mut rx, &mut state, &placeholder, &cancelled)
            .await
            .unwrap();
        assert_eq!(outcome, StreamOutcome::Cancelled);
    }
}
