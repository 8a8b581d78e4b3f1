//! Conversation view-model
//!
//! All client-visible chat state and its transitions live here, synchronous
//! and free of I/O, so the REPL stays a thin rendering shell and every
//! transition is unit-testable without a backend.

use chrono::{Local, NaiveDateTime, Utc};

use crate::client::{HistoryTurn, StreamEvent};

/// Session id used when none is configured.
pub const DEFAULT_SESSION: &str = "default";

/// Apology shown in place of a reply when a send fails outright.
pub const SEND_FAILURE_TEXT: &str = "Sorry, something went wrong. Please try again.";

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Bot,
}

/// One bubble in the conversation.
///
/// `text` is mutable only while this is the in-flight streaming placeholder;
/// messages are never removed individually, only bulk-cleared.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub text: String,
    pub sender: Sender,
    pub timestamp: String,
    pub is_error: bool,
}

/// A known session as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: String,
    pub created_at: Option<String>,
}

/// What the stream consumer should do after applying an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStep {
    Continue,
    Stop,
}

/// Aggregate client state: ordered transcript, active session, connection
/// status, the single in-flight send guard, and the known session list.
pub struct ChatState {
    messages: Vec<Message>,
    session_id: String,
    connected: bool,
    in_flight: bool,
    sessions: Vec<SessionInfo>,
    /// Last id stamp handed out, so ids stay unique within one run even when
    /// two messages land in the same millisecond.
    last_stamp: i64,
}

impl ChatState {
    pub fn new(session_id: String) -> Self {
        Self {
            messages: Vec::new(),
            session_id,
            connected: false,
            in_flight: false,
            sessions: Vec::new(),
            last_stamp: 0,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn sessions(&self) -> &[SessionInfo] {
        &self.sessions
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Replace the known session list with freshly fetched data. Callers skip
    /// this on fetch failure, leaving the prior list visible.
    pub fn set_sessions(&mut self, sessions: Vec<SessionInfo>) {
        self.sessions = sessions;
    }

    /// Whether a send of `input` would be accepted right now.
    pub fn can_send(&self, input: &str) -> bool {
        !input.trim().is_empty() && !self.in_flight && self.connected
    }

    /// Optimistically append the user's message and raise the in-flight
    /// guard. Returns the new message id, or `None` when the send is refused
    /// (blank input, a send already pending, or no backend connection).
    pub fn begin_send(&mut self, input: &str) -> Option<String> {
        if !self.can_send(input) {
            return None;
        }
        let id = format!("user-{}", self.next_stamp());
        self.messages.push(Message {
            id: id.clone(),
            text: input.to_string(),
            sender: Sender::User,
            timestamp: now_display(),
            is_error: false,
        });
        self.in_flight = true;
        Some(id)
    }

    /// Append the bot's buffered reply.
    pub fn push_bot_reply(&mut self, text: &str, timestamp: String) {
        let id = format!("bot-{}", self.next_stamp());
        self.messages.push(Message {
            id,
            text: text.to_string(),
            sender: Sender::Bot,
            timestamp,
            is_error: false,
        });
    }

    /// Append the synthetic error bubble used when a send fails outright.
    pub fn push_error_bubble(&mut self) {
        let id = format!("error-{}", self.next_stamp());
        self.messages.push(Message {
            id,
            text: SEND_FAILURE_TEXT.to_string(),
            sender: Sender::Bot,
            timestamp: now_display(),
            is_error: true,
        });
    }

    /// Append the empty bot placeholder a streamed reply accumulates into.
    /// Returns its id.
    pub fn begin_stream_reply(&mut self) -> String {
        let id = format!("bot-{}", self.next_stamp());
        self.messages.push(Message {
            id: id.clone(),
            text: String::new(),
            sender: Sender::Bot,
            timestamp: now_display(),
            is_error: false,
        });
        id
    }

    /// Apply one decoded stream event against the placeholder.
    ///
    /// Edits are id-matched: events arriving after the placeholder is gone
    /// (cleared history, switched session) silently no-op rather than
    /// touching any other message.
    pub fn apply_stream_event(&mut self, placeholder_id: &str, event: &StreamEvent) -> StreamStep {
        match event {
            StreamEvent::Delta(chunk) => {
                if let Some(msg) = self.find_mut(placeholder_id) {
                    msg.text.push_str(chunk);
                }
                StreamStep::Continue
            }
            StreamEvent::Done => StreamStep::Stop,
            StreamEvent::ServerError(error) => {
                if let Some(msg) = self.find_mut(placeholder_id) {
                    msg.text = format!("Sorry, an error occurred: {}", error);
                    msg.is_error = true;
                }
                StreamStep::Stop
            }
            StreamEvent::TransportError(error) => {
                // The partial placeholder stays as-is; the failure gets its
                // own bubble.
                tracing::warn!("stream transport failure: {}", error);
                self.push_error_bubble();
                StreamStep::Stop
            }
        }
    }

    /// Lower the in-flight guard. Runs on every send outcome.
    pub fn finish_send(&mut self) {
        self.in_flight = false;
    }

    /// Replace the transcript with fetched history. Each stored turn expands
    /// into a user message then a bot message sharing a timestamp-derived id
    /// pair, preserving conversation order.
    pub fn replace_history(&mut self, turns: &[HistoryTurn]) {
        self.messages = turns
            .iter()
            .flat_map(|turn| {
                [
                    Message {
                        id: format!("user-{}", turn.timestamp),
                        text: turn.user.clone(),
                        sender: Sender::User,
                        timestamp: turn.timestamp.clone(),
                        is_error: false,
                    },
                    Message {
                        id: format!("bot-{}", turn.timestamp),
                        text: turn.bot.clone(),
                        sender: Sender::Bot,
                        timestamp: turn.timestamp.clone(),
                        is_error: false,
                    },
                ]
            })
            .collect();
    }

    /// Empty the transcript. Only called after the backend confirmed the
    /// delete; on failure the caller leaves state untouched.
    pub fn clear_messages(&mut self) {
        self.messages.clear();
    }

    /// Start a fresh client-side session: new time-based id, empty
    /// transcript. Returns the new id.
    pub fn new_session(&mut self) -> String {
        let id = loop {
            let candidate = format!("session-{}", self.next_stamp());
            if candidate != self.session_id {
                break candidate;
            }
        };
        self.session_id = id.clone();
        self.messages.clear();
        id
    }

    /// Switch to a known session. The session set itself is untouched; the
    /// transcript empties and is refilled by the follow-up history fetch.
    pub fn select_session(&mut self, id: &str) {
        self.session_id = id.to_string();
        self.messages.clear();
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    fn next_stamp(&mut self) -> i64 {
        let now = Utc::now().timestamp_millis();
        self.last_stamp = if now > self.last_stamp {
            now
        } else {
            self.last_stamp + 1
        };
        self.last_stamp
    }
}

/// Current wall-clock time as a display string.
pub fn now_display() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

/// Render a backend timestamp for display. The backend sends ISO-8601
/// datetimes without a zone; anything unparseable passes through unchanged.
pub fn display_time(raw: &str) -> String {
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return dt.format("%H:%M:%S").to_string();
        }
    }
    raw.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected_state() -> ChatState {
        let mut state = ChatState::new(DEFAULT_SESSION.to_string());
        state.set_connected(true);
        state
    }

    #[test]
    fn buffered_send_appends_user_then_bot() {
        let mut state = connected_state();

        let user_id = state.begin_send("hello").expect("send accepted");
        assert_eq!(state.messages().len(), 1);
        assert!(state.in_flight());

        state.push_bot_reply("hi there", "10:00:00".into());
        state.finish_send();

        assert_eq!(state.messages().len(), 2);
        assert_eq!(state.messages()[0].id, user_id);
        assert_eq!(state.messages()[0].sender, Sender::User);
        assert_eq!(state.messages()[1].sender, Sender::Bot);
        assert!(!state.in_flight());
    }

    #[test]
    fn failed_send_appends_error_bubble() {
        let mut state = connected_state();

        state.begin_send("hello").unwrap();
        state.push_error_bubble();
        state.finish_send();

        assert_eq!(state.messages().len(), 2);
        let bubble = &state.messages()[1];
        assert!(bubble.is_error);
        assert_eq!(bubble.text, SEND_FAILURE_TEXT);
        assert_eq!(bubble.sender, Sender::Bot);
    }

    #[test]
    fn send_refused_for_blank_input() {
        let mut state = connected_state();
        assert!(state.begin_send("").is_none());
        assert!(state.begin_send("   \t ").is_none());
        assert!(state.messages().is_empty());
        assert!(!state.in_flight());
    }

    #[test]
    fn send_refused_while_in_flight() {
        let mut state = connected_state();
        state.begin_send("first").unwrap();
        assert!(state.begin_send("second").is_none());
        assert_eq!(state.messages().len(), 1);
    }

    #[test]
    fn send_refused_when_disconnected() {
        let mut state = ChatState::new(DEFAULT_SESSION.to_string());
        state.set_connected(false);
        assert!(!state.can_send("hello"));
        assert!(state.begin_send("hello").is_none());
    }

    #[test]
    fn stream_deltas_accumulate_into_placeholder_only() {
        let mut state = connected_state();
        state.begin_send("hi?").unwrap();
        let placeholder = state.begin_stream_reply();

        let step = state.apply_stream_event(&placeholder, &StreamEvent::Delta("H".into()));
        assert_eq!(step, StreamStep::Continue);
        state.apply_stream_event(&placeholder, &StreamEvent::Delta("i".into()));

        assert_eq!(state.messages().len(), 2);
        assert_eq!(state.messages()[1].text, "Hi");
        // The user's message is untouched.
        assert_eq!(state.messages()[0].text, "hi?");
    }

    #[test]
    fn stream_error_event_marks_placeholder_and_stops() {
        let mut state = connected_state();
        state.begin_send("hi?").unwrap();
        let placeholder = state.begin_stream_reply();
        state.apply_stream_event(&placeholder, &StreamEvent::Delta("par".into()));

        let step =
            state.apply_stream_event(&placeholder, &StreamEvent::ServerError("boom".into()));
        assert_eq!(step, StreamStep::Stop);

        let bubble = &state.messages()[1];
        assert!(bubble.is_error);
        assert!(bubble.text.contains("boom"));
        assert_eq!(state.messages().len(), 2);
    }

    #[test]
    fn stream_end_stops_without_touching_messages() {
        let mut state = connected_state();
        state.begin_send("hi?").unwrap();
        let placeholder = state.begin_stream_reply();
        state.apply_stream_event(&placeholder, &StreamEvent::Delta("ok".into()));

        let step = state.apply_stream_event(&placeholder, &StreamEvent::Done);
        assert_eq!(step, StreamStep::Stop);
        assert_eq!(state.messages()[1].text, "ok");
        assert!(!state.messages()[1].is_error);
    }

    #[test]
    fn stream_transport_failure_keeps_partial_and_adds_bubble() {
        let mut state = connected_state();
        state.begin_send("hi?").unwrap();
        let placeholder = state.begin_stream_reply();
        state.apply_stream_event(&placeholder, &StreamEvent::Delta("part".into()));

        let step = state.apply_stream_event(
            &placeholder,
            &StreamEvent::TransportError("connection reset".into()),
        );
        assert_eq!(step, StreamStep::Stop);

        assert_eq!(state.messages().len(), 3);
        assert_eq!(state.messages()[1].text, "part");
        assert!(!state.messages()[1].is_error);
        assert!(state.messages()[2].is_error);
    }

    #[test]
    fn stale_stream_events_are_ignored() {
        let mut state = connected_state();
        state.begin_send("hi?").unwrap();
        let placeholder = state.begin_stream_reply();

        // Session switch drops the transcript; late events must no-op.
        state.select_session("other");
        state.apply_stream_event(&placeholder, &StreamEvent::Delta("late".into()));
        state.apply_stream_event(&placeholder, &StreamEvent::ServerError("late".into()));

        assert!(state.messages().is_empty());
    }

    #[test]
    fn history_turn_expands_into_user_then_bot() {
        let mut state = connected_state();
        state.replace_history(&[HistoryTurn {
            user: "hi".into(),
            bot: "hello".into(),
            timestamp: "10:00".into(),
        }]);

        assert_eq!(state.messages().len(), 2);
        assert_eq!(state.messages()[0].sender, Sender::User);
        assert_eq!(state.messages()[0].text, "hi");
        assert_eq!(state.messages()[1].sender, Sender::Bot);
        assert_eq!(state.messages()[1].text, "hello");
        assert_eq!(state.messages()[0].timestamp, "10:00");
        assert_eq!(state.messages()[1].timestamp, "10:00");
        assert_ne!(state.messages()[0].id, state.messages()[1].id);
    }

    #[test]
    fn replace_history_drops_prior_transcript() {
        let mut state = connected_state();
        state.begin_send("old").unwrap();
        state.finish_send();

        state.replace_history(&[]);
        assert!(state.messages().is_empty());
    }

    #[test]
    fn clear_empties_transcript() {
        let mut state = connected_state();
        state.begin_send("hello").unwrap();
        state.push_bot_reply("hi", "10:00".into());
        state.finish_send();

        state.clear_messages();
        assert!(state.messages().is_empty());
    }

    #[test]
    fn new_session_gets_fresh_id_and_empty_transcript() {
        let mut state = connected_state();
        state.begin_send("hello").unwrap();
        state.finish_send();

        let before = state.session_id().to_string();
        let first = state.new_session();
        assert_ne!(first, before);
        assert_eq!(state.session_id(), first);
        assert!(state.messages().is_empty());

        // Back-to-back within the same millisecond still differs.
        let second = state.new_session();
        assert_ne!(second, first);
    }

    #[test]
    fn select_session_sets_id_without_mutating_session_set() {
        let mut state = connected_state();
        let sessions = vec![
            SessionInfo {
                id: "default".into(),
                created_at: None,
            },
            SessionInfo {
                id: "session-1".into(),
                created_at: None,
            },
        ];
        state.set_sessions(sessions.clone());

        state.select_session("session-1");
        assert_eq!(state.session_id(), "session-1");
        assert_eq!(state.sessions(), sessions.as_slice());
    }

    #[test]
    fn message_ids_are_unique_within_a_burst() {
        let mut state = connected_state();
        for _ in 0..5 {
            state.begin_send("x").unwrap();
            state.push_bot_reply("y", "t".into());
            state.finish_send();
        }
        let mut ids: Vec<&str> = state.messages().iter().map(|m| m.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 10);
    }

    #[test]
    fn display_time_parses_iso_and_passes_through_junk() {
        assert_eq!(display_time("2024-06-01T10:00:05.123456"), "10:00:05");
        assert_eq!(display_time("2024-06-01 10:00:05"), "10:00:05");
        assert_eq!(display_time("10:00"), "10:00");
    }
}
