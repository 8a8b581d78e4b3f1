//! HTTP client for the chat backend
//!
//! Covers the backend surface the client consumes:
//! - `GET /` liveness probe
//! - `GET /api/v1/chat/history/{session_id}` stored turns
//! - `GET /api/v1/chat/sessions` known session list
//! - `POST /api/v1/chat` buffered send
//! - `POST /api/v1/chat/stream` streamed send (line-delimited `data:` events)
//! - `DELETE /api/v1/chat/history/{session_id}` clear
//!
//! Streamed replies are decoded by [`SseDecoder`], which buffers partial
//! lines across chunk boundaries; a chunk may end mid-line or even mid
//! UTF-8 sequence.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::state::SessionInfo;

/// Backend-facing failure taxonomy. Everything is caught at the call site
/// and rendered in-conversation; nothing propagates past the REPL.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("invalid response body: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Body of both send endpoints.
#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub message: &'a str,
    pub session_id: &'a str,
}

/// Reply from the buffered send endpoint.
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    #[serde(default)]
    pub session_id: String,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    messages: Vec<HistoryTurn>,
}

/// One stored conversation turn: the user's message and the bot's reply,
/// sharing a timestamp.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryTurn {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub bot: String,
    #[serde(default)]
    pub timestamp: String,
}

/// The sessions endpoint has two shapes in the wild: the backend's
/// `{"active_sessions": ["id", ...]}` and the richer
/// `{"sessions": [{"id", "created_at"}, ...]}`. Accept both.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SessionsResponse {
    Active { active_sessions: Vec<SessionEntry> },
    Listed { sessions: Vec<SessionEntry> },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SessionEntry {
    Id(String),
    Info {
        #[serde(alias = "session_id")]
        id: String,
        #[serde(default, alias = "createdAt")]
        created_at: Option<String>,
    },
}

impl SessionsResponse {
    fn into_sessions(self) -> Vec<SessionInfo> {
        let entries = match self {
            SessionsResponse::Active { active_sessions } => active_sessions,
            SessionsResponse::Listed { sessions } => sessions,
        };
        entries
            .into_iter()
            .map(|entry| match entry {
                SessionEntry::Id(id) => SessionInfo {
                    id,
                    created_at: None,
                },
                SessionEntry::Info { id, created_at } => SessionInfo { id, created_at },
            })
            .collect()
    }
}

/// One event decoded off the streamed reply body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A `char` event: the next slice of reply text.
    Delta(String),
    /// The backend closed the turn (an `end` event or a clean EOF).
    Done,
    /// The backend signalled an `error` event mid-stream.
    ServerError(String),
    /// The connection dropped while reading the body.
    TransportError(String),
}

/// Per-line event payload as the backend writes it.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum StreamPayload {
    #[serde(rename = "char")]
    Char {
        #[serde(rename = "char")]
        text: String,
    },
    #[serde(rename = "end")]
    End {},
    #[serde(rename = "error")]
    Error { error: String },
}

/// Incremental decoder for the line-delimited stream body.
///
/// Bytes are buffered until a `\n` arrives, so a line split across chunks
/// (or a multi-byte character split across chunks) decodes the same as one
/// delivered whole.
#[derive(Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one received chunk, returning every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes);
            if let Some(event) = decode_line(line.trim()) {
                events.push(event);
            }
        }
        events
    }
}

/// Decode one complete line. Only `data:`-prefixed lines carry events;
/// blank lines and other framing are ignored. A malformed payload is
/// skipped and logged, never fatal to the stream.
fn decode_line(line: &str) -> Option<StreamEvent> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data.is_empty() {
        return None;
    }
    match serde_json::from_str::<StreamPayload>(data) {
        Ok(StreamPayload::Char { text }) => Some(StreamEvent::Delta(text)),
        Ok(StreamPayload::End {}) => Some(StreamEvent::Done),
        Ok(StreamPayload::Error { error }) => Some(StreamEvent::ServerError(error)),
        Err(e) => {
            tracing::debug!("skipping malformed stream line {:?}: {}", line, e);
            None
        }
    }
}

/// Client for the chat backend.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Liveness probe: any 2xx means alive, any failure means not.
    pub async fn probe(&self) -> bool {
        match self.http.get(self.url("/")).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("connectivity probe failed: {}", e);
                false
            }
        }
    }

    /// Fetch the stored turns for a session, oldest first.
    pub async fn history(&self, session_id: &str) -> Result<Vec<HistoryTurn>> {
        let response = self
            .http
            .get(self.url(&format!("/api/v1/chat/history/{}", session_id)))
            .send()
            .await?;
        let response = check_status(response).await?;
        let body: HistoryResponse = parse_json(response).await?;
        Ok(body.messages)
    }

    /// Fetch the known session list.
    pub async fn sessions(&self) -> Result<Vec<SessionInfo>> {
        let response = self
            .http
            .get(self.url("/api/v1/chat/sessions"))
            .send()
            .await?;
        let response = check_status(response).await?;
        let body: SessionsResponse = parse_json(response).await?;
        Ok(body.into_sessions())
    }

    /// Buffered send: one request, one whole reply.
    pub async fn send(&self, message: &str, session_id: &str) -> Result<ChatResponse> {
        let response = self
            .http
            .post(self.url("/api/v1/chat"))
            .json(&ChatRequest {
                message,
                session_id,
            })
            .send()
            .await?;
        let response = check_status(response).await?;
        parse_json(response).await
    }

    /// Streamed send: opens the streaming endpoint and returns a channel of
    /// decoded events. A spawned task drains the body; dropping the receiver
    /// stops it.
    pub async fn send_stream(
        &self,
        message: &str,
        session_id: &str,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let response = self
            .http
            .post(self.url("/api/v1/chat/stream"))
            .json(&ChatRequest {
                message,
                session_id,
            })
            .send()
            .await?;
        let response = check_status(response).await?;

        let (tx, rx) = mpsc::channel(100);
        let bytes_stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut decoder = SseDecoder::new();
            futures::pin_mut!(bytes_stream);

            while let Some(chunk_result) = bytes_stream.next().await {
                let chunk = match chunk_result {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(StreamEvent::TransportError(e.to_string())).await;
                        return;
                    }
                };

                for event in decoder.feed(&chunk) {
                    let stop = matches!(
                        event,
                        StreamEvent::Done | StreamEvent::ServerError(_)
                    );
                    if tx.send(event).await.is_err() {
                        return;
                    }
                    if stop {
                        return;
                    }
                }
            }

            // Body closed without an end event; that is a normal finish.
            let _ = tx.send(StreamEvent::Done).await;
        });

        Ok(rx)
    }

    /// Ask the backend to delete a session's history.
    pub async fn clear_history(&self, session_id: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!("/api/v1/chat/history/{}", session_id)))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Status { status, body })
    }
}

async fn parse_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| {
        let preview: String = text.chars().take(200).collect();
        ClientError::Decode(format!("{} (body: {})", e, preview))
    })
}
