//! Inbound chat event model.
//!
//! These mirror the `chat` events the gateway pushes over its event
//! channel. Only the fields the live pipeline reads are modeled; the
//! message body stays an opaque JSON value until text is extracted.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable identifier of a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for SessionKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Identifier of one request/response cycle within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random run id, used as the idempotency key of a send.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Lifecycle state carried by a chat event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatEventState {
    /// Cumulative text produced so far.
    Delta,
    /// The run finished; history holds the authoritative reply.
    Final,
    /// The run was cancelled.
    Aborted,
    /// The run failed upstream.
    Error,
}

impl ChatEventState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delta => "delta",
            Self::Final => "final",
            Self::Aborted => "aborted",
            Self::Error => "error",
        }
    }
}

/// A partial-response event for a chat run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    pub session_key: SessionKey,
    pub state: ChatEventState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Run text split at tool-call boundaries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<String>>,
}

impl ChatEvent {
    fn bare(session_key: impl Into<SessionKey>, run_id: Option<&str>, state: ChatEventState) -> Self {
        Self {
            run_id: run_id.map(RunId::from),
            session_key: session_key.into(),
            state,
            message: None,
            error_message: None,
            segments: None,
        }
    }

    /// Delta event whose message is plain text.
    pub fn delta(session_key: impl Into<SessionKey>, run_id: Option<&str>, text: &str) -> Self {
        let mut event = Self::bare(session_key, run_id, ChatEventState::Delta);
        event.message = Some(Value::String(text.to_string()));
        event
    }

    pub fn finished(session_key: impl Into<SessionKey>, run_id: Option<&str>) -> Self {
        Self::bare(session_key, run_id, ChatEventState::Final)
    }

    pub fn aborted(session_key: impl Into<SessionKey>, run_id: Option<&str>) -> Self {
        Self::bare(session_key, run_id, ChatEventState::Aborted)
    }

    pub fn error(
        session_key: impl Into<SessionKey>,
        run_id: Option<&str>,
        message: Option<&str>,
    ) -> Self {
        let mut event = Self::bare(session_key, run_id, ChatEventState::Error);
        event.error_message = message.map(str::to_string);
        event
    }

    pub fn with_segments(mut self, segments: Vec<String>) -> Self {
        self.segments = Some(segments);
        self
    }

    /// Text carried by the message body, if any.
    pub fn text(&self) -> Option<String> {
        self.message.as_ref().and_then(extract_text)
    }
}

/// Extract display text from a gateway message body.
///
/// Accepts a bare string, `{ "content": ".." }`,
/// `{ "content": [ { "type": "text", "text": ".." }, .. ] }`, or
/// `{ "text": ".." }`. `content` wins when both keys are present. Text
/// blocks are joined with newlines; non-text blocks (tool calls, images)
/// contribute nothing.
pub fn extract_text(message: &Value) -> Option<String> {
    match message {
        Value::String(text) => Some(text.clone()),
        Value::Object(map) => match map.get("content") {
            Some(Value::String(text)) => Some(text.clone()),
            Some(Value::Array(blocks)) => {
                let parts: Vec<&str> = blocks
                    .iter()
                    .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|block| block.get("text").and_then(Value::as_str))
                    .collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join("\n"))
                }
            }
            _ => map.get("text").and_then(Value::as_str).map(str::to_string),
        },
        _ => None,
    }
}
