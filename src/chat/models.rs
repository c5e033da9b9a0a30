use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// One persisted message in a session's transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub id: i64,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
}

/// A turn before the store has assigned its id and timestamp.
#[derive(Debug, Clone)]
pub struct NewTurn {
    pub session_id: String,
    pub role: Role,
    pub content: String,
}

impl NewTurn {
    pub fn user(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Role-tagged entry of the transcript sent to the completion service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl From<&Turn> for ChatMessage {
    fn from(turn: &Turn) -> Self {
        Self {
            role: turn.role,
            content: turn.content.clone(),
        }
    }
}

/// Payload of one downstream SSE event: `{"content": ...}` or `{"done": true}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    Content { content: String },
    Done,
}

impl Serialize for StreamFrame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            Self::Content { content } => map.serialize_entry("content", content)?,
            Self::Done => map.serialize_entry("done", &true)?,
        }
        map.end()
    }
}

impl StreamFrame {
    pub fn content(text: impl Into<String>) -> Self {
        Self::Content {
            content: text.into(),
        }
    }

    pub fn done() -> Self {
        Self::Done
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}
