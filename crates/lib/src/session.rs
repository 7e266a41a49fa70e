//! Conversation sessions and message history.
//!
//! A session is created locally under a pending identity and adopts the
//! backend-issued identifier after its first answered query. On disk and on
//! the wire a session identity is the flat `id` string; the Pending/Confirmed
//! distinction exists only in memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Marker prefix for identifiers minted locally before the backend has
/// acknowledged the conversation.
pub const PENDING_ID_PREFIX: &str = "temp-";

/// The current time at the millisecond precision used by the persisted and
/// wire `ts_milliseconds` shape, so a session round-trips through the store
/// deep-equal to its in-memory form.
fn now_ms() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Session identity: a locally minted placeholder or a backend-issued id.
///
/// Both variants hold the full id string (the pending one includes the
/// `temp-` prefix), so lookups by id never need to know which state the
/// session is in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionIdentity {
    /// Placeholder minted by [`SessionIdentity::fresh`]; not known to the backend.
    Pending(String),
    /// Opaque identifier issued by the backend.
    Confirmed(String),
}

impl SessionIdentity {
    /// Mint a new pending identity (`temp-<uuid>`).
    pub fn fresh() -> Self {
        Self::Pending(format!("{}{}", PENDING_ID_PREFIX, uuid::Uuid::new_v4()))
    }

    /// Reconstruct an identity from a stored id string.
    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        if id.starts_with(PENDING_ID_PREFIX) {
            Self::Pending(id)
        } else {
            Self::Confirmed(id)
        }
    }

    /// The id string, regardless of state.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending(id) | Self::Confirmed(id) => id,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// The id to send to the backend: `None` while pending (the backend
    /// assigns one on the first query), the real id once confirmed.
    pub fn wire_id(&self) -> Option<&str> {
        match self {
            Self::Pending(_) => None,
            Self::Confirmed(id) => Some(id),
        }
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SessionIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SessionIdentity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from_id(String::deserialize(deserializer)?))
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A citation returned alongside an assistant answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    /// The backend sends this as a number (5) or a string ("5(1)").
    pub article_number: ArticleNumber,
    /// Documented range [0, 1]; passed through untouched.
    pub relevance_score: f32,
}

/// Article reference as the backend serializes it: plain number or string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArticleNumber {
    Number(u64),
    Text(String),
}

impl fmt::Display for ArticleNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// A single message in a session. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Citations for assistant answers; absent on user messages and on the
    /// fallback message appended when a query fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.into(),
            sources: None,
            timestamp: now_ms(),
        }
    }

    pub fn assistant(content: impl Into<String>, sources: Vec<Source>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: content.into(),
            sources: Some(sources),
            timestamp: now_ms(),
        }
    }

    /// Assistant message carrying no citations (error and cancellation notices).
    pub fn assistant_notice(content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: content.into(),
            sources: None,
            timestamp: now_ms(),
        }
    }
}

/// A conversation: identity, display title, creation time, ordered messages.
///
/// Serializes to the persisted shape `{id, title, created, messages}` with
/// millisecond timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "id")]
    pub identity: SessionIdentity,
    pub title: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

impl Session {
    /// New empty session under a fresh pending identity.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            identity: SessionIdentity::fresh(),
            title: title.into(),
            created: now_ms(),
            messages: Vec::new(),
        }
    }

    /// The id string (pending or confirmed).
    pub fn id(&self) -> &str {
        self.identity.as_str()
    }
}
