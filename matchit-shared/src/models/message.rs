use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use uuid::Uuid;

/// Server-assigned message identifier. `0` marks a message the server has
/// not confirmed yet.
pub type MessageId = i64;

/// The kind of a chat message. Only display code distinguishes kinds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain text typed by a participant.
    #[default]
    Text,
    /// An image reference.
    Image,
    /// Marketplace notice (reservation, sale, ...).
    System,
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MessageKind::Text => write!(f, "text"),
            MessageKind::Image => write!(f, "image"),
            MessageKind::System => write!(f, "system"),
        }
    }
}

/// Identity used to deduplicate messages arriving from several sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKey {
    /// Confirmed message, keyed by its server id.
    Server(MessageId),
    /// Optimistic message, keyed by its client-generated id.
    Local(Uuid),
}

impl Display for MessageKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MessageKey::Server(id) => write!(f, "{id}"),
            MessageKey::Local(local_id) => write!(f, "local:{local_id}"),
        }
    }
}

/// A single chat message, as stored by the backend or created optimistically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Server identifier, `0` until confirmed.
    #[serde(default)]
    pub id: MessageId,

    /// Client identifier, present only while the message is unconfirmed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<Uuid>,

    /// Conversation this message belongs to.
    #[serde(rename = "chat_id")]
    pub conversation_id: Uuid,

    /// Author of the message.
    pub sender_id: Uuid,

    /// Text payload.
    pub content: String,

    /// Display kind.
    #[serde(rename = "type", default)]
    pub kind: MessageKind,

    /// Ordering timestamp. Client estimate for optimistic messages.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Builds a provisional message with a fresh client identifier.
    #[must_use]
    pub fn optimistic(
        conversation_id: Uuid,
        sender_id: Uuid,
        content: impl Into<String>,
        kind: MessageKind,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            local_id: Some(Uuid::new_v4()),
            conversation_id,
            sender_id,
            content: content.into(),
            kind,
            created_at,
        }
    }

    /// Whether the server has assigned this message an id.
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        self.id != 0
    }

    /// The deduplication key: the server id when present, otherwise the
    /// local id. A message with neither has no identity.
    #[must_use]
    pub fn identity(&self) -> Option<MessageKey> {
        if self.is_confirmed() {
            Some(MessageKey::Server(self.id))
        } else {
            self.local_id.map(MessageKey::Local)
        }
    }
}

/// Insert payload for the `messages` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewMessage {
    /// Target conversation.
    #[serde(rename = "chat_id")]
    pub conversation_id: Uuid,

    /// Author.
    pub sender_id: Uuid,

    /// Text payload.
    pub content: String,

    /// Display kind.
    #[serde(rename = "type")]
    pub kind: MessageKind,
}

impl From<&Message> for NewMessage {
    fn from(message: &Message) -> Self {
        Self {
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content.clone(),
            kind: message.kind,
        }
    }
}
