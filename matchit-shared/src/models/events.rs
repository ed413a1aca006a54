use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// "Is typing" signal broadcast on a conversation channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypingSignal {
    /// User who is typing.
    pub user_id: Uuid,

    /// When the signal was emitted, in epoch milliseconds on the wire.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub at: DateTime<Utc>,
}

/// Ephemeral event broadcast to the other subscribers of a conversation.
/// Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "payload")]
pub enum ChannelEvent {
    /// The sender is composing a message.
    #[serde(rename = "typing")]
    Typing(TypingSignal),
}

impl ChannelEvent {
    /// The user that emitted the event.
    #[must_use]
    pub const fn user_id(&self) -> Uuid {
        match self {
            ChannelEvent::Typing(signal) => signal.user_id,
        }
    }
}
