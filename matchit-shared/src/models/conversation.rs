use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use uuid::Uuid;

/// Negotiation state of the listing a conversation is about.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    /// Buyer and seller are talking.
    #[default]
    Open,
    /// The seller reserved the item for this buyer.
    Reserved,
    /// The item was sold.
    Sold,
}

impl ConversationStatus {
    /// Human-readable label used by renderers.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            ConversationStatus::Open => "Chatting",
            ConversationStatus::Reserved => "Reserved",
            ConversationStatus::Sold => "Sold",
        }
    }
}

impl Display for ConversationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ConversationStatus::Open => write!(f, "open"),
            ConversationStatus::Reserved => write!(f, "reserved"),
            ConversationStatus::Sold => write!(f, "sold"),
        }
    }
}

/// A two-party chat thread tied to one marketplace listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    /// Conversation identifier.
    pub id: Uuid,

    /// Listing being negotiated.
    pub listing_id: Uuid,

    /// Negotiation state.
    pub status: ConversationStatus,

    /// Buyer participant.
    pub buyer_id: Uuid,

    /// Seller participant.
    pub seller_id: Uuid,
}

impl Conversation {
    /// Whether `user_id` is one of the two participants.
    #[must_use]
    pub fn includes(&self, user_id: Uuid) -> bool {
        self.buyer_id == user_id || self.seller_id == user_id
    }

    /// The other participant from `user_id`'s point of view.
    #[must_use]
    pub fn counterpart(&self, user_id: Uuid) -> Option<Uuid> {
        if user_id == self.buyer_id {
            Some(self.seller_id)
        } else if user_id == self.seller_id {
            Some(self.buyer_id)
        } else {
            None
        }
    }
}

/// One row of the "my chats" listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationSummary {
    /// Conversation identifier.
    pub id: Uuid,

    /// Listing being negotiated.
    pub listing_id: Uuid,

    /// Listing title.
    pub listing_title: String,

    /// The participant that is not the caller.
    pub other_user_id: Uuid,

    /// Display name of the other participant, if they set one.
    #[serde(default)]
    pub other_display_name: Option<String>,

    /// Content of the most recent message.
    #[serde(default)]
    pub last_message: Option<String>,

    /// Timestamp of the most recent message.
    #[serde(default)]
    pub last_at: Option<DateTime<Utc>>,

    /// Negotiation state.
    pub status: ConversationStatus,
}
