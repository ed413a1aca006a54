//! Seams to the hosted backend platform.
//!
//! The table API ([`MessageRepository`]) and the realtime service
//! ([`RealtimeChannel`]) are separate traits: a deployment without push
//! still converges through polling. [`rest::RestBackend`] and
//! [`socket::RealtimeSocket`] talk to the hosted platform,
//! [`memory::MemoryHub`] implements both in process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::models::{ChannelEvent, Conversation, ConversationSummary, Message, NewMessage};
use uuid::Uuid;

use crate::error::BackendResult;

pub mod memory;
pub mod rest;
pub mod socket;

/// Table and RPC calls used by the reconciler.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Looks up a conversation. `Ok(None)` when it does not resolve.
    async fn find_conversation(&self, conversation_id: Uuid) -> BackendResult<Option<Conversation>>;

    /// Conversations of `user_id`, most recent activity first.
    async fn list_conversations(&self, user_id: Uuid) -> BackendResult<Vec<ConversationSummary>>;

    /// Messages of a conversation in ascending `created_at` order, limited
    /// to rows strictly newer than `since` when given.
    async fn query_messages(
        &self,
        conversation_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> BackendResult<Vec<Message>>;

    /// Inserts a message and returns the stored row.
    async fn insert_message(&self, message: &NewMessage) -> BackendResult<Message>;
}

/// Event delivered on a conversation subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealtimeEvent {
    /// A row was inserted into the conversation's messages.
    Inserted(Message),
    /// An ephemeral broadcast from a subscriber.
    Broadcast(ChannelEvent),
}

/// A live subscription to one conversation channel.
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next event. `None` once the subscription has ended.
    /// Must be cancel-safe: dropping the future loses no event.
    async fn next_event(&mut self) -> Option<RealtimeEvent>;

    /// Releases the subscription. Idempotent.
    fn close(&mut self);
}

/// Realtime fan-out keyed by conversation.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    /// Opens a subscription to inserts and broadcasts of a conversation.
    async fn subscribe(&self, conversation_id: Uuid) -> BackendResult<Box<dyn Subscription>>;

    /// Delivers an ephemeral event to the conversation's subscribers.
    async fn broadcast(&self, conversation_id: Uuid, event: ChannelEvent) -> BackendResult<()>;
}
