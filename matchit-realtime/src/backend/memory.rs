//! In-process backend: table storage plus realtime channels.
//!
//! Assigns server ids and timestamps the way the hosted platform does and
//! fans inserts out to subscribers. Used by the CLI demo and by tests, which
//! can also pause push delivery, drop channels and inject failures.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use shared::models::{
    ChannelEvent, Conversation, ConversationStatus, ConversationSummary, ErrorResponse, Message,
    MessageId, NewMessage,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{MessageRepository, RealtimeChannel, RealtimeEvent, Subscription};
use crate::error::{BackendError, BackendResult};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
struct StoredConversation {
    conversation: Conversation,
    listing_title: String,
}

#[derive(Debug, Default)]
struct HubState {
    conversations: HashMap<Uuid, StoredConversation>,
    messages: Vec<Message>,
    display_names: HashMap<Uuid, String>,
    channels: HashMap<Uuid, broadcast::Sender<RealtimeEvent>>,
    last_id: MessageId,
    last_created_at: Option<DateTime<Utc>>,
    push_paused: bool,
    failing_inserts: usize,
    failing_queries: usize,
}

impl HubState {
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_created_at {
            Some(last) if last >= now => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_created_at = Some(stamp);
        stamp
    }

    fn channel(&mut self, conversation_id: Uuid) -> &broadcast::Sender<RealtimeEvent> {
        self.channels
            .entry(conversation_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
    }

    fn publish(&self, conversation_id: Uuid, event: RealtimeEvent) {
        if let Some(sender) = self.channels.get(&conversation_id) {
            // No receivers is not an error: nobody has the chat open.
            let _ = sender.send(event);
        }
    }

    fn summary_for(&self, stored: &StoredConversation, user_id: Uuid) -> Option<ConversationSummary> {
        let conversation = &stored.conversation;
        let other_user_id = conversation.counterpart(user_id)?;
        let last = self
            .messages
            .iter()
            .filter(|message| message.conversation_id == conversation.id)
            .max_by_key(|message| message.created_at);

        Some(ConversationSummary {
            id: conversation.id,
            listing_id: conversation.listing_id,
            listing_title: stored.listing_title.clone(),
            other_user_id,
            other_display_name: self.display_names.get(&other_user_id).cloned(),
            last_message: last.map(|message| message.content.clone()),
            last_at: last.map(|message| message.created_at),
            status: conversation.status,
        })
    }
}

#[derive(Debug, Default)]
struct HubInner {
    state: Mutex<HubState>,
    live_subscriptions: AtomicUsize,
}

/// Shared in-memory backend. Clones share the same storage and channels.
#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    /// Empty hub with no users or conversations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a display name shown in other users' chat listings.
    pub fn register_user(&self, user_id: Uuid, display_name: impl Into<String>) {
        self.state()
            .display_names
            .insert(user_id, display_name.into());
    }

    /// Opens a conversation between a buyer and a seller about a new listing.
    pub fn create_conversation(
        &self,
        listing_title: impl Into<String>,
        buyer_id: Uuid,
        seller_id: Uuid,
    ) -> Conversation {
        let conversation = Conversation {
            id: Uuid::new_v4(),
            listing_id: Uuid::new_v4(),
            status: ConversationStatus::Open,
            buyer_id,
            seller_id,
        };
        self.state().conversations.insert(
            conversation.id,
            StoredConversation {
                conversation: conversation.clone(),
                listing_title: listing_title.into(),
            },
        );
        conversation
    }

    /// Changes the negotiation state of a conversation.
    pub fn set_status(&self, conversation_id: Uuid, status: ConversationStatus) {
        if let Some(stored) = self.state().conversations.get_mut(&conversation_id) {
            stored.conversation.status = status;
        }
    }

    /// Stops (or resumes) fanning inserts out to subscribers. Rows are still
    /// stored, so only polling sees them while paused.
    pub fn set_push_paused(&self, paused: bool) {
        self.state().push_paused = paused;
    }

    /// Ends every live subscription of a conversation, as if the realtime
    /// connection dropped.
    pub fn drop_channel(&self, conversation_id: Uuid) {
        self.state().channels.remove(&conversation_id);
    }

    /// Makes the next `count` inserts fail with a transport error.
    pub fn fail_next_inserts(&self, count: usize) {
        self.state().failing_inserts = count;
    }

    /// Makes the next `count` message queries fail with a transport error.
    pub fn fail_next_queries(&self, count: usize) {
        self.state().failing_queries = count;
    }

    /// Number of subscriptions that have not been released.
    #[must_use]
    pub fn live_subscriptions(&self) -> usize {
        self.inner.live_subscriptions.load(Ordering::SeqCst)
    }

    /// Rows stored for a conversation, in insertion order.
    #[must_use]
    pub fn stored_messages(&self, conversation_id: Uuid) -> Vec<Message> {
        self.state()
            .messages
            .iter()
            .filter(|message| message.conversation_id == conversation_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessageRepository for MemoryHub {
    async fn find_conversation(&self, conversation_id: Uuid) -> BackendResult<Option<Conversation>> {
        Ok(self
            .state()
            .conversations
            .get(&conversation_id)
            .map(|stored| stored.conversation.clone()))
    }

    async fn list_conversations(&self, user_id: Uuid) -> BackendResult<Vec<ConversationSummary>> {
        let state = self.state();
        let mut summaries: Vec<ConversationSummary> = state
            .conversations
            .values()
            .filter_map(|stored| state.summary_for(stored, user_id))
            .collect();
        summaries.sort_by(|a, b| b.last_at.cmp(&a.last_at));
        Ok(summaries)
    }

    async fn query_messages(
        &self,
        conversation_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> BackendResult<Vec<Message>> {
        let mut state = self.state();
        if state.failing_queries > 0 {
            state.failing_queries -= 1;
            return Err(BackendError::Unavailable("injected query failure".to_string()));
        }

        let mut rows: Vec<Message> = state
            .messages
            .iter()
            .filter(|message| message.conversation_id == conversation_id)
            .filter(|message| since.is_none_or(|cursor| message.created_at > cursor))
            .cloned()
            .collect();
        rows.sort_by_key(|message| message.created_at);
        Ok(rows)
    }

    #[instrument(name = "memory.insert_message", skip(self, message), fields(conversation_id = %message.conversation_id))]
    async fn insert_message(&self, message: &NewMessage) -> BackendResult<Message> {
        let mut state = self.state();
        if state.failing_inserts > 0 {
            state.failing_inserts -= 1;
            return Err(BackendError::Unavailable("injected insert failure".to_string()));
        }

        let Some(stored) = state.conversations.get(&message.conversation_id) else {
            return Err(BackendError::Rejected {
                status: 409,
                body: ErrorResponse {
                    code: Some("23503".to_string()),
                    ..ErrorResponse::new("insert or update on table \"messages\" violates foreign key constraint")
                },
            });
        };
        if !stored.conversation.includes(message.sender_id) {
            return Err(BackendError::Rejected {
                status: 403,
                body: ErrorResponse {
                    code: Some("42501".to_string()),
                    ..ErrorResponse::new("new row violates row-level security policy for table \"messages\"")
                },
            });
        }

        state.last_id += 1;
        let row = Message {
            id: state.last_id,
            local_id: None,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content.clone(),
            kind: message.kind,
            created_at: state.next_timestamp(),
        };
        state.messages.push(row.clone());

        if state.push_paused {
            debug!(id = row.id, "push paused; insert not fanned out");
        } else {
            state.publish(row.conversation_id, RealtimeEvent::Inserted(row.clone()));
        }
        Ok(row)
    }
}

#[async_trait]
impl RealtimeChannel for MemoryHub {
    async fn subscribe(&self, conversation_id: Uuid) -> BackendResult<Box<dyn Subscription>> {
        let receiver = self.state().channel(conversation_id).subscribe();
        self.inner.live_subscriptions.fetch_add(1, Ordering::SeqCst);
        debug!(%conversation_id, "memory subscription opened");
        Ok(Box::new(MemorySubscription {
            conversation_id,
            receiver: Some(receiver),
            hub: Arc::clone(&self.inner),
        }))
    }

    async fn broadcast(&self, conversation_id: Uuid, event: ChannelEvent) -> BackendResult<()> {
        self.state()
            .publish(conversation_id, RealtimeEvent::Broadcast(event));
        Ok(())
    }
}

/// Subscription handed out by [`MemoryHub`]. Released on close or drop.
#[derive(Debug)]
struct MemorySubscription {
    conversation_id: Uuid,
    receiver: Option<broadcast::Receiver<RealtimeEvent>>,
    hub: Arc<HubInner>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_event(&mut self) -> Option<RealtimeEvent> {
        loop {
            let received = match self.receiver.as_mut() {
                Some(receiver) => receiver.recv().await,
                None => return None,
            };
            match received {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        conversation_id = %self.conversation_id,
                        skipped,
                        "subscription lagged; polling will backfill"
                    );
                }
                Err(RecvError::Closed) => {
                    self.close();
                    return None;
                }
            }
        }
    }

    fn close(&mut self) {
        if self.receiver.take().is_some() {
            self.hub.live_subscriptions.fetch_sub(1, Ordering::SeqCst);
            debug!(conversation_id = %self.conversation_id, "memory subscription released");
        }
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{MessageKind, TypingSignal};

    fn new_message(conversation: &Conversation, sender_id: Uuid, content: &str) -> NewMessage {
        NewMessage {
            conversation_id: conversation.id,
            sender_id,
            content: content.to_string(),
            kind: MessageKind::Text,
        }
    }

    fn setup() -> (MemoryHub, Conversation) {
        let hub = MemoryHub::new();
        let conversation =
            hub.create_conversation("ThinkPad T480", Uuid::new_v4(), Uuid::new_v4());
        (hub, conversation)
    }

    #[tokio::test]
    async fn insert_assigns_increasing_ids_and_timestamps() {
        let (hub, conversation) = setup();

        let first = hub
            .insert_message(&new_message(&conversation, conversation.buyer_id, "hi"))
            .await
            .unwrap();
        let second = hub
            .insert_message(&new_message(&conversation, conversation.seller_id, "hello"))
            .await
            .unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert!(second.created_at > first.created_at);
        assert_eq!(first.local_id, None);
    }

    #[tokio::test]
    async fn query_filters_strictly_after_cursor() {
        let (hub, conversation) = setup();
        let first = hub
            .insert_message(&new_message(&conversation, conversation.buyer_id, "one"))
            .await
            .unwrap();
        hub.insert_message(&new_message(&conversation, conversation.buyer_id, "two"))
            .await
            .unwrap();

        let all = hub.query_messages(conversation.id, None).await.unwrap();
        let newer = hub
            .query_messages(conversation.id, Some(first.created_at))
            .await
            .unwrap();

        assert_eq!(all.len(), 2);
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].content, "two");
    }

    #[tokio::test]
    async fn insert_rejects_non_participants_and_unknown_conversations() {
        let (hub, conversation) = setup();

        let stranger = hub
            .insert_message(&new_message(&conversation, Uuid::new_v4(), "spam"))
            .await;
        assert!(matches!(stranger, Err(BackendError::Rejected { status: 403, .. })));

        let mut orphan = new_message(&conversation, conversation.buyer_id, "lost");
        orphan.conversation_id = Uuid::new_v4();
        let missing = hub.insert_message(&orphan).await;
        assert!(matches!(missing, Err(BackendError::Rejected { status: 409, .. })));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let (hub, conversation) = setup();
        hub.fail_next_inserts(1);
        hub.fail_next_queries(1);

        let message = new_message(&conversation, conversation.buyer_id, "hi");
        assert!(hub.insert_message(&message).await.is_err());
        assert!(hub.insert_message(&message).await.is_ok());
        assert!(hub.query_messages(conversation.id, None).await.is_err());
        assert_eq!(hub.query_messages(conversation.id, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn subscribers_receive_inserts_and_broadcasts() {
        let (hub, conversation) = setup();
        let mut subscription = hub.subscribe(conversation.id).await.unwrap();

        let row = hub
            .insert_message(&new_message(&conversation, conversation.buyer_id, "hi"))
            .await
            .unwrap();
        let typing = ChannelEvent::Typing(TypingSignal {
            user_id: conversation.seller_id,
            at: Utc::now(),
        });
        hub.broadcast(conversation.id, typing.clone()).await.unwrap();

        assert_eq!(
            subscription.next_event().await,
            Some(RealtimeEvent::Inserted(row))
        );
        assert_eq!(
            subscription.next_event().await,
            Some(RealtimeEvent::Broadcast(typing))
        );
    }

    #[tokio::test]
    async fn paused_push_still_stores_rows() {
        let (hub, conversation) = setup();
        let mut subscription = hub.subscribe(conversation.id).await.unwrap();
        hub.set_push_paused(true);

        hub.insert_message(&new_message(&conversation, conversation.buyer_id, "quiet"))
            .await
            .unwrap();

        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            subscription.next_event(),
        )
        .await;
        assert!(pending.is_err());
        assert_eq!(hub.stored_messages(conversation.id).len(), 1);
    }

    #[tokio::test]
    async fn subscriptions_are_released_on_close_drop_and_channel_loss() {
        let (hub, conversation) = setup();

        let mut closed = hub.subscribe(conversation.id).await.unwrap();
        let dropped = hub.subscribe(conversation.id).await.unwrap();
        let mut severed = hub.subscribe(conversation.id).await.unwrap();
        assert_eq!(hub.live_subscriptions(), 3);

        closed.close();
        closed.close();
        assert_eq!(hub.live_subscriptions(), 2);

        drop(dropped);
        assert_eq!(hub.live_subscriptions(), 1);

        hub.drop_channel(conversation.id);
        assert_eq!(severed.next_event().await, None);
        assert_eq!(hub.live_subscriptions(), 0);
    }

    #[tokio::test]
    async fn listing_shows_counterpart_and_last_message() {
        let hub = MemoryHub::new();
        let buyer = Uuid::new_v4();
        let seller = Uuid::new_v4();
        hub.register_user(seller, "Ana");
        let quiet = hub.create_conversation("Ryzen 5 3600", buyer, seller);
        let busy = hub.create_conversation("RTX 3070", buyer, seller);
        hub.set_status(busy.id, ConversationStatus::Reserved);
        hub.insert_message(&new_message(&busy, seller, "reserved for you"))
            .await
            .unwrap();

        let listing = hub.list_conversations(buyer).await.unwrap();

        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].id, busy.id);
        assert_eq!(listing[0].other_user_id, seller);
        assert_eq!(listing[0].other_display_name.as_deref(), Some("Ana"));
        assert_eq!(listing[0].last_message.as_deref(), Some("reserved for you"));
        assert_eq!(listing[0].status, ConversationStatus::Reserved);
        assert_eq!(listing[1].id, quiet.id);
        assert_eq!(listing[1].last_at, None);

        assert!(hub.list_conversations(Uuid::new_v4()).await.unwrap().is_empty());
    }
}
