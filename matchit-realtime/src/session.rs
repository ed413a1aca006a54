//! Lifecycle of one open conversation.
//!
//! [`ConversationSession::open`] loads the conversation and its history,
//! subscribes to push (when a realtime channel is available) and starts the
//! poll loop. Everything it starts is torn down by [`ConversationSession::close`]
//! or, failing that, when the session is dropped.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use metrics::counter;
use shared::{
    config::RealtimeConfig,
    models::{ChannelEvent, Conversation, Message, MessageKind, NewMessage, TypingSignal},
};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    backend::{MessageRepository, RealtimeChannel},
    error::{ChatError, ChatResult},
    poll, push,
    store::MessageStore,
    typing::TypingIndicator,
};

/// Timing knobs of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Period of the poll loop.
    pub poll_interval: Duration,
    /// How long a peer typing signal stays visible.
    pub typing_countdown: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&RealtimeConfig::default())
    }
}

impl From<&RealtimeConfig> for SessionOptions {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            typing_countdown: config.typing_countdown(),
        }
    }
}

/// Result of [`ConversationSession::send`]. Failures are outcomes, not
/// errors: the store has already been restored when `RolledBack` returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank input or closed session; nothing was sent.
    Skipped,
    /// The server stored the message; this is its canonical row.
    Confirmed(Message),
    /// The insert failed and the provisional entry was removed.
    RolledBack,
}

/// Removes a provisional entry when the send that created it is dropped
/// before the insert resolves.
struct PendingSend {
    state: Arc<SessionState>,
    local_id: Option<Uuid>,
}

impl PendingSend {
    fn arm(state: &Arc<SessionState>, local_id: Uuid) -> Self {
        Self {
            state: Arc::clone(state),
            local_id: Some(local_id),
        }
    }

    fn disarm(mut self) {
        self.local_id = None;
    }
}

impl Drop for PendingSend {
    fn drop(&mut self) {
        if let Some(local_id) = self.local_id.take() {
            let removed = self.state.update(|store| store.remove_by_local_id(local_id));
            if removed.is_some() {
                counter!("matchit_sends_total", "outcome" => "cancelled").increment(1);
                debug!(%local_id, "send cancelled; provisional message removed");
            }
        }
    }
}

/// State shared between the session handle and its background tasks.
#[derive(Debug)]
pub(crate) struct SessionState {
    store: Mutex<MessageStore>,
    snapshots: watch::Sender<Vec<Message>>,
    pub(crate) typing: TypingIndicator,
}

impl SessionState {
    fn new(conversation_id: Uuid, typing_countdown: Duration) -> Self {
        let (snapshots, _) = watch::channel(Vec::new());
        Self {
            store: Mutex::new(MessageStore::new(conversation_id)),
            snapshots,
            typing: TypingIndicator::new(typing_countdown),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MessageStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `change` to the store and publishes a snapshot if the list
    /// changed. The lock is released before returning.
    pub(crate) fn update<R>(&self, change: impl FnOnce(&mut MessageStore) -> R) -> R {
        let mut store = self.lock();
        let result = change(&mut store);
        self.snapshots.send_if_modified(|current| {
            if current.as_slice() == store.messages() {
                false
            } else {
                *current = store.messages().to_vec();
                true
            }
        });
        result
    }

    pub(crate) fn merge(&self, rows: Vec<Message>) -> usize {
        self.update(|store| store.merge(rows))
    }

    pub(crate) fn cursor(&self) -> Option<DateTime<Utc>> {
        self.lock().cursor()
    }

    pub(crate) fn conversation_id(&self) -> Uuid {
        self.lock().conversation_id()
    }
}

/// An open conversation view: the message store plus the push listener,
/// poll loop and typing countdown feeding it.
pub struct ConversationSession {
    conversation: Conversation,
    local_user: Uuid,
    repository: Arc<dyn MessageRepository>,
    channel: Option<Arc<dyn RealtimeChannel>>,
    state: Arc<SessionState>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl fmt::Debug for ConversationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationSession")
            .field("conversation", &self.conversation)
            .field("local_user", &self.local_user)
            .field("push", &self.channel.is_some())
            .field("closed", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ConversationSession {
    /// Opens `conversation_id` for `local_user`.
    ///
    /// Without a `channel` the session runs in poll-only mode. A failed
    /// history load or subscription is logged and left to the poll loop.
    ///
    /// # Errors
    /// [`ChatError::ConversationNotFound`] when the conversation does not
    /// resolve, [`ChatError::Backend`] when the lookup itself fails.
    #[instrument(name = "session.open", skip(repository, channel, options), err)]
    pub async fn open(
        conversation_id: Uuid,
        local_user: Uuid,
        repository: Arc<dyn MessageRepository>,
        channel: Option<Arc<dyn RealtimeChannel>>,
        options: SessionOptions,
    ) -> ChatResult<Self> {
        let conversation = repository
            .find_conversation(conversation_id)
            .await?
            .ok_or(ChatError::ConversationNotFound(conversation_id))?;
        if !conversation.includes(local_user) {
            warn!(%local_user, "local user is not a participant; inserts will be rejected");
        }

        let state = Arc::new(SessionState::new(conversation_id, options.typing_countdown));
        match repository.query_messages(conversation_id, None).await {
            Ok(rows) => {
                let loaded = state.merge(rows);
                debug!(loaded, "initial history loaded");
            }
            Err(err) => warn!(error = %err, "initial history load failed; polling will backfill"),
        }

        let shutdown = CancellationToken::new();
        let mut tasks = Vec::with_capacity(2);
        if let Some(channel) = &channel {
            match channel.subscribe(conversation_id).await {
                Ok(subscription) => tasks.push(tokio::spawn(push::run(
                    subscription,
                    Arc::clone(&state),
                    local_user,
                    shutdown.child_token(),
                ))),
                Err(err) => warn!(error = %err, "realtime subscription failed; polling only"),
            }
        }
        tasks.push(tokio::spawn(poll::run(
            Arc::clone(&repository),
            Arc::clone(&state),
            options.poll_interval,
            shutdown.child_token(),
        )));

        info!(
            status = %conversation.status,
            push = tasks.len() > 1,
            "conversation opened"
        );
        Ok(Self {
            conversation,
            local_user,
            repository,
            channel,
            state,
            shutdown,
            tasks,
        })
    }

    /// Sends a text message. See [`send_as`](Self::send_as).
    pub async fn send(&self, text: &str) -> SendOutcome {
        self.send_as(MessageKind::Text, text).await
    }

    /// Shows `content` immediately as a provisional entry, inserts it, then
    /// swaps in the stored row or rolls the entry back.
    #[instrument(name = "session.send", skip(self, content), fields(conversation_id = %self.conversation.id))]
    pub async fn send_as(&self, kind: MessageKind, content: &str) -> SendOutcome {
        let content = content.trim();
        if content.is_empty() || self.shutdown.is_cancelled() {
            return SendOutcome::Skipped;
        }

        let local_id = Uuid::new_v4();
        let provisional = Message {
            local_id: Some(local_id),
            ..Message::optimistic(
                self.conversation.id,
                self.local_user,
                content,
                kind,
                Utc::now(),
            )
        };
        let draft = NewMessage::from(&provisional);
        self.state.merge(vec![provisional]);
        let pending = PendingSend::arm(&self.state, local_id);

        let result = self.repository.insert_message(&draft).await;
        pending.disarm();
        match result {
            Ok(record) => {
                self.state
                    .update(|store| store.confirm(local_id, record.clone()));
                counter!("matchit_sends_total", "outcome" => "confirmed").increment(1);
                debug!(id = record.id, %local_id, "send confirmed");
                SendOutcome::Confirmed(record)
            }
            Err(err) => {
                self.state
                    .update(|store| store.remove_by_local_id(local_id));
                counter!("matchit_sends_total", "outcome" => "rolled_back").increment(1);
                warn!(error = %err, %local_id, "send failed; provisional message removed");
                SendOutcome::RolledBack
            }
        }
    }

    /// Tells the other participant the local user is typing. Best effort:
    /// failures and poll-only sessions are silently ignored.
    pub async fn notify_typing(&self) {
        let Some(channel) = &self.channel else {
            return;
        };
        if self.shutdown.is_cancelled() {
            return;
        }
        let event = ChannelEvent::Typing(TypingSignal {
            user_id: self.local_user,
            at: Utc::now(),
        });
        if let Err(err) = channel.broadcast(self.conversation.id, event).await {
            debug!(error = %err, "typing broadcast failed");
        }
    }

    /// Releases the subscription and stops the poll loop and typing
    /// countdown, waiting for the background tasks to finish.
    #[instrument(name = "session.close", skip(self), fields(conversation_id = %self.conversation.id))]
    pub async fn close(mut self) {
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            if let Err(err) = task.await
                && !err.is_cancelled()
            {
                warn!(error = %err, "session task ended abnormally");
            }
        }
        self.state.typing.cancel();
        info!("conversation closed");
    }

    /// Snapshot of the ordered message list.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().messages().to_vec()
    }

    /// Newest confirmed `created_at` seen so far; the poll loop asks for
    /// rows after it.
    #[must_use]
    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.state.cursor()
    }

    /// Receiver notified after every change to the message list.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Vec<Message>> {
        self.state.snapshots.subscribe()
    }

    /// Whether the other participant is currently typing.
    #[must_use]
    pub fn peer_typing(&self) -> bool {
        self.state.typing.is_active()
    }

    /// Receiver notified whenever the peer typing flag flips.
    #[must_use]
    pub fn typing_updates(&self) -> watch::Receiver<bool> {
        self.state.typing.subscribe()
    }

    /// The conversation record loaded on open.
    #[must_use]
    pub const fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// User the session sends as.
    #[must_use]
    pub const fn local_user(&self) -> Uuid {
        self.local_user
    }

    /// Whether push is feeding this session.
    #[must_use]
    pub fn has_push(&self) -> bool {
        self.tasks.len() > 1
    }

    /// Whether [`close`](Self::close) has started tearing the session down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for ConversationSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
        for task in &self.tasks {
            task.abort();
        }
        self.state.typing.cancel();
    }
}
