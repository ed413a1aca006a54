//! Per-conversation message list and polling cursor.

use chrono::{DateTime, Utc};
use shared::models::{Message, MessageKey};
use tracing::{trace, warn};
use uuid::Uuid;

use crate::policy;

/// Ordered message list of exactly one conversation.
///
/// Every mutation goes through [`policy::reconcile`], so the list is always
/// deduplicated by identity and ascending by `created_at`. The store also
/// owns the polling cursor: the newest `created_at` among confirmed
/// entries, which never moves backwards.
#[derive(Debug, Clone)]
pub struct MessageStore {
    conversation_id: Uuid,
    messages: Vec<Message>,
    cursor: Option<DateTime<Utc>>,
}

impl MessageStore {
    /// Empty store for `conversation_id` with no cursor.
    #[must_use]
    pub const fn new(conversation_id: Uuid) -> Self {
        Self {
            conversation_id,
            messages: Vec::new(),
            cursor: None,
        }
    }

    /// Conversation whose rows this store accepts.
    #[must_use]
    pub const fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    /// Merges `incoming` into the store and returns how many entries were
    /// added. Merging the same rows again adds nothing and does not reorder.
    /// Rows addressed to another conversation are discarded.
    pub fn merge<I>(&mut self, incoming: I) -> usize
    where
        I: IntoIterator<Item = Message>,
    {
        let incoming: Vec<Message> = incoming
            .into_iter()
            .filter(|message| {
                let belongs = message.conversation_id == self.conversation_id;
                if !belongs {
                    warn!(
                        expected = %self.conversation_id,
                        actual = %message.conversation_id,
                        "discarding message from another conversation"
                    );
                }
                belongs
            })
            .collect();
        if incoming.is_empty() {
            return 0;
        }

        let before = self.messages.len();
        self.messages = policy::reconcile(&self.messages, &incoming);
        self.advance_cursor();

        let added = self.messages.len() - before;
        trace!(
            conversation_id = %self.conversation_id,
            added,
            total = self.messages.len(),
            "merged messages"
        );
        added
    }

    /// Removes the optimistic entry with `local_id`, returning it.
    pub fn remove_by_local_id(&mut self, local_id: Uuid) -> Option<Message> {
        let index = self
            .messages
            .iter()
            .position(|message| message.local_id == Some(local_id) && !message.is_confirmed())?;
        Some(self.messages.remove(index))
    }

    /// Replaces the optimistic entry `local_id` with the server's record in
    /// one step, so observers never see both or neither.
    pub fn confirm(&mut self, local_id: Uuid, record: Message) -> usize {
        self.remove_by_local_id(local_id);
        self.merge([record])
    }

    /// The list in display order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Watermark for "rows newer than what is known". `None` until the
    /// first confirmed message arrives.
    #[must_use]
    pub const fn cursor(&self) -> Option<DateTime<Utc>> {
        self.cursor
    }

    /// Whether an entry with identity `key` is present.
    #[must_use]
    pub fn contains(&self, key: MessageKey) -> bool {
        self.messages
            .iter()
            .any(|message| message.identity() == Some(key))
    }

    /// Number of entries, provisional ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn advance_cursor(&mut self) {
        if let Some(candidate) = policy::confirmed_watermark(&self.messages)
            && self.cursor.is_none_or(|current| candidate > current)
        {
            self.cursor = Some(candidate);
        }
    }
}
