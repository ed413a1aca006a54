//! Identity and ordering rules shared by every merge path.
//!
//! These functions are pure: the store, the push listener and the poll
//! loop all funnel through [`reconcile`], so ordering and deduplication
//! hold no matter which source delivered a row first.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use shared::models::Message;
use tracing::warn;

/// Returns the deduplicated, ascending-`created_at` union of `existing`
/// followed by `incoming`.
///
/// The first occurrence of an identity key wins, so entries already in
/// `existing` are never displaced by a later copy. The sort is stable:
/// equal timestamps keep arrival order. Messages without any identity
/// (no server id and no local id) cannot be deduplicated and are dropped.
#[must_use]
pub fn reconcile(existing: &[Message], incoming: &[Message]) -> Vec<Message> {
    let mut seen = HashSet::with_capacity(existing.len() + incoming.len());
    let mut merged: Vec<Message> = existing
        .iter()
        .chain(incoming)
        .filter(|message| match message.identity() {
            Some(key) => seen.insert(key),
            None => {
                warn!(
                    conversation_id = %message.conversation_id,
                    sender_id = %message.sender_id,
                    "dropping message without identity"
                );
                false
            }
        })
        .cloned()
        .collect();

    merged.sort_by_key(|message| message.created_at);
    merged
}

/// The newest `created_at` among server-confirmed messages.
///
/// Optimistic entries carry a client clock estimate, so they never move
/// the polling watermark.
#[must_use]
pub fn confirmed_watermark(messages: &[Message]) -> Option<DateTime<Utc>> {
    messages
        .iter()
        .filter(|message| message.is_confirmed())
        .map(|message| message.created_at)
        .max()
}

/// Whether `messages` is in ascending `created_at` order.
#[must_use]
pub fn is_ordered(messages: &[Message]) -> bool {
    messages
        .windows(2)
        .all(|pair| pair[0].created_at <= pair[1].created_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use shared::models::{MessageKey, MessageKind};
    use uuid::Uuid;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 8, 14, 30, 0).unwrap()
    }

    fn confirmed(id: i64, offset_secs: i64, content: &str) -> Message {
        Message {
            id,
            local_id: None,
            conversation_id: Uuid::nil(),
            sender_id: Uuid::nil(),
            content: content.to_string(),
            kind: MessageKind::Text,
            created_at: base() + Duration::seconds(offset_secs),
        }
    }

    fn optimistic(offset_secs: i64, content: &str) -> Message {
        Message::optimistic(
            Uuid::nil(),
            Uuid::nil(),
            content,
            MessageKind::Text,
            base() + Duration::seconds(offset_secs),
        )
    }

    fn keys(messages: &[Message]) -> Vec<MessageKey> {
        messages.iter().filter_map(Message::identity).collect()
    }

    #[test]
    fn union_is_sorted_by_created_at() {
        let existing = vec![confirmed(1, 0, "a"), confirmed(3, 20, "c")];
        let incoming = vec![confirmed(4, 30, "d"), confirmed(2, 10, "b")];

        let merged = reconcile(&existing, &incoming);

        assert_eq!(
            keys(&merged),
            vec![
                MessageKey::Server(1),
                MessageKey::Server(2),
                MessageKey::Server(3),
                MessageKey::Server(4)
            ]
        );
        assert!(is_ordered(&merged));
    }

    #[test]
    fn duplicate_server_ids_collapse_to_first_seen() {
        let existing = vec![confirmed(5, 0, "original")];
        let incoming = vec![confirmed(5, 0, "replayed"), confirmed(6, 5, "new")];

        let merged = reconcile(&existing, &incoming);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].content, "original");
        assert_eq!(merged[1].id, 6);
    }

    #[test]
    fn duplicates_inside_one_batch_collapse() {
        let incoming = vec![confirmed(9, 0, "x"), confirmed(9, 0, "x")];

        let merged = reconcile(&[], &incoming);

        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn equal_timestamps_keep_arrival_order() {
        let existing = vec![confirmed(10, 0, "first")];
        let incoming = vec![confirmed(8, 0, "second"), confirmed(7, 0, "third")];

        let merged = reconcile(&existing, &incoming);

        let contents: Vec<&str> = merged.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[test]
    fn optimistic_and_confirmed_keys_are_distinct() {
        let pending = optimistic(0, "hi");
        let merged = reconcile(&[pending.clone()], &[confirmed(42, 0, "hi")]);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].local_id, pending.local_id);
    }

    #[test]
    fn messages_without_identity_are_dropped() {
        let mut orphan = optimistic(0, "orphan");
        orphan.local_id = None;

        let merged = reconcile(&[], &[orphan, confirmed(1, 1, "kept")]);

        assert_eq!(keys(&merged), vec![MessageKey::Server(1)]);
    }

    #[test]
    fn reconcile_is_idempotent() {
        let existing = vec![confirmed(1, 0, "a"), optimistic(15, "pending")];
        let incoming = vec![confirmed(3, 30, "c"), confirmed(2, 10, "b"), confirmed(1, 0, "a")];

        let once = reconcile(&existing, &incoming);
        let twice = reconcile(&once, &incoming);

        assert_eq!(once, twice);
    }

    #[test]
    fn ordering_holds_for_every_interleaving() {
        let batches = vec![
            vec![confirmed(3, 30, "c")],
            vec![optimistic(25, "pending"), confirmed(1, 0, "a")],
            vec![confirmed(2, 10, "b"), confirmed(3, 30, "c")],
            vec![confirmed(4, 5, "late-arriving early row")],
        ];

        // Every rotation of the batch order must converge on the same set.
        let mut results = Vec::new();
        for start in 0..batches.len() {
            let mut store: Vec<Message> = Vec::new();
            for offset in 0..batches.len() {
                let batch = &batches[(start + offset) % batches.len()];
                store = reconcile(&store, batch);
                assert!(is_ordered(&store));
            }
            let mut ids = keys(&store);
            ids.sort_by_key(ToString::to_string);
            results.push(ids);
        }

        assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn watermark_ignores_optimistic_entries() {
        let messages = vec![confirmed(1, 0, "a"), optimistic(60, "pending")];

        assert_eq!(confirmed_watermark(&messages), Some(base()));
        assert_eq!(confirmed_watermark(&[optimistic(0, "only")]), None);
        assert_eq!(confirmed_watermark(&[]), None);
    }
}
