//! Plain-text rendering of messages and chat listings.

use chrono::{DateTime, Local, Utc};
use shared::models::{ConversationSummary, Message, MessageKind};
use uuid::Uuid;

fn clock(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M").to_string()
}

/// One transcript line for `message` as seen by `local_user`.
pub fn render_message(message: &Message, local_user: Uuid) -> String {
    let author = if message.sender_id == local_user {
        "you"
    } else {
        "them"
    };
    let pending = if message.is_confirmed() { "" } else { " (sending)" };

    match message.kind {
        MessageKind::Text => format!(
            "[{}] {author}: {}{pending}",
            clock(message.created_at),
            message.content
        ),
        MessageKind::Image => format!(
            "[{}] {author} sent an image: {}{pending}",
            clock(message.created_at),
            message.content
        ),
        MessageKind::System => format!("-- {} --", message.content),
    }
}

/// One line of the conversation listing.
pub fn render_summary(summary: &ConversationSummary) -> String {
    let who = summary
        .other_display_name
        .clone()
        .unwrap_or_else(|| summary.other_user_id.to_string());
    let last = match (&summary.last_message, summary.last_at) {
        (Some(text), Some(at)) => format!("{}  {text}", clock(at)),
        (Some(text), None) => text.clone(),
        _ => "no messages yet".to_string(),
    };

    format!(
        "{}  {} [{}]  with {who}: {last}",
        summary.id,
        summary.listing_title,
        summary.status.label()
    )
}
