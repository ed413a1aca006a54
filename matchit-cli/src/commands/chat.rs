use std::{collections::HashSet, sync::Arc};

use anyhow::{Context, Result, bail};
use clap::Args;
use realtime::{
    ChatError, ConversationSession, MessageRepository, RealtimeChannel, RealtimeSocket,
    RestBackend, SendOutcome, SessionOptions,
};
use shared::{
    config::ClientConfig,
    models::{Message, MessageId},
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::watch,
    task::JoinHandle,
};
use tracing::debug;
use uuid::Uuid;

use super::{
    chats::{print_listing, require_user},
    render::render_message,
};

#[derive(Args, Debug)]
#[command(about = "Open a conversation, print it and follow new messages")]
pub struct ChatArgs {
    /// Conversation identifier to open
    #[arg(long, alias = "conv")]
    pub conversation: Uuid,

    /// Print the transcript and exit instead of following
    #[arg(long)]
    pub once: bool,
}

pub async fn handle_chat(args: &ChatArgs, config: &ClientConfig) -> Result<()> {
    let user_id = require_user(config)?;
    let backend: Arc<dyn MessageRepository> =
        Arc::new(RestBackend::from_config(config).context("invalid backend configuration")?);
    // A realtime service that refuses the join leaves the session polling.
    let channel: Arc<dyn RealtimeChannel> =
        Arc::new(RealtimeSocket::from_config(config).context("invalid realtime configuration")?);

    let session = match ConversationSession::open(
        args.conversation,
        user_id,
        Arc::clone(&backend),
        Some(channel),
        SessionOptions::from(&config.realtime),
    )
    .await
    {
        Ok(session) => session,
        Err(ChatError::ConversationNotFound(id)) => {
            eprintln!("Conversation {id} not found. Your conversations:");
            print_listing(backend.as_ref(), user_id).await?;
            bail!("conversation {id} not found");
        }
        Err(err) => return Err(err).context("failed to open conversation"),
    };

    let conversation = session.conversation();
    println!(
        "Conversation {} [{}]",
        conversation.id,
        conversation.status.label()
    );

    let mut printed = HashSet::new();
    print_new(&session.messages(), user_id, &mut printed);
    if args.once {
        session.close().await;
        return Ok(());
    }

    println!("Type a message and press Enter to send. Ctrl+C or Ctrl+D to leave.");
    let printer = spawn_printer(session.watch(), session.typing_updates(), user_id, printed);
    let result = read_and_send(&session).await;

    printer.abort();
    session.close().await;
    result
}

async fn read_and_send(session: &ConversationSession) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            line = lines.next_line() => line.context("failed to read stdin")?,
        };
        let Some(line) = line else {
            return Ok(());
        };

        session.notify_typing().await;
        match session.send(&line).await {
            SendOutcome::Confirmed(message) => debug!(id = message.id, "message delivered"),
            SendOutcome::RolledBack => eprintln!("! message not sent: {}", line.trim()),
            SendOutcome::Skipped => {}
        }
    }
}

/// Prints every confirmed message not printed yet, in store order.
fn print_new(messages: &[Message], local_user: Uuid, printed: &mut HashSet<MessageId>) {
    for message in messages.iter().filter(|m| m.is_confirmed()) {
        if printed.insert(message.id) {
            println!("{}", render_message(message, local_user));
        }
    }
}

fn spawn_printer(
    mut snapshots: watch::Receiver<Vec<Message>>,
    mut typing: watch::Receiver<bool>,
    local_user: Uuid,
    mut printed: HashSet<MessageId>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let messages = snapshots.borrow_and_update().clone();
                    print_new(&messages, local_user, &mut printed);
                }
                changed = typing.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if *typing.borrow_and_update() {
                        println!("(typing...)");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shared::models::MessageKind;

    fn row(id: MessageId) -> Message {
        Message {
            id,
            local_id: None,
            conversation_id: Uuid::nil(),
            sender_id: Uuid::nil(),
            content: format!("message {id}"),
            kind: MessageKind::Text,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn print_new_skips_printed_and_pending_messages() {
        let mut printed = HashSet::from([1]);
        let pending = Message::optimistic(
            Uuid::nil(),
            Uuid::nil(),
            "pending",
            MessageKind::Text,
            Utc::now(),
        );

        print_new(&[row(1), pending, row(2)], Uuid::nil(), &mut printed);

        assert_eq!(printed, HashSet::from([1, 2]));
    }
}
