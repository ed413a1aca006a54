//! Scripted buyer/seller exchange against the in-memory backend.
//!
//! Walks through push delivery, a typing signal, a failed send that rolls
//! back, and a message that only arrives through polling.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use clap::Args;
use realtime::{
    ConversationSession, MemoryHub, MessageRepository, RealtimeChannel, SendOutcome,
    SessionOptions,
};
use shared::{config::ClientConfig, models::ConversationStatus};
use uuid::Uuid;

use super::render::{render_message, render_summary};

#[derive(Args, Debug)]
#[command(about = "Run two in-process participants against an in-memory backend")]
pub struct DemoArgs {
    /// Title of the listing the participants negotiate about
    #[arg(long, default_value = "ThinkPad T480")]
    pub listing: String,

    /// Poll interval in milliseconds, overriding the configuration
    #[arg(long)]
    pub poll_ms: Option<u64>,
}

async fn open(
    hub: &MemoryHub,
    conversation_id: Uuid,
    user_id: Uuid,
    options: SessionOptions,
) -> Result<ConversationSession> {
    let channel: Arc<dyn RealtimeChannel> = Arc::new(hub.clone());
    ConversationSession::open(
        conversation_id,
        user_id,
        Arc::new(hub.clone()),
        Some(channel),
        options,
    )
    .await
    .context("failed to open demo conversation")
}

async fn wait_for_count(session: &ConversationSession, count: usize, within: Duration) -> Result<()> {
    let mut snapshots = session.watch();
    tokio::time::timeout(
        within,
        snapshots.wait_for(|messages| {
            messages.iter().filter(|m| m.is_confirmed()).count() >= count
        }),
    )
    .await
    .context("timed out waiting for messages")?
    .context("session closed")?;
    Ok(())
}

fn report(label: &str, outcome: &SendOutcome) {
    match outcome {
        SendOutcome::Confirmed(message) => println!("{label}: delivered as #{}", message.id),
        SendOutcome::RolledBack => println!("{label}: failed, removed from the transcript"),
        SendOutcome::Skipped => println!("{label}: skipped"),
    }
}

pub async fn run_demo(args: &DemoArgs, config: &ClientConfig) -> Result<()> {
    let mut options = SessionOptions::from(&config.realtime);
    if let Some(ms) = args.poll_ms {
        if ms == 0 {
            bail!("--poll-ms must be greater than 0");
        }
        options.poll_interval = Duration::from_millis(ms);
    }
    let patience = options.poll_interval * 3;

    let hub = MemoryHub::new();
    let buyer_id = Uuid::new_v4();
    let seller_id = Uuid::new_v4();
    hub.register_user(buyer_id, "Bruno (buyer)");
    hub.register_user(seller_id, "Sofia (seller)");
    let conversation = hub.create_conversation(args.listing.clone(), buyer_id, seller_id);
    println!("Listing: {} (conversation {})", args.listing, conversation.id);

    let buyer = open(&hub, conversation.id, buyer_id, options).await?;
    let seller = open(&hub, conversation.id, seller_id, options).await?;

    buyer.notify_typing().await;
    let mut seller_typing = seller.typing_updates();
    tokio::time::timeout(patience, seller_typing.wait_for(|typing| *typing))
        .await
        .context("typing signal never arrived")?
        .context("session closed")?;
    println!("seller sees: buyer is typing...");

    let greeting = format!("Hi! Is the {} still available?", args.listing);
    report("buyer", &buyer.send(&greeting).await);
    wait_for_count(&seller, 1, patience).await?;

    report("seller", &seller.send("Yes it is, barely used.").await);
    wait_for_count(&buyer, 2, patience).await?;

    hub.fail_next_inserts(1);
    report("buyer", &buyer.send("Would you take 200?").await);
    report("buyer (retry)", &buyer.send("Would you take 200?").await);
    wait_for_count(&seller, 3, patience).await?;

    println!("push paused; the next reply arrives by polling");
    hub.set_push_paused(true);
    report("seller", &seller.send("220 and it's yours.").await);
    wait_for_count(&buyer, 4, patience).await?;
    hub.set_push_paused(false);

    hub.set_status(conversation.id, ConversationStatus::Reserved);

    println!();
    println!("Buyer's transcript:");
    for message in buyer.messages() {
        println!("  {}", render_message(&message, buyer_id));
    }
    println!();
    println!("Buyer's chats:");
    for summary in hub.list_conversations(buyer_id).await? {
        println!("  {}", render_summary(&summary));
    }

    buyer.close().await;
    seller.close().await;
    println!();
    println!("Open subscriptions after close: {}", hub.live_subscriptions());
    Ok(())
}
