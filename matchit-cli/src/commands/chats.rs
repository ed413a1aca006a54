use anyhow::{Context, Result};
use realtime::{MessageRepository, RestBackend};
use shared::config::ClientConfig;
use uuid::Uuid;

use super::render::render_summary;

/// The signed-in user, required by every command talking to the backend.
pub fn require_user(config: &ClientConfig) -> Result<Uuid> {
    config
        .user_id
        .context("no user id configured; set MATCHIT_USER_ID or pass --user")
}

/// Prints the conversation listing of `user_id`.
pub async fn print_listing(repository: &dyn MessageRepository, user_id: Uuid) -> Result<()> {
    let chats = repository
        .list_conversations(user_id)
        .await
        .context("failed to fetch conversations")?;

    if chats.is_empty() {
        println!("No conversations yet.");
    }
    for summary in &chats {
        println!("{}", render_summary(summary));
    }
    Ok(())
}

pub async fn handle_chats(config: &ClientConfig) -> Result<()> {
    let user_id = require_user(config)?;
    let backend = RestBackend::from_config(config).context("invalid backend configuration")?;
    print_listing(&backend, user_id).await
}
