//! Push listener: drains a conversation subscription into the session.
//!
//! Push is best-effort. When the subscription ends the listener stops and
//! the poll loop keeps the store converging.

use std::sync::Arc;

use metrics::counter;
use shared::models::ChannelEvent;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::{
    backend::{RealtimeEvent, Subscription},
    session::SessionState,
};

/// Drains a conversation subscription into the session until shutdown or
/// until the subscription ends. The subscription is always released.
pub(crate) async fn run(
    mut subscription: Box<dyn Subscription>,
    state: Arc<SessionState>,
    local_user: Uuid,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            event = subscription.next_event() => event,
        };

        match event {
            Some(RealtimeEvent::Inserted(message)) => {
                // Own messages arrive through the send confirmation.
                if message.sender_id == local_user {
                    trace!(id = message.id, "ignoring own insert");
                    continue;
                }
                let id = message.id;
                let added = state.merge(vec![message]);
                counter!("matchit_push_events_total", "event" => "insert").increment(1);
                trace!(id, added, "push insert merged");
            }
            Some(RealtimeEvent::Broadcast(event)) => {
                if event.user_id() == local_user {
                    continue;
                }
                match event {
                    ChannelEvent::Typing(_) => {
                        counter!("matchit_push_events_total", "event" => "typing").increment(1);
                        state.typing.signal();
                    }
                }
            }
            None => {
                warn!("push subscription ended; continuing with polling only");
                break;
            }
        }
    }

    subscription.close();
    debug!("push listener stopped");
}
