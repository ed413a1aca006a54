//! Polling backstop. Converges the store when push is slow, paused or
//! missing altogether.

use std::{sync::Arc, time::Duration};

use metrics::counter;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{backend::MessageRepository, session::SessionState};

/// Fetches rows newer than the session cursor every `period` and merges
/// them. Failed polls are skipped; the unchanged cursor retries them.
pub(crate) async fn run(
    repository: Arc<dyn MessageRepository>,
    state: Arc<SessionState>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let conversation_id = state.conversation_id();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let since = state.cursor();
        let result = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            result = repository.query_messages(conversation_id, since) => result,
        };

        match result {
            Ok(rows) => {
                let fetched = rows.len();
                let added = state.merge(rows);
                if added > 0 {
                    counter!("matchit_poll_merged_total").increment(added as u64);
                    debug!(fetched, added, "poll merged rows");
                }
            }
            Err(err) => {
                counter!("matchit_poll_failures_total").increment(1);
                debug!(error = %err, "poll failed; retrying on next tick");
            }
        }
    }

    debug!(%conversation_id, "poll loop stopped");
}
