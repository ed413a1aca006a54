//! Peer typing indicator.

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{sync::watch, task::JoinHandle};
use tracing::trace;

/// "Other participant is typing" flag with a self-clearing countdown.
///
/// Each [`signal`](Self::signal) raises the flag and restarts the countdown,
/// so a steady stream of keystrokes keeps it raised. The flag drops once a
/// full countdown passes without a new signal.
#[derive(Debug)]
pub struct TypingIndicator {
    countdown: Duration,
    state: Arc<watch::Sender<bool>>,
    generation: Arc<AtomicU64>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl TypingIndicator {
    /// Inactive indicator that clears `countdown` after the last signal.
    #[must_use]
    pub fn new(countdown: Duration) -> Self {
        let (state, _) = watch::channel(false);
        Self {
            countdown,
            state: Arc::new(state),
            generation: Arc::new(AtomicU64::new(0)),
            timer: Mutex::new(None),
        }
    }

    /// Raises the flag and restarts the countdown. Must run inside a tokio
    /// runtime.
    pub fn signal(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_if_modified(|active| !std::mem::replace(active, true));

        let state = Arc::clone(&self.state);
        let current = Arc::clone(&self.generation);
        let countdown = self.countdown;
        let task = tokio::spawn(async move {
            tokio::time::sleep(countdown).await;
            // A newer signal owns the flag now.
            if current.load(Ordering::SeqCst) == generation {
                state.send_if_modified(|active| std::mem::replace(active, false));
                trace!("typing indicator expired");
            }
        });

        let previous = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Whether a signal arrived within the countdown.
    #[must_use]
    pub fn is_active(&self) -> bool {
        *self.state.borrow()
    }

    /// Receiver that observes every raise and clear.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Stops any pending countdown and lowers the flag.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(timer) = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            timer.abort();
        }
        self.state
            .send_if_modified(|active| std::mem::replace(active, false));
    }
}

impl Drop for TypingIndicator {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, sleep};

    const COUNTDOWN: Duration = Duration::from_millis(1800);

    async fn settle() {
        // Let spawned countdown tasks observe the advanced clock.
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn starts_inactive() {
        let indicator = TypingIndicator::new(COUNTDOWN);
        assert!(!indicator.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn signal_expires_after_countdown() {
        let indicator = TypingIndicator::new(COUNTDOWN);

        indicator.signal();
        assert!(indicator.is_active());

        advance(Duration::from_millis(1000)).await;
        settle().await;
        assert!(indicator.is_active());

        advance(Duration::from_millis(1000)).await;
        settle().await;
        assert!(!indicator.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_signals_restart_the_countdown() {
        let indicator = TypingIndicator::new(COUNTDOWN);

        indicator.signal();
        advance(Duration::from_millis(1500)).await;
        settle().await;
        indicator.signal();
        advance(Duration::from_millis(1500)).await;
        settle().await;

        // 3.0s after the first signal, 1.5s after the second.
        assert!(indicator.is_active());

        advance(Duration::from_millis(400)).await;
        settle().await;
        assert!(!indicator.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_raise_and_clear() {
        let indicator = TypingIndicator::new(COUNTDOWN);
        let mut updates = indicator.subscribe();

        indicator.signal();
        updates.changed().await.unwrap();
        assert!(*updates.borrow_and_update());

        sleep(Duration::from_millis(2000)).await;
        updates.changed().await.unwrap();
        assert!(!*updates.borrow_and_update());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_lowers_flag_and_stops_timer() {
        let indicator = TypingIndicator::new(COUNTDOWN);
        indicator.signal();

        indicator.cancel();
        assert!(!indicator.is_active());

        advance(Duration::from_millis(2000)).await;
        settle().await;
        assert!(!indicator.is_active());
    }
}
