//! Threaded subscription runner.

use std::sync::mpsc::{channel, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

use tracing::warn;

use crate::engine::source::Source;
use crate::engine::subscription::{Subscription, TickOutcome};

/// Statistics from a stopped subscription thread.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionStats {
    pub handled: usize,
    pub deduplicated: usize,
    pub failed: usize,
    pub polls: usize,
}

/// A background thread driving one subscription's tick loop.
///
/// Shutdown is cooperative: the stop signal is checked between ticks, and
/// one final tick drains messages fetched just before the signal, so an
/// in-flight batch is settled rather than dropped.
pub struct SubscriptionThread {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<SubscriptionStats>>,
}

impl SubscriptionThread {
    pub fn spawn<S>(mut subscription: Subscription<S>) -> Self
    where
        S: Source + 'static,
    {
        let (stop_tx, stop_rx) = channel();

        let handle = thread::spawn(move || {
            let mut stats = SubscriptionStats::default();
            let poll_interval = subscription.config().poll_interval;

            loop {
                match stop_rx.try_recv() {
                    Ok(()) | Err(TryRecvError::Disconnected) => break,
                    Err(TryRecvError::Empty) => {}
                }

                stats.polls += 1;
                match subscription.tick() {
                    Ok(outcome) => {
                        absorb(&mut stats, outcome);
                        if outcome.fetched == 0 {
                            thread::sleep(poll_interval);
                        }
                    }
                    Err(err) => {
                        warn!(
                            subscription = %subscription.name(),
                            error = %err,
                            "tick failed; continuing"
                        );
                        thread::sleep(poll_interval);
                    }
                }
            }

            // Drain once so nothing fetched right before the stop signal is
            // stranded, then stop.
            if let Ok(outcome) = subscription.tick() {
                absorb(&mut stats, outcome);
            }
            subscription.stop();

            stats
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Signal the thread to stop and wait for it to finish.
    pub fn stop(mut self) -> SubscriptionStats {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap_or_default()
        } else {
            SubscriptionStats::default()
        }
    }

    /// Signal the thread to stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl Drop for SubscriptionThread {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        // Don't join on drop - let the thread finish naturally
    }
}

fn absorb(stats: &mut SubscriptionStats, outcome: TickOutcome) {
    stats.handled += outcome.handled;
    stats.deduplicated += outcome.deduplicated;
    stats.failed += outcome.failed;
}
