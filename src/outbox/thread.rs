//! Threaded outbox relay for background publication.

use std::sync::mpsc::{channel, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::warn;

use crate::outbox::relay::{OutboxRelay, RelayPublisher};
use crate::outbox::store::OutboxStore;

/// Statistics from a stopped relay thread.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub published: usize,
    pub retried: usize,
    pub abandoned: usize,
    pub polls: usize,
}

/// A background thread that repeatedly drains an outbox relay.
///
/// ## Example
///
/// ```ignore
/// let store = InMemoryOutboxStore::new();
/// let relay = OutboxRelay::new(broker.clone());
/// let worker = OutboxRelayThread::spawn(store.clone(), relay, Duration::from_millis(50));
///
/// // ... stage rows ...
///
/// let stats = worker.stop();
/// ```
pub struct OutboxRelayThread {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<RelayStats>>,
}

impl OutboxRelayThread {
    /// Spawn the relay loop. The store must be `Clone + Send + 'static`;
    /// for `InMemoryOutboxStore`, cloning creates another handle to the
    /// same storage.
    pub fn spawn<S, P>(store: S, relay: OutboxRelay<P>, poll_interval: Duration) -> Self
    where
        S: OutboxStore + Clone + 'static,
        P: RelayPublisher + 'static,
    {
        let (stop_tx, stop_rx) = channel();

        let handle = thread::spawn(move || {
            let mut stats = RelayStats::default();

            loop {
                match stop_rx.try_recv() {
                    Ok(()) | Err(TryRecvError::Disconnected) => break,
                    Err(TryRecvError::Empty) => {}
                }

                stats.polls += 1;

                match relay.drain(&store) {
                    Ok(result) => {
                        stats.published += result.published;
                        stats.retried += result.retried;
                        stats.abandoned += result.abandoned;
                    }
                    Err(err) => {
                        warn!(error = %err, "outbox drain failed; continuing");
                    }
                }

                thread::sleep(poll_interval);
            }

            // Final drain so rows staged just before the stop signal are
            // not stranded until the next process start.
            if let Ok(result) = relay.drain(&store) {
                stats.published += result.published;
                stats.retried += result.retried;
                stats.abandoned += result.abandoned;
            }

            stats
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Signal the worker to stop and wait for it to finish.
    pub fn stop(mut self) -> RelayStats {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap_or_default()
        } else {
            RelayStats::default()
        }
    }

    /// Signal the worker to stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl Drop for OutboxRelayThread {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        // Don't join on drop - let the thread finish naturally
    }
}
