use std::sync::Arc;

use tracing::warn;

use crate::clock::{system_clock, Clock};
use crate::config::OutboxConfig;
use crate::error::{PublishError, StoreError};
use crate::outbox::store::OutboxStore;

/// Destination the relay publishes to. Implemented by `Broker`; tests use
/// buffer-backed fakes.
pub trait RelayPublisher: Send + Sync {
    fn publish(&self, stream: &str, payload: &[u8]) -> Result<String, PublishError>;
}

/// Result of one relay drain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainResult {
    pub claimed: usize,
    pub published: usize,
    /// Failures with retries remaining (backoff scheduled).
    pub retried: usize,
    /// Failures that exhausted their retry budget (terminal).
    pub abandoned: usize,
}

/// Drains due outbox rows to a publisher under a worker lease.
pub struct OutboxRelay<P> {
    publisher: P,
    worker_id: String,
    config: OutboxConfig,
    clock: Arc<dyn Clock>,
}

impl<P> OutboxRelay<P> {
    pub fn new(publisher: P) -> Self {
        OutboxRelay {
            publisher,
            worker_id: format!("relay-{}", std::process::id()),
            config: OutboxConfig::default(),
            clock: system_clock(),
        }
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_config(mut self, config: OutboxConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }
}

impl<P: RelayPublisher> OutboxRelay<P> {
    /// Claim one batch of due rows and publish them. Each row ends the
    /// drain published, failed with backoff, or abandoned.
    pub fn drain<S: OutboxStore>(&self, store: &S) -> Result<DrainResult, StoreError> {
        let now = self.clock.now();
        let claimed = store.claim(
            &self.worker_id,
            self.config.batch_size,
            self.config.lease,
            now,
        )?;

        let mut result = DrainResult {
            claimed: claimed.len(),
            ..Default::default()
        };
        let mut settle_err = None;

        for mut row in claimed {
            match self.publisher.publish(&row.stream, &row.data) {
                Ok(_) => {
                    row.mark_published(self.clock.now());
                    result.published += 1;
                }
                Err(err) => {
                    row.mark_failed(&err.to_string(), self.config.base_delay, self.clock.now());
                    if row.is_terminal() {
                        warn!(
                            outbox_id = row.id,
                            stream = %row.stream,
                            error = %err,
                            "outbox row abandoned after exhausting retries"
                        );
                        result.abandoned += 1;
                    } else {
                        result.retried += 1;
                    }
                }
            }
            // Every claimed row gets a settle attempt; a row the store could
            // not settle stays leased and becomes claimable again once its
            // lease expires.
            if let Err(err) = store.update(&row) {
                warn!(outbox_id = row.id, error = %err, "failed to settle outbox row");
                settle_err = Some(err);
            }
        }

        match settle_err {
            Some(err) => Err(err),
            None => Ok(result),
        }
    }
}
