//! Configuration surfaces for the delivery components.
//!
//! Plain structs with `Default` and `with_*` builders. Loading these from
//! files or the environment is the caller's concern.

use std::time::Duration;

/// Delivery tuning for the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Lease duration for an in-flight message before it becomes
    /// redeliverable.
    pub message_timeout: Duration,
    /// Base delay for retry backoff (doubled per attempt).
    pub retry_delay: Duration,
    /// Retries allowed before a message is routed to the DLQ.
    pub max_retries: u32,
    /// When false, exhausted messages are discarded instead of dead-lettered.
    pub enable_dlq: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            message_timeout: Duration::from_secs(30),
            retry_delay: Duration::from_millis(500),
            max_retries: 3,
            enable_dlq: true,
        }
    }
}

impl BrokerConfig {
    pub fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_dlq(mut self, enabled: bool) -> Self {
        self.enable_dlq = enabled;
        self
    }
}

/// Tuning for the outbox relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxConfig {
    /// Base delay before a failed row becomes due again (doubled per attempt).
    pub base_delay: Duration,
    /// Attempts allowed before a row is abandoned.
    pub max_retries: u32,
    /// Lease duration while a worker is processing a row.
    pub lease: Duration,
    /// Max rows claimed per drain.
    pub batch_size: usize,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        OutboxConfig {
            base_delay: Duration::from_secs(1),
            max_retries: 3,
            lease: Duration::from_secs(60),
            batch_size: 10,
        }
    }
}

impl OutboxConfig {
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }
}

/// Tuning for subscription dispatch loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Max messages fetched per tick.
    pub messages_per_tick: usize,
    /// Sleep between empty polls.
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            messages_per_tick: 100,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl EngineConfig {
    pub fn with_messages_per_tick(mut self, count: usize) -> Self {
        self.messages_per_tick = count;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// TTLs for idempotency records.
///
/// Success records live long so duplicates keep deduplicating; error records
/// live short so an immediate retry with the same key is not falsely treated
/// as already succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdempotencyConfig {
    pub ttl: Duration,
    pub error_ttl: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        IdempotencyConfig {
            ttl: Duration::from_secs(24 * 60 * 60),
            error_ttl: Duration::from_secs(60),
        }
    }
}

impl IdempotencyConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_error_ttl(mut self, ttl: Duration) -> Self {
        self.error_ttl = ttl;
        self
    }
}
