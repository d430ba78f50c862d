use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Lifecycle of an outbox row.
///
/// pending → processing → {published | failed}; failed → processing while
/// retries remain, or back to pending via an explicit reset; published and
/// abandoned are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboxStatus {
    Pending,
    Processing,
    Published,
    Failed,
    Abandoned,
}

/// A durable pending publication, staged in the same transaction as the
/// domain write and relayed to the broker by a background worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: u64,
    /// Aggregate or message the row originated from.
    pub source_id: String,
    /// Destination stream on the broker.
    pub stream: String,
    pub message_type: String,
    pub data: Vec<u8>,
    pub metadata: Option<serde_json::Value>,
    pub status: OutboxStatus,
    /// Higher relays first; ties break on enqueue order.
    pub priority: i32,
    pub retry_count: u32,
    pub max_retries: u32,
    pub locked_by: Option<String>,
    pub locked_until: Option<SystemTime>,
    pub next_retry_at: Option<SystemTime>,
    /// Failure diagnosis lives on the row: error text plus timestamp, so no
    /// external log correlation is needed.
    pub last_error: Option<String>,
    pub created_at: SystemTime,
    pub published_at: Option<SystemTime>,
    pub failed_at: Option<SystemTime>,
}

impl OutboxMessage {
    pub fn new(
        id: u64,
        source_id: impl Into<String>,
        stream: impl Into<String>,
        message_type: impl Into<String>,
        data: Vec<u8>,
        max_retries: u32,
        now: SystemTime,
    ) -> Self {
        OutboxMessage {
            id,
            source_id: source_id.into(),
            stream: stream.into(),
            message_type: message_type.into(),
            data,
            metadata: None,
            status: OutboxStatus::Pending,
            priority: 0,
            retry_count: 0,
            max_retries,
            locked_by: None,
            locked_until: None,
            next_retry_at: None,
            last_error: None,
            created_at: now,
            published_at: None,
            failed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, OutboxStatus::Published | OutboxStatus::Abandoned)
    }

    /// Whether the row is eligible for processing at `now`: pending or
    /// failed, unlocked, retries remaining, and past any scheduled backoff.
    ///
    /// A `Processing` row whose lease has expired is due again — the worker
    /// that claimed it crashed without reporting back, and as on the broker
    /// side, crash recovery is simply lease expiry.
    pub fn is_due(&self, now: SystemTime) -> bool {
        if !matches!(
            self.status,
            OutboxStatus::Pending | OutboxStatus::Failed | OutboxStatus::Processing
        ) {
            return false;
        }
        if self.locked_until.map(|until| until > now).unwrap_or(false) {
            return false;
        }
        if self.retry_count >= self.max_retries {
            return false;
        }
        self.next_retry_at.map(|at| at <= now).unwrap_or(true)
    }

    /// Acquire the processing lease. Returns false (and changes nothing)
    /// when the row is not due.
    pub fn start_processing(
        &mut self,
        worker_id: &str,
        lease: Duration,
        now: SystemTime,
    ) -> bool {
        if !self.is_due(now) {
            return false;
        }
        self.status = OutboxStatus::Processing;
        self.locked_by = Some(worker_id.to_string());
        self.locked_until = Some(now + lease);
        true
    }

    /// Terminal success; clears the lease.
    pub fn mark_published(&mut self, now: SystemTime) {
        self.status = OutboxStatus::Published;
        self.published_at = Some(now);
        self.clear_lease();
        self.last_error = None;
        self.next_retry_at = None;
    }

    /// Record a failure. Schedules `next_retry_at = now + base_delay ·
    /// 2^retry_count` while retries remain; otherwise the row is abandoned
    /// with the reason recorded.
    pub fn mark_failed(&mut self, error: &str, base_delay: Duration, now: SystemTime) {
        self.retry_count += 1;
        self.last_error = Some(error.to_string());
        self.failed_at = Some(now);
        self.clear_lease();

        if self.retry_count >= self.max_retries {
            self.status = OutboxStatus::Abandoned;
            self.next_retry_at = None;
        } else {
            self.status = OutboxStatus::Failed;
            self.next_retry_at = Some(now + base_delay * 2u32.saturating_pow(self.retry_count));
        }
    }

    /// Explicitly return a failed row to pending, clearing its backoff.
    /// The retry budget is restored; this is an operator action, not a
    /// retry path.
    pub fn reset(&mut self) -> bool {
        if self.status != OutboxStatus::Failed {
            return false;
        }
        self.status = OutboxStatus::Pending;
        self.retry_count = 0;
        self.next_retry_at = None;
        true
    }

    /// Reprioritize a waiting row. No-op once processing or terminal.
    pub fn update_priority(&mut self, priority: i32) -> bool {
        if !matches!(self.status, OutboxStatus::Pending | OutboxStatus::Failed) {
            return false;
        }
        self.priority = priority;
        true
    }

    fn clear_lease(&mut self) {
        self.locked_by = None;
        self.locked_until = None;
    }
}
