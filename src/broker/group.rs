use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use tracing::debug;

use crate::config::BrokerConfig;

/// A message leased to a consumer group.
#[derive(Clone, Debug)]
pub(crate) struct InFlight {
    pub payload: Vec<u8>,
    pub lease_deadline: SystemTime,
    pub retry_count: u32,
}

/// A message waiting for redelivery.
#[derive(Clone, Debug)]
pub(crate) struct RetryEntry {
    pub id: String,
    pub payload: Vec<u8>,
    pub retry_count: u32,
    pub next_retry_at: SystemTime,
}

/// A message that exhausted its retries.
#[derive(Clone, Debug)]
pub struct DeadLetter {
    pub id: String,
    pub payload: Vec<u8>,
    pub retry_count: u32,
    pub reason: String,
}

/// Per (stream, consumer group) delivery state: read position, in-flight
/// leases, retry queue, and dead letters. All mutation happens under the
/// group's own mutex — groups never serialize each other.
#[derive(Default)]
pub(crate) struct GroupState {
    pub position: usize,
    pub in_flight: HashMap<String, InFlight>,
    pub retry: Vec<RetryEntry>,
    pub dlq: Vec<DeadLetter>,
}

impl GroupState {
    /// Move lease-expired messages to the retry queue (reason "timeout") or
    /// the DLQ when retries are exhausted.
    pub fn expire_leases(&mut self, now: SystemTime, config: &BrokerConfig) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.lease_deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            let entry = self.in_flight.remove(&id).unwrap();
            let retry_count = entry.retry_count + 1;
            if retry_count > config.max_retries {
                self.dead_letter(id, entry.payload, retry_count, "timeout", config);
            } else {
                // The lease already consumed the wait; redeliverable now.
                self.retry.push(RetryEntry {
                    id,
                    payload: entry.payload,
                    retry_count,
                    next_retry_at: now,
                });
            }
        }
    }

    /// Take the first due retry entry, preferring the earliest deadline.
    pub fn pop_due_retry(&mut self, now: SystemTime) -> Option<RetryEntry> {
        let due = self
            .retry
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.next_retry_at <= now)
            .min_by_key(|(_, entry)| entry.next_retry_at)
            .map(|(idx, _)| idx)?;
        Some(self.retry.remove(due))
    }

    /// Requeue a nacked message with exponential backoff, or dead-letter it
    /// once retries are exhausted. `retry_count` is the count after this
    /// failure.
    pub fn schedule_retry(
        &mut self,
        id: String,
        payload: Vec<u8>,
        retry_count: u32,
        now: SystemTime,
        config: &BrokerConfig,
    ) {
        if retry_count > config.max_retries {
            self.dead_letter(id, payload, retry_count, "retries exhausted", config);
            return;
        }

        let backoff = config.retry_delay * 2u32.saturating_pow(retry_count - 1);
        self.retry.push(RetryEntry {
            id,
            payload,
            retry_count,
            next_retry_at: now + backoff,
        });
    }

    fn dead_letter(
        &mut self,
        id: String,
        payload: Vec<u8>,
        retry_count: u32,
        reason: &str,
        config: &BrokerConfig,
    ) {
        debug!(message_id = %id, retry_count, reason, dlq = config.enable_dlq, "message exhausted retries");
        if config.enable_dlq {
            self.dlq.push(DeadLetter {
                id,
                payload,
                retry_count,
                reason: reason.to_string(),
            });
        }
    }

    pub fn lease(
        &mut self,
        id: String,
        payload: Vec<u8>,
        retry_count: u32,
        now: SystemTime,
        timeout: Duration,
    ) {
        self.in_flight.insert(
            id,
            InFlight {
                payload,
                lease_deadline: now + timeout,
                retry_count,
            },
        );
    }
}
