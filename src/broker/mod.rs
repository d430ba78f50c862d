//! At-least-once in-process message broker with consumer-group semantics.
//!
//! Correctness is a leasing protocol: delivery hands out a time-bound
//! exclusive claim, so crash recovery is simply "lease expires, message is
//! redeliverable" — there is no separate recovery procedure. Duplicate
//! suppression belongs to the application layer (see the idempotency
//! store); the broker only promises that every message is delivered at
//! least once per consumer group.

mod group;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::clock::{system_clock, Clock};
use crate::config::BrokerConfig;
use crate::error::PublishError;
use crate::message::new_message_id;
use crate::outbox::RelayPublisher;

pub use group::DeadLetter;
use group::GroupState;

/// One message delivered to a consumer group, leased until acked, nacked,
/// or timed out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerDelivery {
    pub id: String,
    pub payload: Vec<u8>,
    /// Times this message has previously failed for this group.
    pub retry_count: u32,
}

/// Observability counts across all streams and groups.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BrokerInfo {
    pub streams: usize,
    pub messages: usize,
    pub groups: usize,
    pub in_flight: usize,
    pub retrying: usize,
    pub dead_lettered: usize,
}

#[derive(Clone)]
struct StoredMessage {
    id: String,
    payload: Vec<u8>,
}

#[derive(Default)]
struct StreamState {
    log: RwLock<Vec<StoredMessage>>,
    groups: RwLock<HashMap<String, Arc<Mutex<GroupState>>>>,
}

/// Thread-safe broker handle. Cloning shares the underlying streams.
#[derive(Clone)]
pub struct Broker {
    streams: Arc<RwLock<HashMap<String, Arc<StreamState>>>>,
    config: BrokerConfig,
    clock: Arc<dyn Clock>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        Broker {
            streams: Arc::new(RwLock::new(HashMap::new())),
            config,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    fn stream(&self, stream: &str) -> Arc<StreamState> {
        if let Some(state) = self.streams.read().unwrap().get(stream) {
            return Arc::clone(state);
        }
        let mut streams = self.streams.write().unwrap();
        Arc::clone(streams.entry(stream.to_string()).or_default())
    }

    fn group(&self, stream: &str, group: &str) -> (Arc<StreamState>, Arc<Mutex<GroupState>>) {
        let stream_state = self.stream(stream);
        // The read guard must be released before falling back to the write
        // lock on the same RwLock.
        let existing = stream_state.groups.read().unwrap().get(group).map(Arc::clone);
        let group_state = match existing {
            Some(state) => state,
            None => {
                let mut groups = stream_state.groups.write().unwrap();
                Arc::clone(groups.entry(group.to_string()).or_default())
            }
        };
        (stream_state, group_state)
    }

    /// Append a message to the stream's tail. Returns its id.
    pub fn publish(&self, stream: &str, payload: Vec<u8>) -> String {
        let id = new_message_id();
        let state = self.stream(stream);
        state.log.write().unwrap().push(StoredMessage {
            id: id.clone(),
            payload,
        });
        id
    }

    /// Deliver the next message for (stream, group), leasing it for
    /// `message_timeout`.
    ///
    /// Order of work: expire stale leases, then redeliver due retries, then
    /// advance into unread messages. Returns `None` when nothing is due.
    pub fn get_next(&self, stream: &str, group: &str) -> Option<BrokerDelivery> {
        let (stream_state, group_state) = self.group(stream, group);
        let now = self.clock.now();
        let mut state = group_state.lock().unwrap();

        state.expire_leases(now, &self.config);

        if let Some(entry) = state.pop_due_retry(now) {
            state.lease(
                entry.id.clone(),
                entry.payload.clone(),
                entry.retry_count,
                now,
                self.config.message_timeout,
            );
            return Some(BrokerDelivery {
                id: entry.id,
                payload: entry.payload,
                retry_count: entry.retry_count,
            });
        }

        let next = {
            let log = stream_state.log.read().unwrap();
            log.get(state.position).cloned()
        }?;
        state.position += 1;
        state.lease(
            next.id.clone(),
            next.payload.clone(),
            0,
            now,
            self.config.message_timeout,
        );
        Some(BrokerDelivery {
            id: next.id,
            payload: next.payload,
            retry_count: 0,
        })
    }

    /// Acknowledge a delivery. True only if the message is currently
    /// in-flight under exactly this (stream, group); false for unknown,
    /// foreign, or already-resolved messages — an expected race, not an
    /// error.
    pub fn ack(&self, stream: &str, id: &str, group: &str) -> bool {
        let (_, group_state) = self.group(stream, group);
        let mut state = group_state.lock().unwrap();
        state.in_flight.remove(id).is_some()
    }

    /// Negatively acknowledge a delivery: schedule redelivery with
    /// exponential backoff, or dead-letter once retries are exhausted.
    /// Same at-most-once contract as `ack`.
    pub fn nack(&self, stream: &str, id: &str, group: &str) -> bool {
        let (_, group_state) = self.group(stream, group);
        let now = self.clock.now();
        let mut state = group_state.lock().unwrap();

        let Some(entry) = state.in_flight.remove(id) else {
            return false;
        };
        state.schedule_retry(
            id.to_string(),
            entry.payload,
            entry.retry_count + 1,
            now,
            &self.config,
        );
        true
    }

    /// Dead letters accumulated for (stream, group).
    pub fn dead_letters(&self, stream: &str, group: &str) -> Vec<DeadLetter> {
        let (_, group_state) = self.group(stream, group);
        let state = group_state.lock().unwrap();
        state.dlq.clone()
    }

    /// Retry count of a message currently in flight for (stream, group).
    pub fn in_flight_retry_count(&self, stream: &str, id: &str, group: &str) -> Option<u32> {
        let (_, group_state) = self.group(stream, group);
        let state = group_state.lock().unwrap();
        state.in_flight.get(id).map(|entry| entry.retry_count)
    }

    /// Aggregate counts for observability.
    pub fn info(&self) -> BrokerInfo {
        let mut info = BrokerInfo::default();
        let streams = self.streams.read().unwrap();
        info.streams = streams.len();
        for state in streams.values() {
            info.messages += state.log.read().unwrap().len();
            let groups = state.groups.read().unwrap();
            info.groups += groups.len();
            for group in groups.values() {
                let group = group.lock().unwrap();
                info.in_flight += group.in_flight.len();
                info.retrying += group.retry.len();
                info.dead_lettered += group.dlq.len();
            }
        }
        info
    }

    /// Drop all streams, cursors, leases, retries, and dead letters.
    pub fn reset(&self) {
        self.streams.write().unwrap().clear();
    }
}

impl RelayPublisher for Broker {
    fn publish(&self, stream: &str, payload: &[u8]) -> Result<String, PublishError> {
        Ok(Broker::publish(self, stream, payload.to_vec()))
    }
}
