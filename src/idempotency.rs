//! Keyed result cache for exactly-once effects over at-least-once delivery.
//!
//! A handler records the outcome of each idempotency key it completes; a
//! redelivery with the same key is answered from the record instead of
//! re-running the effect. Success records live long (duplicates keep
//! deduplicating), error records live short (a prompt retry gets a fresh
//! attempt).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use crate::clock::{system_clock, Clock};
use crate::config::IdempotencyConfig;
use crate::error::StoreError;

/// Recorded outcome of a completed operation.
#[derive(Clone, Debug, PartialEq)]
pub enum IdempotencyOutcome {
    Success(serde_json::Value),
    Error(String),
}

#[derive(Clone, Debug)]
struct IdempotencyRecord {
    outcome: IdempotencyOutcome,
    expires_at: SystemTime,
}

/// Lookup/record contract for idempotency keys.
pub trait IdempotencyStore: Send + Sync {
    /// The unexpired outcome recorded for `key`, if any.
    fn get(&self, key: &str) -> Result<Option<IdempotencyOutcome>, StoreError>;

    fn put_success(&self, key: &str, result: serde_json::Value) -> Result<(), StoreError>;

    fn put_error(&self, key: &str, message: &str) -> Result<(), StoreError>;

    /// Drop expired records. Returns how many were removed.
    fn purge_expired(&self) -> Result<usize, StoreError>;
}

/// In-memory idempotency backend. Cloning shares storage.
#[derive(Clone)]
pub struct InMemoryIdempotencyStore {
    records: Arc<RwLock<HashMap<String, IdempotencyRecord>>>,
    config: IdempotencyConfig,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new(IdempotencyConfig::default())
    }
}

impl InMemoryIdempotencyStore {
    pub fn new(config: IdempotencyConfig) -> Self {
        InMemoryIdempotencyStore {
            records: Arc::new(RwLock::new(HashMap::new())),
            config,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn put(&self, key: &str, outcome: IdempotencyOutcome) -> Result<(), StoreError> {
        let ttl = match outcome {
            IdempotencyOutcome::Success(_) => self.config.ttl,
            IdempotencyOutcome::Error(_) => self.config.error_ttl,
        };
        let record = IdempotencyRecord {
            outcome,
            expires_at: self.clock.now() + ttl,
        };
        self.records
            .write()
            .map_err(|_| StoreError::LockPoisoned("idempotency write"))?
            .insert(key.to_string(), record);
        Ok(())
    }
}

impl IdempotencyStore for InMemoryIdempotencyStore {
    fn get(&self, key: &str) -> Result<Option<IdempotencyOutcome>, StoreError> {
        let records = self
            .records
            .read()
            .map_err(|_| StoreError::LockPoisoned("idempotency read"))?;
        let now = self.clock.now();
        Ok(records
            .get(key)
            .filter(|record| record.expires_at > now)
            .map(|record| record.outcome.clone()))
    }

    fn put_success(&self, key: &str, result: serde_json::Value) -> Result<(), StoreError> {
        self.put(key, IdempotencyOutcome::Success(result))
    }

    fn put_error(&self, key: &str, message: &str) -> Result<(), StoreError> {
        self.put(key, IdempotencyOutcome::Error(message.to_string()))
    }

    fn purge_expired(&self) -> Result<usize, StoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StoreError::LockPoisoned("idempotency purge"))?;
        let now = self.clock.now();
        let before = records.len();
        records.retain(|_, record| record.expires_at > now);
        Ok(before - records.len())
    }
}
