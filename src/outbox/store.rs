use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use crate::error::StoreError;
use crate::message::Message;
use crate::outbox::message::OutboxMessage;

/// Persistence contract the outbox needs from its backend: create, get,
/// update, and the two due-row listings. Nothing else.
pub trait OutboxStore: Send + Sync {
    /// Persist a new pending row, assigning its id.
    fn create(&self, message: OutboxMessage) -> Result<u64, StoreError>;

    fn get(&self, id: u64) -> Result<Option<OutboxMessage>, StoreError>;

    /// Replace the stored row with the given one (matched by id).
    fn update(&self, message: &OutboxMessage) -> Result<(), StoreError>;

    /// Due pending/failed rows ordered by priority descending, then enqueue
    /// order. High-priority traffic is never starved behind bulk work.
    fn find_unprocessed(&self, now: SystemTime, limit: usize)
        -> Result<Vec<OutboxMessage>, StoreError>;

    /// Like `find_unprocessed`, restricted to rows at or above a minimum
    /// priority.
    fn find_by_priority(
        &self,
        min_priority: i32,
        now: SystemTime,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>, StoreError>;

    /// Atomically lease up to `max` due rows for a worker.
    fn claim(
        &self,
        worker_id: &str,
        max: usize,
        lease: Duration,
        now: SystemTime,
    ) -> Result<Vec<OutboxMessage>, StoreError>;
}

/// In-memory outbox backend. Cloning shares storage.
#[derive(Clone)]
pub struct InMemoryOutboxStore {
    rows: Arc<RwLock<Vec<OutboxMessage>>>,
    seq: Arc<AtomicU64>,
}

impl Default for InMemoryOutboxStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        InMemoryOutboxStore {
            rows: Arc::new(RwLock::new(Vec::new())),
            seq: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().unwrap().is_empty()
    }

    fn due_sorted(
        &self,
        now: SystemTime,
        limit: usize,
        min_priority: Option<i32>,
    ) -> Result<Vec<OutboxMessage>, StoreError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| StoreError::LockPoisoned("outbox read"))?;
        let mut due: Vec<OutboxMessage> = rows
            .iter()
            .filter(|row| row.is_due(now))
            .filter(|row| min_priority.map(|min| row.priority >= min).unwrap_or(true))
            .cloned()
            .collect();
        // Stable ordering: priority descending, enqueue order (id) on ties.
        due.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        due.truncate(limit);
        Ok(due)
    }
}

impl OutboxStore for InMemoryOutboxStore {
    fn create(&self, mut message: OutboxMessage) -> Result<u64, StoreError> {
        let id = self.seq.fetch_add(1, Ordering::Relaxed);
        message.id = id;
        self.rows
            .write()
            .map_err(|_| StoreError::LockPoisoned("outbox write"))?
            .push(message);
        Ok(id)
    }

    fn get(&self, id: u64) -> Result<Option<OutboxMessage>, StoreError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| StoreError::LockPoisoned("outbox read"))?;
        Ok(rows.iter().find(|row| row.id == id).cloned())
    }

    fn update(&self, message: &OutboxMessage) -> Result<(), StoreError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| StoreError::LockPoisoned("outbox write"))?;
        if let Some(row) = rows.iter_mut().find(|row| row.id == message.id) {
            *row = message.clone();
        }
        Ok(())
    }

    fn find_unprocessed(
        &self,
        now: SystemTime,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>, StoreError> {
        self.due_sorted(now, limit, None)
    }

    fn find_by_priority(
        &self,
        min_priority: i32,
        now: SystemTime,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>, StoreError> {
        self.due_sorted(now, limit, Some(min_priority))
    }

    fn claim(
        &self,
        worker_id: &str,
        max: usize,
        lease: Duration,
        now: SystemTime,
    ) -> Result<Vec<OutboxMessage>, StoreError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| StoreError::LockPoisoned("outbox claim"))?;

        // Lease in listing order so priority wins under contention too.
        let mut order: Vec<usize> = (0..rows.len())
            .filter(|&idx| rows[idx].is_due(now))
            .collect();
        order.sort_by(|&a, &b| {
            rows[b]
                .priority
                .cmp(&rows[a].priority)
                .then(rows[a].id.cmp(&rows[b].id))
        });

        let mut claimed = Vec::new();
        for idx in order.into_iter().take(max) {
            if rows[idx].start_processing(worker_id, lease, now) {
                claimed.push(rows[idx].clone());
            }
        }
        Ok(claimed)
    }
}

/// Stage a store message for relay: one pending outbox row carrying the
/// message's transport encoding, destined for the stream's category on the
/// broker.
pub fn stage<S: OutboxStore>(
    store: &S,
    message: &Message,
    priority: i32,
    max_retries: u32,
    now: SystemTime,
) -> Result<u64, StoreError> {
    let mut row = OutboxMessage::new(
        0,
        &message.stream,
        message.category().to_string(),
        &message.message_type,
        message.encode_transport(),
        max_retries,
        now,
    );
    row.priority = priority;
    store.create(row)
}
