use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::clock::{system_clock, Clock};
use crate::error::StoreError;
use crate::message::{category, is_category, new_message_id, Message, Metadata, ProposedMessage};
use crate::upcaster::UpcasterChain;

/// Append-only message store keyed by stream.
pub trait EventStore: Send + Sync {
    /// Append a batch of messages to one stream atomically.
    ///
    /// `expected_version` is the caller's belief of the stream's current
    /// version (`-1` for an empty stream); a mismatch fails with
    /// `ConcurrencyConflict` and nothing is written. `None` skips the check.
    /// Returns the stream position of the last message written.
    fn append(
        &self,
        stream: &str,
        batch: Vec<ProposedMessage>,
        expected_version: Option<i64>,
    ) -> Result<i64, StoreError>;

    /// Read messages from a stream or category, in order, starting at
    /// `position` (stream version for streams, global position for
    /// categories), up to `limit` messages.
    ///
    /// A name without a `-` is a category read: all matching streams merged
    /// by global position.
    fn read(
        &self,
        stream_or_category: &str,
        position: u64,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    /// The last message of a stream, if any.
    fn read_last(&self, stream: &str) -> Result<Option<Message>, StoreError>;

    /// Current version of a stream: position of its last message, `-1` when
    /// empty.
    fn stream_version(&self, stream: &str) -> Result<i64, StoreError>;
}

struct StoreInner {
    streams: HashMap<String, Vec<Message>>,
    // Next global position to assign. Lives inside the same lock as the
    // streams so position assignment and append are one critical section.
    next_global_position: u64,
}

/// In-memory event store. Cloning creates another handle to the same
/// storage; all handles share the global position counter.
#[derive(Clone)]
pub struct InMemoryEventStore {
    inner: Arc<RwLock<StoreInner>>,
    upcasters: Arc<UpcasterChain>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        InMemoryEventStore {
            inner: Arc::new(RwLock::new(StoreInner {
                streams: HashMap::new(),
                next_global_position: 1,
            })),
            upcasters: Arc::new(UpcasterChain::empty()),
            clock: system_clock(),
        }
    }

    /// Apply an upcaster chain to every message read back.
    pub fn with_upcasters(mut self, upcasters: UpcasterChain) -> Self {
        self.upcasters = Arc::new(upcasters);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Names of all streams with at least one message.
    pub fn stream_names(&self) -> Result<Vec<String>, StoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| StoreError::LockPoisoned("stream_names"))?;
        let mut names: Vec<String> = inner.streams.keys().cloned().collect();
        names.sort_unstable();
        Ok(names)
    }

    fn upcast(&self, mut message: Message) -> Message {
        let (data, version) = self.upcasters.upcast(
            &message.message_type,
            message.metadata.schema_version,
            message.data,
        );
        message.data = data;
        message.metadata.schema_version = version;
        message
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        stream: &str,
        batch: Vec<ProposedMessage>,
        expected_version: Option<i64>,
    ) -> Result<i64, StoreError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| StoreError::LockPoisoned("append"))?;

        let current = inner
            .streams
            .get(stream)
            .map(|messages| messages.len() as i64 - 1)
            .unwrap_or(-1);

        if let Some(expected) = expected_version {
            if expected != current {
                return Err(StoreError::ConcurrencyConflict {
                    stream: stream.to_string(),
                    expected,
                    actual: current,
                });
            }
        }

        let timestamp = self.clock.now();
        let mut version = current;
        for proposed in batch {
            version += 1;
            let global_position = inner.next_global_position;
            inner.next_global_position += 1;

            let message = Message {
                id: new_message_id(),
                message_type: proposed.message_type,
                stream: stream.to_string(),
                data: proposed.data,
                metadata: Metadata {
                    version,
                    global_position,
                    expected_version,
                    origin_stream: proposed.origin_stream,
                    timestamp,
                    kind: proposed.kind,
                    schema_version: proposed.schema_version,
                    idempotency_key: proposed.idempotency_key,
                },
            };
            inner
                .streams
                .entry(stream.to_string())
                .or_default()
                .push(message);
        }

        Ok(version)
    }

    fn read(
        &self,
        stream_or_category: &str,
        position: u64,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;

        let mut messages: Vec<Message> = if is_category(stream_or_category) {
            let mut merged: Vec<Message> = inner
                .streams
                .iter()
                .filter(|(name, _)| category(name) == stream_or_category)
                .flat_map(|(_, messages)| messages.iter())
                .filter(|message| message.metadata.global_position >= position)
                .cloned()
                .collect();
            merged.sort_by_key(|message| message.metadata.global_position);
            merged
        } else {
            inner
                .streams
                .get(stream_or_category)
                .map(|messages| {
                    messages
                        .iter()
                        .filter(|message| message.metadata.version >= position as i64)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        messages.truncate(limit);
        drop(inner);

        Ok(messages
            .into_iter()
            .map(|message| self.upcast(message))
            .collect())
    }

    fn read_last(&self, stream: &str) -> Result<Option<Message>, StoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| StoreError::LockPoisoned("read_last"))?;
        let last = inner
            .streams
            .get(stream)
            .and_then(|messages| messages.last().cloned());
        drop(inner);
        Ok(last.map(|message| self.upcast(message)))
    }

    fn stream_version(&self, stream: &str) -> Result<i64, StoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| StoreError::LockPoisoned("stream_version"))?;
        Ok(inner
            .streams
            .get(stream)
            .map(|messages| messages.len() as i64 - 1)
            .unwrap_or(-1))
    }
}
