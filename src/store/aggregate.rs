use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{StoreError, UsageError};
use crate::message::ProposedMessage;

/// Domain state rebuilt from an event sequence.
///
/// The aggregate owns its apply logic per event type; the store owns
/// persistence, versions, and snapshots. One version increment per appended
/// event, regardless of how deeply nested the affected state is — the
/// aggregate version always equals the stream position of its last event.
pub trait Aggregate: Default + Serialize + DeserializeOwned + Send {
    /// Stream category for this aggregate type (streams are
    /// `category-id`).
    fn category() -> &'static str;

    /// Apply one event to the state. Unknown event types are an error; the
    /// caller decides whether that aborts (direct loads) or is skipped
    /// (bulk replay).
    fn apply(&mut self, event_type: &str, data: &[u8]) -> Result<(), String>;
}

/// A loaded aggregate plus its persistence bookkeeping: current version,
/// events recorded since load, and whether the load was temporal
/// (read-only).
pub struct AggregateRoot<A: Aggregate> {
    id: String,
    state: A,
    version: i64,
    pending: Vec<ProposedMessage>,
    read_only: bool,
}

impl<A: Aggregate> fmt::Debug for AggregateRoot<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateRoot")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("pending", &self.pending.len())
            .field("read_only", &self.read_only)
            .finish()
    }
}

impl<A: Aggregate> AggregateRoot<A> {
    /// A fresh aggregate with no history.
    pub fn new(id: impl Into<String>) -> Self {
        AggregateRoot {
            id: id.into(),
            state: A::default(),
            version: -1,
            pending: Vec::new(),
            read_only: false,
        }
    }

    pub(crate) fn hydrated(id: String, state: A, version: i64, read_only: bool) -> Self {
        AggregateRoot {
            id,
            state,
            version,
            pending: Vec::new(),
            read_only,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stream this aggregate's events live on.
    pub fn stream(&self) -> String {
        format!("{}-{}", A::category(), self.id)
    }

    /// Version of the last persisted or pending event; `-1` when empty.
    pub fn version(&self) -> i64 {
        self.version + self.pending.len() as i64
    }

    /// Version as of the last load, before any pending events.
    pub fn committed_version(&self) -> i64 {
        self.version
    }

    pub fn state(&self) -> &A {
        &self.state
    }

    /// Whether this root was loaded at a temporal bound and rejects writes.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Events recorded since load, not yet persisted.
    pub fn pending(&self) -> &[ProposedMessage] {
        &self.pending
    }

    pub(crate) fn take_pending(&mut self) -> Vec<ProposedMessage> {
        std::mem::take(&mut self.pending)
    }

    pub(crate) fn mark_committed(&mut self, version: i64) {
        self.version = version;
    }

    /// Record an event: apply it to the state and queue it for the next
    /// save.
    pub fn record<T: Serialize>(
        &mut self,
        event_type: &str,
        payload: &T,
    ) -> Result<(), StoreError> {
        self.record_proposed(ProposedMessage::event(event_type, payload))
    }

    /// Record a pre-built proposal (for schema versions or origin streams).
    pub fn record_proposed(&mut self, proposed: ProposedMessage) -> Result<(), StoreError> {
        if self.read_only {
            return Err(UsageError::ReadOnlyAggregate {
                id: self.id.clone(),
            }
            .into());
        }

        self.state
            .apply(&proposed.message_type, &proposed.data)
            .map_err(|message| StoreError::Deserialization {
                stream: self.stream(),
                message_type: proposed.message_type.clone(),
                message,
            })?;
        self.pending.push(proposed);
        Ok(())
    }
}
