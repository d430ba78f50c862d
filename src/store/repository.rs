use std::marker::PhantomData;
use std::time::SystemTime;

use crate::error::{StoreError, UsageError};
use crate::message::{MessageKind, ProposedMessage};
use crate::store::aggregate::{Aggregate, AggregateRoot};
use crate::store::memory::EventStore;
use crate::store::snapshot::{snapshot_stream, SnapshotRecord, SNAPSHOT_MESSAGE_TYPE};

const READ_BATCH: usize = 256;

/// Temporal bounds for a load. `at_version` and `as_of` are mutually
/// exclusive; a bounded load returns a read-only root.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoadOpts {
    pub at_version: Option<i64>,
    pub as_of: Option<SystemTime>,
}

impl LoadOpts {
    pub fn at_version(version: i64) -> Self {
        LoadOpts {
            at_version: Some(version),
            ..Default::default()
        }
    }

    pub fn as_of(time: SystemTime) -> Self {
        LoadOpts {
            as_of: Some(time),
            ..Default::default()
        }
    }

    fn is_bounded(&self) -> bool {
        self.at_version.is_some() || self.as_of.is_some()
    }
}

/// Load/save gateway for one aggregate type over an event store.
///
/// Saving appends the root's pending events with the root's committed
/// version as the expected version, and writes a snapshot whenever the
/// stream's event count crosses a multiple of `snapshot_threshold`.
pub struct AggregateStore<A: Aggregate, S: EventStore> {
    store: S,
    snapshot_threshold: Option<u64>,
    _marker: PhantomData<fn() -> A>,
}

impl<A: Aggregate, S: EventStore> AggregateStore<A, S> {
    pub fn new(store: S) -> Self {
        AggregateStore {
            store,
            snapshot_threshold: None,
            _marker: PhantomData,
        }
    }

    /// Snapshot every `threshold` events. Zero disables snapshotting.
    pub fn with_snapshots(mut self, threshold: u64) -> Self {
        self.snapshot_threshold = (threshold > 0).then_some(threshold);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Load the current state of an aggregate.
    pub fn load(&self, id: &str) -> Result<AggregateRoot<A>, StoreError> {
        self.load_at(id, LoadOpts::default())
    }

    /// Load an aggregate, optionally bounded at a version or point in time.
    /// Bounded loads never apply events beyond the bound and return a
    /// read-only root.
    pub fn load_at(&self, id: &str, opts: LoadOpts) -> Result<AggregateRoot<A>, StoreError> {
        if opts.at_version.is_some() && opts.as_of.is_some() {
            return Err(UsageError::ConflictingTemporalBounds.into());
        }

        let stream = format!("{}-{}", A::category(), id);
        let (mut state, mut version) = self.load_snapshot(id, &opts)?;

        let mut position = (version + 1) as u64;
        'replay: loop {
            let batch = self.store.read(&stream, position, READ_BATCH)?;
            if batch.is_empty() {
                break;
            }
            position = (batch.last().unwrap().metadata.version + 1) as u64;

            for message in batch {
                if let Some(bound) = opts.at_version {
                    if message.metadata.version > bound {
                        break 'replay;
                    }
                }
                if let Some(bound) = opts.as_of {
                    if message.metadata.timestamp > bound {
                        break 'replay;
                    }
                }

                state
                    .apply(&message.message_type, &message.data)
                    .map_err(|err| StoreError::Deserialization {
                        stream: stream.clone(),
                        message_type: message.message_type.clone(),
                        message: err,
                    })?;
                version = message.metadata.version;
            }
        }

        Ok(AggregateRoot::hydrated(
            id.to_string(),
            state,
            version,
            opts.is_bounded(),
        ))
    }

    /// Persist the root's pending events. Fails with
    /// `ConcurrencyConflict` when the stream moved since the root was
    /// loaded; the store never auto-retries.
    pub fn save(&self, root: &mut AggregateRoot<A>) -> Result<(), StoreError> {
        if root.is_read_only() {
            return Err(UsageError::ReadOnlyAggregate {
                id: root.id().to_string(),
            }
            .into());
        }

        if root.pending().is_empty() {
            return Ok(());
        }
        let pending = root.pending().to_vec();
        let appended = pending.len() as u64;
        let expected = root.committed_version();

        // On conflict the pending events stay on the root so the caller can
        // reload and re-record against fresh state.
        let stream = root.stream();
        let new_version = self.store.append(&stream, pending, Some(expected))?;
        root.take_pending();
        root.mark_committed(new_version);

        if let Some(threshold) = self.snapshot_threshold {
            let count_before = (expected + 1) as u64;
            let count_after = count_before + appended;
            if count_after / threshold > count_before / threshold {
                self.write_snapshot(root)?;
            }
        }

        Ok(())
    }

    fn write_snapshot(&self, root: &AggregateRoot<A>) -> Result<(), StoreError> {
        let record = SnapshotRecord {
            version: root.committed_version(),
            state: bitcode::serialize(root.state())
                .expect("aggregate state is always bitcode-serializable"),
        };
        let proposed = ProposedMessage {
            message_type: SNAPSHOT_MESSAGE_TYPE.to_string(),
            data: bitcode::serialize(&record).expect("snapshot record serializes"),
            kind: MessageKind::Event,
            schema_version: 1,
            origin_stream: Some(root.stream()),
            idempotency_key: None,
        };
        // Snapshots are latest-wins; concurrent writers appending duplicate
        // snapshots is harmless, so no expected version.
        self.store
            .append(&snapshot_stream(A::category(), root.id()), vec![proposed], None)?;
        Ok(())
    }

    /// Latest usable snapshot at or below the bound, or default state.
    fn load_snapshot(&self, id: &str, opts: &LoadOpts) -> Result<(A, i64), StoreError> {
        let stream = snapshot_stream(A::category(), id);
        let mut best: Option<(SnapshotRecord, SystemTime)> = None;

        let mut position = 0u64;
        loop {
            let batch = self.store.read(&stream, position, READ_BATCH)?;
            if batch.is_empty() {
                break;
            }
            position = (batch.last().unwrap().metadata.version + 1) as u64;

            for message in batch {
                let record: SnapshotRecord = match bitcode::deserialize(&message.data) {
                    Ok(record) => record,
                    Err(err) => {
                        return Err(StoreError::Deserialization {
                            stream: stream.clone(),
                            message_type: message.message_type.clone(),
                            message: err.to_string(),
                        })
                    }
                };

                if let Some(bound) = opts.at_version {
                    if record.version > bound {
                        continue;
                    }
                }
                if let Some(bound) = opts.as_of {
                    if message.metadata.timestamp > bound {
                        continue;
                    }
                }
                best = Some((record, message.metadata.timestamp));
            }
        }

        match best {
            Some((record, _)) => {
                let state: A = bitcode::deserialize(&record.state).map_err(|err| {
                    StoreError::Deserialization {
                        stream,
                        message_type: SNAPSHOT_MESSAGE_TYPE.to_string(),
                        message: err.to_string(),
                    }
                })?;
                Ok((state, record.version))
            }
            None => Ok((A::default(), -1)),
        }
    }
}
