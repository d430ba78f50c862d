//! Append-only event store with optimistic concurrency, category reads,
//! snapshots, and read-time upcasting.

mod aggregate;
mod memory;
mod projection;
mod repository;
mod snapshot;

pub use aggregate::{Aggregate, AggregateRoot};
pub use memory::{EventStore, InMemoryEventStore};
pub use projection::{replay_category, Projection};
pub use repository::{AggregateStore, LoadOpts};
pub use snapshot::{snapshot_stream, SnapshotRecord, SNAPSHOT_MESSAGE_TYPE};
