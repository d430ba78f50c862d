//! Transactional outbox: durable staging plus a background relay.
//!
//! A write that must also publish stages an [`OutboxMessage`] alongside its
//! domain events; the [`OutboxRelay`] later claims due rows under a worker
//! lease and pushes them to a [`RelayPublisher`]. Failures back off
//! exponentially on the row itself and end in `Abandoned` once the retry
//! budget is spent, so the row carries its own diagnosis.

mod message;
mod relay;
mod store;
mod thread;

pub use message::{OutboxMessage, OutboxStatus};
pub use relay::{DrainResult, OutboxRelay, RelayPublisher};
pub use store::{stage, InMemoryOutboxStore, OutboxStore};
pub use thread::{OutboxRelayThread, RelayStats};
