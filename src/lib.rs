//! Reliable event delivery for Rust services.
//!
//! Four cooperating components, usable separately or as a pipeline:
//!
//! - an append-only **event store** with optimistic concurrency, category
//!   reads ordered by global position, snapshots, and schema upcasting;
//! - an at-least-once **broker** with independent consumer groups, leases,
//!   retry backoff, and a dead-letter queue;
//! - a transactional **outbox**: rows staged next to the domain write and
//!   relayed to the broker by a background worker;
//! - a dispatch **engine** whose subscriptions poll a source, deduplicate
//!   via idempotency keys, and invoke registered handlers.
//!
//! Domain events flow store → outbox → broker → subscription → handler,
//! with every hop surviving a crash: appends are versioned, outbox rows are
//! durable until published, broker deliveries are leased until acked, and
//! handlers deduplicate redeliveries by idempotency key.

mod broker;
mod clock;
mod config;
mod engine;
mod error;
mod idempotency;
mod message;
mod outbox;
mod store;
mod upcaster;

pub use broker::{Broker, BrokerDelivery, BrokerInfo, DeadLetter};
pub use clock::{system_clock, Clock, ManualClock, SystemClock};
pub use config::{BrokerConfig, EngineConfig, IdempotencyConfig, OutboxConfig};
pub use engine::{
    BrokerSource, CategorySource, Handler, HandlerRegistry, Source, SourcedMessage,
    Subscription, SubscriptionState, SubscriptionStats, SubscriptionThread, TickOutcome,
};
pub use error::{HandlerError, PublishError, StoreError, UsageError};
pub use idempotency::{IdempotencyOutcome, IdempotencyStore, InMemoryIdempotencyStore};
pub use message::{
    category, is_category, new_message_id, Message, MessageKind, Metadata, ProposedMessage,
};
pub use outbox::{
    stage, DrainResult, InMemoryOutboxStore, OutboxMessage, OutboxRelay, OutboxRelayThread,
    OutboxStatus, OutboxStore, RelayPublisher, RelayStats,
};
pub use store::{
    replay_category, snapshot_stream, Aggregate, AggregateRoot, AggregateStore, EventStore,
    InMemoryEventStore, LoadOpts, Projection, SnapshotRecord, SNAPSHOT_MESSAGE_TYPE,
};
pub use upcaster::{UpcasterChain, UpcasterEdge, UpcasterError};
