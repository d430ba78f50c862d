//! Dispatch engine: subscriptions polling a source and invoking handlers.
//!
//! A [`Subscription`] pulls bounded batches from a [`Source`] (a broker
//! stream under a consumer group, or an event store category), deduplicates
//! keyed messages through the idempotency store, and settles each delivery
//! by ack or nack. [`SubscriptionThread`] runs the loop in the background
//! with cooperative shutdown.

mod handler;
mod source;
mod subscription;
mod thread;

pub use handler::{Handler, HandlerRegistry};
pub use source::{BrokerSource, CategorySource, Source, SourcedMessage};
pub use subscription::{Subscription, SubscriptionState, TickOutcome};
pub use thread::{SubscriptionStats, SubscriptionThread};
