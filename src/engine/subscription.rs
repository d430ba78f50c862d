use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::engine::handler::HandlerRegistry;
use crate::engine::source::{Source, SourcedMessage};
use crate::error::StoreError;
use crate::idempotency::{IdempotencyOutcome, IdempotencyStore};
use crate::message::new_message_id;

/// Dispatch loop state, advanced by `tick`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    Idle,
    Polling,
    Dispatching,
    Stopped,
}

/// Counters for one tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub fetched: usize,
    pub handled: usize,
    /// Messages answered from the idempotency store without invoking a
    /// handler. Still acked.
    pub deduplicated: usize,
    pub failed: usize,
}

impl TickOutcome {
    fn absorb(&mut self, other: TickOutcome) {
        self.fetched += other.fetched;
        self.handled += other.handled;
        self.deduplicated += other.deduplicated;
        self.failed += other.failed;
    }
}

/// One named dispatch loop over a source: fetch a bounded batch, consult
/// the idempotency store, invoke handlers, settle each delivery.
pub struct Subscription<S> {
    name: String,
    identity: String,
    source: S,
    registry: Arc<HandlerRegistry>,
    idempotency: Option<Arc<dyn IdempotencyStore>>,
    config: EngineConfig,
    state: SubscriptionState,
    totals: TickOutcome,
}

impl<S: Source> Subscription<S> {
    pub fn new(name: impl Into<String>, source: S, registry: Arc<HandlerRegistry>) -> Self {
        let name = name.into();
        let identity = subscription_identity(&name);
        Subscription {
            name,
            identity,
            source,
            registry,
            idempotency: None,
            config: EngineConfig::default(),
            state: SubscriptionState::Idle,
            totals: TickOutcome::default(),
        }
    }

    /// Deduplicate keyed messages against this store.
    pub fn with_idempotency(mut self, store: Arc<dyn IdempotencyStore>) -> Self {
        self.idempotency = Some(store);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Worker identity: stable in its name component, unique per instance,
    /// so concurrent workers of one subscription are distinguishable.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Cumulative counters since construction.
    pub fn totals(&self) -> TickOutcome {
        self.totals
    }

    /// Fetch one bounded batch and dispatch it. Returns the tick's
    /// counters; `fetched == 0` means the caller should yield before the
    /// next tick.
    pub fn tick(&mut self) -> Result<TickOutcome, StoreError> {
        if self.state == SubscriptionState::Stopped {
            return Ok(TickOutcome::default());
        }

        self.state = SubscriptionState::Polling;
        let batch = self.source.fetch(self.config.messages_per_tick)?;
        let outcome = if batch.is_empty() {
            TickOutcome::default()
        } else {
            self.state = SubscriptionState::Dispatching;
            self.process_batch(batch)
        };

        self.state = SubscriptionState::Idle;
        self.totals.absorb(outcome);
        Ok(outcome)
    }

    /// Stop dispatching. Idempotent; a stopped subscription ticks to no-op.
    pub fn stop(&mut self) {
        self.state = SubscriptionState::Stopped;
    }

    fn process_batch(&mut self, batch: Vec<SourcedMessage>) -> TickOutcome {
        let mut outcome = TickOutcome {
            fetched: batch.len(),
            ..Default::default()
        };

        for sourced in batch {
            if self.already_succeeded(&sourced) {
                debug!(
                    subscription = %self.name,
                    message_id = %sourced.message.id,
                    "duplicate submission answered from idempotency record"
                );
                self.source.ack(&sourced.delivery_id);
                outcome.deduplicated += 1;
                continue;
            }

            match self.dispatch(&sourced) {
                Ok(result) => {
                    self.source.ack(&sourced.delivery_id);
                    self.record_success(&sourced, result);
                    outcome.handled += 1;
                }
                Err(()) => {
                    self.source.nack(&sourced.delivery_id);
                    outcome.failed += 1;
                }
            }
        }

        outcome
    }

    fn already_succeeded(&self, sourced: &SourcedMessage) -> bool {
        let Some(key) = sourced.message.metadata.idempotency_key.as_deref() else {
            return false;
        };
        let Some(store) = &self.idempotency else {
            return false;
        };
        matches!(store.get(key), Ok(Some(IdempotencyOutcome::Success(_))))
    }

    /// Run every registered handler in order. A handler failure runs its
    /// own error hook (best-effort), records a short-lived error for keyed
    /// messages, and fails the whole delivery.
    fn dispatch(&self, sourced: &SourcedMessage) -> Result<serde_json::Value, ()> {
        let message = &sourced.message;
        let mut result = json!(null);

        for handler in self.registry.handlers_for(&message.message_type) {
            match handler.handle(message) {
                Ok(value) => result = value,
                Err(err) => {
                    warn!(
                        subscription = %self.name,
                        message_id = %message.id,
                        message_type = %message.message_type,
                        retry_count = sourced.retry_count,
                        error = %err,
                        "handler failed; delivery will be retried"
                    );
                    if let Err(hook_err) = handler.on_error(message, &err) {
                        warn!(
                            subscription = %self.name,
                            message_id = %message.id,
                            error = %hook_err,
                            "handler error hook failed"
                        );
                    }
                    self.record_error(sourced, &err.message);
                    return Err(());
                }
            }
        }

        Ok(result)
    }

    fn record_success(&self, sourced: &SourcedMessage, result: serde_json::Value) {
        let Some(key) = sourced.message.metadata.idempotency_key.as_deref() else {
            return;
        };
        if let Some(store) = &self.idempotency {
            if let Err(err) = store.put_success(key, result) {
                warn!(key, error = %err, "failed to record idempotency success");
            }
        }
    }

    fn record_error(&self, sourced: &SourcedMessage, message: &str) {
        let Some(key) = sourced.message.metadata.idempotency_key.as_deref() else {
            return;
        };
        if let Some(store) = &self.idempotency {
            if let Err(err) = store.put_error(key, message) {
                warn!(key, error = %err, "failed to record idempotency error");
            }
        }
    }
}

/// `{name}-{host}-{pid}-{suffix}`: logically stable, unique per worker.
fn subscription_identity(name: &str) -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    let suffix = new_message_id();
    let suffix = &suffix[..8];
    format!("{}-{}-{}-{}", name, host, std::process::id(), suffix)
}
