use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::broker::Broker;
use crate::error::StoreError;
use crate::message::Message;
use crate::store::EventStore;

/// A message pulled from a source, identified by a delivery token valid
/// until it is acked or nacked.
#[derive(Clone, Debug)]
pub struct SourcedMessage {
    pub delivery_id: String,
    pub message: Message,
    /// Times this delivery has previously failed, where the source tracks it.
    pub retry_count: u32,
}

/// Where a subscription pulls messages from. Implementations track their own
/// cursor or lease state; `ack`/`nack` settle one delivery.
pub trait Source: Send {
    fn fetch(&mut self, max: usize) -> Result<Vec<SourcedMessage>, StoreError>;

    fn ack(&mut self, delivery_id: &str) -> bool;

    fn nack(&mut self, delivery_id: &str) -> bool;
}

/// Pulls from a broker stream under a consumer group. Redelivery, backoff,
/// and dead-lettering are the broker's concern; the source only decodes.
pub struct BrokerSource {
    broker: Broker,
    stream: String,
    group: String,
}

impl BrokerSource {
    pub fn new(broker: Broker, stream: impl Into<String>, group: impl Into<String>) -> Self {
        BrokerSource {
            broker,
            stream: stream.into(),
            group: group.into(),
        }
    }
}

impl Source for BrokerSource {
    fn fetch(&mut self, max: usize) -> Result<Vec<SourcedMessage>, StoreError> {
        let mut batch = Vec::new();
        while batch.len() < max {
            let Some(delivery) = self.broker.get_next(&self.stream, &self.group) else {
                break;
            };
            match Message::decode_transport(&delivery.payload) {
                Ok(message) => batch.push(SourcedMessage {
                    delivery_id: delivery.id,
                    message,
                    retry_count: delivery.retry_count,
                }),
                Err(err) => {
                    // Undecodable payload: nack so the broker's retry/DLQ
                    // policy disposes of it.
                    warn!(
                        stream = %self.stream,
                        delivery_id = %delivery.id,
                        error = %err,
                        "dropping undecodable broker payload"
                    );
                    self.broker.nack(&self.stream, &delivery.id, &self.group);
                }
            }
        }
        Ok(batch)
    }

    fn ack(&mut self, delivery_id: &str) -> bool {
        self.broker.ack(&self.stream, delivery_id, &self.group)
    }

    fn nack(&mut self, delivery_id: &str) -> bool {
        self.broker.nack(&self.stream, delivery_id, &self.group)
    }
}

/// Pulls a category directly from the event store, ordered by global
/// position. Acking advances the cursor past the message; nacking leaves it
/// in place so the next fetch redelivers.
pub struct CategorySource<S> {
    store: Arc<S>,
    category: String,
    cursor: u64,
    fetched: HashMap<String, u64>,
}

impl<S: EventStore> CategorySource<S> {
    pub fn new(store: Arc<S>, category: impl Into<String>) -> Self {
        CategorySource {
            store,
            category: category.into(),
            cursor: 0,
            fetched: HashMap::new(),
        }
    }

    /// Start reading at a global position instead of the category's start.
    pub fn starting_at(mut self, position: u64) -> Self {
        self.cursor = position;
        self
    }

    pub fn position(&self) -> u64 {
        self.cursor
    }
}

impl<S: EventStore> Source for CategorySource<S> {
    fn fetch(&mut self, max: usize) -> Result<Vec<SourcedMessage>, StoreError> {
        let messages = self.store.read(&self.category, self.cursor, max)?;
        Ok(messages
            .into_iter()
            .map(|message| {
                self.fetched
                    .insert(message.id.clone(), message.metadata.global_position);
                SourcedMessage {
                    delivery_id: message.id.clone(),
                    message,
                    retry_count: 0,
                }
            })
            .collect())
    }

    fn ack(&mut self, delivery_id: &str) -> bool {
        let Some(position) = self.fetched.remove(delivery_id) else {
            return false;
        };
        if position >= self.cursor {
            self.cursor = position + 1;
        }
        true
    }

    fn nack(&mut self, delivery_id: &str) -> bool {
        self.fetched.remove(delivery_id).is_some()
    }
}
