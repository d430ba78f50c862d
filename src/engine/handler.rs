use std::collections::HashMap;
use std::sync::Arc;

use crate::error::HandlerError;
use crate::message::Message;

/// Processes one message kind.
///
/// `handle` returns a result value recorded against the message's
/// idempotency key, so a deduplicated resubmission can answer with the
/// original outcome. `on_error` is the handler's own failure callback; the
/// dispatch loop runs it best-effort and swallows anything it raises.
pub trait Handler: Send + Sync {
    fn handle(&self, message: &Message) -> Result<serde_json::Value, HandlerError>;

    fn on_error(&self, _message: &Message, _error: &HandlerError) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Type-tag to ordered-handler-list map, built once at startup and looked
/// up by message type at dispatch time.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Vec<Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, message_type: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.handlers
            .entry(message_type.into())
            .or_default()
            .push(handler);
        self
    }

    /// Handlers registered for a message type, in registration order.
    pub fn handlers_for(&self, message_type: &str) -> &[Arc<dyn Handler>] {
        self.handlers
            .get(message_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
