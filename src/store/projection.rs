use tracing::warn;

use crate::error::StoreError;
use crate::message::Message;
use crate::store::memory::EventStore;

const REPLAY_BATCH: usize = 256;

/// A read model fed by a category replay.
pub trait Projection {
    /// Apply one message. Errors are logged and skipped during bulk replay;
    /// they never abort the replay.
    fn apply(&mut self, message: &Message) -> Result<(), String>;
}

/// Replay a whole category into a projection, ordered by global position.
///
/// Undecodable or unknown messages are logged and skipped — a single stale
/// message must not take down a rebuild. Returns (applied, skipped).
pub fn replay_category<S, P>(
    store: &S,
    category: &str,
    projection: &mut P,
) -> Result<(u64, u64), StoreError>
where
    S: EventStore,
    P: Projection,
{
    let mut applied = 0u64;
    let mut skipped = 0u64;
    let mut position = 0u64;

    loop {
        let batch = store.read(category, position, REPLAY_BATCH)?;
        if batch.is_empty() {
            break;
        }
        position = batch.last().unwrap().metadata.global_position + 1;

        for message in &batch {
            match projection.apply(message) {
                Ok(()) => applied += 1,
                Err(err) => {
                    warn!(
                        stream = %message.stream,
                        message_type = %message.message_type,
                        global_position = message.metadata.global_position,
                        error = %err,
                        "skipping message during projection replay"
                    );
                    skipped += 1;
                }
            }
        }
    }

    Ok((applied, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ProposedMessage;
    use crate::store::memory::InMemoryEventStore;

    #[derive(Default)]
    struct OrderTotals {
        placed: Vec<String>,
    }

    impl Projection for OrderTotals {
        fn apply(&mut self, message: &Message) -> Result<(), String> {
            match message.message_type.as_str() {
                "Placed" => {
                    let sku: String = message.decode().map_err(|e| e.to_string())?;
                    self.placed.push(sku);
                    Ok(())
                }
                other => Err(format!("unknown event type: {}", other)),
            }
        }
    }

    #[test]
    fn replay_applies_in_global_order() {
        let store = InMemoryEventStore::new();
        store
            .append("order-1", vec![ProposedMessage::event("Placed", &"sku-a")], None)
            .unwrap();
        store
            .append("order-2", vec![ProposedMessage::event("Placed", &"sku-b")], None)
            .unwrap();
        store
            .append("order-1", vec![ProposedMessage::event("Placed", &"sku-c")], None)
            .unwrap();

        let mut projection = OrderTotals::default();
        let (applied, skipped) = replay_category(&store, "order", &mut projection).unwrap();

        assert_eq!(applied, 3);
        assert_eq!(skipped, 0);
        assert_eq!(projection.placed, vec!["sku-a", "sku-b", "sku-c"]);
    }

    #[test]
    fn unknown_messages_are_skipped_not_fatal() {
        let store = InMemoryEventStore::new();
        store
            .append(
                "order-1",
                vec![
                    ProposedMessage::event("Placed", &"sku-a"),
                    ProposedMessage::event("Mystery", &"??"),
                    ProposedMessage::event("Placed", &"sku-b"),
                ],
                None,
            )
            .unwrap();

        let mut projection = OrderTotals::default();
        let (applied, skipped) = replay_category(&store, "order", &mut projection).unwrap();

        assert_eq!(applied, 2);
        assert_eq!(skipped, 1);
        assert_eq!(projection.placed, vec!["sku-a", "sku-b"]);
    }
}
