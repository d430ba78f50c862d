//! The full delivery pipeline: store append → outbox staging → relay →
//! broker → subscription → handler.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use event_relay::{
    stage, Broker, BrokerConfig, BrokerSource, EngineConfig, EventStore, Handler, HandlerError,
    HandlerRegistry, IdempotencyConfig, IdempotencyOutcome, IdempotencyStore, InMemoryEventStore,
    InMemoryIdempotencyStore, InMemoryOutboxStore, ManualClock, Message, OutboxConfig,
    OutboxRelay, ProposedMessage, RelayPublisher, Source, Subscription, SubscriptionThread,
};

struct Collector {
    seen: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl Collector {
    fn new() -> Arc<Self> {
        Arc::new(Collector {
            seen: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }
}

impl Handler for Collector {
    fn handle(&self, message: &Message) -> Result<serde_json::Value, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let sku: String = message
            .decode()
            .map_err(|e| HandlerError::new(e.to_string()))?;
        self.seen.lock().unwrap().push(sku.clone());
        Ok(json!({ "sku": sku }))
    }
}

#[test]
fn events_flow_from_append_to_handler() {
    let store = InMemoryEventStore::new();
    let outbox = InMemoryOutboxStore::new();
    let broker = Broker::new(BrokerConfig::default());

    // Domain write plus outbox staging.
    store
        .append(
            "order-1",
            vec![ProposedMessage::event("OrderPlaced", &"sku-7")],
            Some(-1),
        )
        .unwrap();
    let message = store.read_last("order-1").unwrap().unwrap();
    stage(&outbox, &message, 0, 3, std::time::SystemTime::now()).unwrap();

    // Relay to the broker.
    let relay = OutboxRelay::new(broker.clone());
    let drained = relay.drain(&outbox).unwrap();
    assert_eq!(drained.published, 1);

    // Dispatch to the handler under a consumer group.
    let handler = Collector::new();
    let registry = HandlerRegistry::new().register("OrderPlaced", handler.clone());
    let mut subscription = Subscription::new(
        "order-projection",
        BrokerSource::new(broker.clone(), "order", "projections"),
        Arc::new(registry),
    );

    let outcome = subscription.tick().unwrap();
    assert_eq!(outcome.handled, 1);
    assert_eq!(*handler.seen.lock().unwrap(), vec!["sku-7"]);
    assert_eq!(broker.info().in_flight, 0);
}

#[test]
fn outbox_relays_in_priority_order() {
    let outbox = InMemoryOutboxStore::new();
    let broker = Broker::new(BrokerConfig::default());
    let store = InMemoryEventStore::new();

    for (i, priority) in [-50, 0, 50, 100].iter().enumerate() {
        let stream = format!("order-{}", i);
        store
            .append(
                &stream,
                vec![ProposedMessage::event("OrderPlaced", &format!("p{}", priority))],
                None,
            )
            .unwrap();
        let message = store.read_last(&stream).unwrap().unwrap();
        stage(&outbox, &message, *priority, 3, std::time::SystemTime::now()).unwrap();
    }

    let relay = OutboxRelay::new(broker.clone())
        .with_config(OutboxConfig::default().with_batch_size(10));
    relay.drain(&outbox).unwrap();

    // Consume the broker stream: non-increasing priority order.
    let mut source = BrokerSource::new(broker.clone(), "order", "g");
    let mut skus = Vec::new();
    loop {
        let batch = source.fetch(10).unwrap();
        if batch.is_empty() {
            break;
        }
        for sourced in batch {
            skus.push(sourced.message.decode::<String>().unwrap());
            source.ack(&sourced.delivery_id);
        }
    }
    assert_eq!(skus, vec!["p100", "p50", "p0", "p-50"]);
}

#[test]
fn duplicate_submissions_invoke_handler_once_with_identical_results() {
    let store = InMemoryEventStore::new();
    let broker = Broker::new(BrokerConfig::default());
    let idempotency = Arc::new(InMemoryIdempotencyStore::new(IdempotencyConfig::default()));

    // The same command submitted twice with one idempotency key.
    for attempt in 0..2 {
        let stream = format!("order-{}", attempt);
        store
            .append(
                &stream,
                vec![ProposedMessage::command("PlaceOrder", &"sku-1")
                    .with_idempotency_key("submit-77")],
                None,
            )
            .unwrap();
        let message = store.read_last(&stream).unwrap().unwrap();
        RelayPublisher::publish(&broker, "order", &message.encode_transport()).unwrap();
    }

    let handler = Collector::new();
    let registry = HandlerRegistry::new().register("PlaceOrder", handler.clone());
    let mut subscription = Subscription::new(
        "orders",
        BrokerSource::new(broker.clone(), "order", "g"),
        Arc::new(registry),
    )
    .with_idempotency(idempotency.clone() as Arc<dyn IdempotencyStore>);

    let outcome = subscription.tick().unwrap();
    assert_eq!(outcome.handled, 1);
    assert_eq!(outcome.deduplicated, 1);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

    // Both submissions resolve to the same recorded result.
    assert_eq!(
        idempotency.get("submit-77").unwrap(),
        Some(IdempotencyOutcome::Success(json!({ "sku": "sku-1" })))
    );
}

#[test]
fn failed_delivery_retries_and_dead_letters_at_the_boundary() {
    let clock = ManualClock::new();
    let broker = Broker::new(
        BrokerConfig::default()
            .with_retry_delay(Duration::from_millis(100))
            .with_max_retries(2),
    )
    .with_clock(Arc::new(clock.clone()));

    let store = InMemoryEventStore::new().with_clock(Arc::new(clock.clone()));
    store
        .append(
            "order-1",
            vec![ProposedMessage::event("OrderPlaced", &"sku")],
            None,
        )
        .unwrap();
    let message = store.read_last("order-1").unwrap().unwrap();
    RelayPublisher::publish(&broker, "order", &message.encode_transport()).unwrap();

    struct AlwaysFails;
    impl Handler for AlwaysFails {
        fn handle(&self, _message: &Message) -> Result<serde_json::Value, HandlerError> {
            Err(HandlerError::new("projection store down"))
        }
    }

    let registry = HandlerRegistry::new().register("OrderPlaced", Arc::new(AlwaysFails));
    let mut subscription = Subscription::new(
        "orders",
        BrokerSource::new(broker.clone(), "order", "g"),
        Arc::new(registry),
    );

    // First failure: scheduled for retry, not yet due.
    assert_eq!(subscription.tick().unwrap().failed, 1);
    assert_eq!(subscription.tick().unwrap().fetched, 0);

    clock.advance(Duration::from_millis(150));
    assert_eq!(subscription.tick().unwrap().failed, 1);

    // Third failure exceeds max_retries=2: dead-lettered, never redelivered.
    clock.advance(Duration::from_secs(1));
    assert_eq!(subscription.tick().unwrap().failed, 1);
    clock.advance(Duration::from_secs(60));
    assert_eq!(subscription.tick().unwrap().fetched, 0);

    let dead = broker.dead_letters("order", "g");
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].retry_count, 3);
}

#[test]
fn background_workers_drain_on_shutdown() {
    let store = InMemoryEventStore::new();
    let outbox = InMemoryOutboxStore::new();
    let broker = Broker::new(BrokerConfig::default());

    for i in 0..5 {
        let stream = format!("order-{}", i);
        store
            .append(
                &stream,
                vec![ProposedMessage::event("OrderPlaced", &format!("sku-{}", i))],
                None,
            )
            .unwrap();
        let message = store.read_last(&stream).unwrap().unwrap();
        stage(&outbox, &message, 0, 3, std::time::SystemTime::now()).unwrap();
    }

    let relay_worker = event_relay::OutboxRelayThread::spawn(
        outbox.clone(),
        OutboxRelay::new(broker.clone()),
        Duration::from_millis(5),
    );

    let handler = Collector::new();
    let registry = HandlerRegistry::new().register("OrderPlaced", handler.clone());
    let subscription = Subscription::new(
        "orders",
        BrokerSource::new(broker.clone(), "order", "g"),
        Arc::new(registry),
    )
    .with_config(EngineConfig::default().with_poll_interval(Duration::from_millis(5)));
    let dispatch_worker = SubscriptionThread::spawn(subscription);

    // Give the pipeline a moment, then stop; shutdown drains remaining work.
    std::thread::sleep(Duration::from_millis(50));
    let relay_stats = relay_worker.stop();
    let dispatch_stats = dispatch_worker.stop();

    assert_eq!(relay_stats.published, 5);
    assert_eq!(dispatch_stats.handled, 5);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 5);
    assert_eq!(broker.info().in_flight, 0);
}
