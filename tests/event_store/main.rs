//! End-to-end store behavior: optimistic concurrency, category ordering,
//! snapshots, and temporal loads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use event_relay::{
    Aggregate, AggregateRoot, AggregateStore, Clock, EventStore, InMemoryEventStore, LoadOpts,
    ManualClock, Message, ProposedMessage, StoreError, UsageError,
};

#[derive(Default, Serialize, Deserialize)]
struct Order {
    lines: Vec<String>,
    placed: bool,
}

impl Aggregate for Order {
    fn category() -> &'static str {
        "order"
    }

    fn apply(&mut self, event_type: &str, data: &[u8]) -> Result<(), String> {
        match event_type {
            "OrderPlaced" => {
                self.placed = true;
                Ok(())
            }
            "LineAdded" => {
                let sku: String = bitcode::deserialize(data).map_err(|e| e.to_string())?;
                self.lines.push(sku);
                Ok(())
            }
            other => Err(format!("unknown event type: {}", other)),
        }
    }
}

#[test]
fn first_append_wins_at_expected_version() {
    let store = InMemoryEventStore::new();

    let position = store
        .append(
            "order-1",
            vec![ProposedMessage::event("OrderPlaced", &())],
            Some(-1),
        )
        .unwrap();
    assert_eq!(position, 0);

    let err = store
        .append(
            "order-1",
            vec![ProposedMessage::event("OrderPlaced", &())],
            Some(-1),
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::ConcurrencyConflict { .. }));
}

#[test]
fn concurrent_appends_with_same_expectation_one_wins() {
    let store = Arc::new(InMemoryEventStore::new());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                store.append(
                    "order-9",
                    vec![ProposedMessage::event("OrderPlaced", &i)],
                    Some(-1),
                )
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    assert_eq!(store.stream_version("order-9").unwrap(), 0);
}

#[test]
fn category_read_orders_across_streams_by_global_position() {
    let store = InMemoryEventStore::new();
    store
        .append("order-1", vec![ProposedMessage::event("LineAdded", &"a")], None)
        .unwrap();
    store
        .append("order-2", vec![ProposedMessage::event("LineAdded", &"b")], None)
        .unwrap();
    store
        .append("order-1", vec![ProposedMessage::event("LineAdded", &"c")], None)
        .unwrap();

    let messages = store.read("order", 0, 100).unwrap();
    let payloads: Vec<String> = messages.iter().map(|m| m.decode().unwrap()).collect();
    assert_eq!(payloads, vec!["a", "b", "c"]);

    let positions: Vec<u64> = messages.iter().map(|m| m.metadata.global_position).collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
}

/// Store wrapper that counts messages read per stream, to observe how much
/// replay a load actually performs.
#[derive(Clone)]
struct CountingStore {
    inner: InMemoryEventStore,
    event_reads: Arc<AtomicUsize>,
}

impl EventStore for CountingStore {
    fn append(
        &self,
        stream: &str,
        batch: Vec<ProposedMessage>,
        expected_version: Option<i64>,
    ) -> Result<i64, StoreError> {
        self.inner.append(stream, batch, expected_version)
    }

    fn read(
        &self,
        stream_or_category: &str,
        position: u64,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let messages = self.inner.read(stream_or_category, position, limit)?;
        if !stream_or_category.contains(":snapshot") {
            self.event_reads.fetch_add(messages.len(), Ordering::SeqCst);
        }
        Ok(messages)
    }

    fn read_last(&self, stream: &str) -> Result<Option<Message>, StoreError> {
        self.inner.read_last(stream)
    }

    fn stream_version(&self, stream: &str) -> Result<i64, StoreError> {
        self.inner.stream_version(stream)
    }
}

#[test]
fn snapshot_bounds_replay_to_events_past_the_threshold() {
    let counting = CountingStore {
        inner: InMemoryEventStore::new(),
        event_reads: Arc::new(AtomicUsize::new(0)),
    };
    let store = AggregateStore::<Order, _>::new(counting.clone()).with_snapshots(10);

    let mut root = AggregateRoot::<Order>::new("42");
    for i in 0..12 {
        root.record("LineAdded", &format!("sku-{}", i)).unwrap();
        store.save(&mut root).unwrap();
    }

    // A snapshot exists capturing state through the tenth event.
    let snapshot = counting
        .inner
        .read_last("order:snapshot-42")
        .unwrap()
        .expect("snapshot written after tenth event");
    let record: event_relay::SnapshotRecord = bitcode::deserialize(&snapshot.data).unwrap();
    assert_eq!(record.version, 9);

    // A fresh load replays only the two events past the snapshot.
    counting.event_reads.store(0, Ordering::SeqCst);
    let loaded = store.load("42").unwrap();
    assert_eq!(loaded.state().lines.len(), 12);
    assert_eq!(loaded.version(), 11);
    assert_eq!(counting.event_reads.load(Ordering::SeqCst), 2);
}

#[test]
fn at_version_and_as_of_are_mutually_exclusive() {
    let store = AggregateStore::<Order, _>::new(InMemoryEventStore::new());
    let err = store
        .load_at(
            "1",
            LoadOpts {
                at_version: Some(3),
                as_of: Some(SystemTime::now()),
            },
        )
        .unwrap_err();
    assert_eq!(err, StoreError::Usage(UsageError::ConflictingTemporalBounds));
}

#[test]
fn as_of_load_stops_at_the_bound_and_is_read_only() {
    let clock = ManualClock::starting_at(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000));
    let backing = InMemoryEventStore::new().with_clock(Arc::new(clock.clone()));
    let store = AggregateStore::<Order, _>::new(backing);

    let mut root = AggregateRoot::<Order>::new("7");
    root.record("LineAdded", &"early").unwrap();
    store.save(&mut root).unwrap();
    let cutoff = clock.now();

    clock.advance(Duration::from_secs(60));
    root.record("LineAdded", &"late").unwrap();
    store.save(&mut root).unwrap();

    let bounded = store.load_at("7", LoadOpts::as_of(cutoff)).unwrap();
    assert_eq!(bounded.state().lines, vec!["early"]);
    assert!(bounded.is_read_only());

    let mut bounded = bounded;
    let err = bounded.record("LineAdded", &"no").unwrap_err();
    assert!(matches!(
        err,
        StoreError::Usage(UsageError::ReadOnlyAggregate { .. })
    ));

    // An unbounded load still sees everything.
    let current = store.load("7").unwrap();
    assert_eq!(current.state().lines, vec!["early", "late"]);
}

#[test]
fn conflict_preserves_pending_events_for_retry() {
    let shared = InMemoryEventStore::new();
    let store = AggregateStore::<Order, _>::new(shared.clone());

    let mut root = AggregateRoot::<Order>::new("3");
    root.record("OrderPlaced", &()).unwrap();
    store.save(&mut root).unwrap();

    let mut stale = store.load("3").unwrap();
    let mut fresh = store.load("3").unwrap();
    fresh.record("LineAdded", &"sku").unwrap();
    store.save(&mut fresh).unwrap();

    stale.record("LineAdded", &"other").unwrap();
    let err = store.save(&mut stale).unwrap_err();
    assert!(matches!(err, StoreError::ConcurrencyConflict { .. }));
    assert_eq!(stale.pending().len(), 1);

    // Reload and re-record succeeds.
    let mut reloaded = store.load("3").unwrap();
    reloaded.record("LineAdded", &"other").unwrap();
    store.save(&mut reloaded).unwrap();
    assert_eq!(store.load("3").unwrap().state().lines, vec!["sku", "other"]);
}
