//! Schema evolution through the store: old payloads read back in the
//! current shape.

use serde::{Deserialize, Serialize};

use event_relay::{
    EventStore, InMemoryEventStore, ProposedMessage, UpcasterChain, UpcasterEdge,
};

#[derive(Serialize, Deserialize)]
struct PlacedV1 {
    sku: String,
}

#[derive(Serialize, Deserialize, PartialEq, Debug)]
struct PlacedV2 {
    sku: String,
    quantity: u32,
}

#[derive(Serialize, Deserialize, PartialEq, Debug)]
struct PlacedV3 {
    sku: String,
    quantity: u32,
    channel: String,
}

// v1 rows predate quantities; one unit was implied.
fn v1_to_v2(payload: &[u8]) -> Vec<u8> {
    let old: PlacedV1 = bitcode::deserialize(payload).expect("v1 payload");
    bitcode::serialize(&PlacedV2 {
        sku: old.sku,
        quantity: 1,
    })
    .expect("v2 payload")
}

// v2 rows predate channel tracking; all were web orders.
fn v2_to_v3(payload: &[u8]) -> Vec<u8> {
    let old: PlacedV2 = bitcode::deserialize(payload).expect("v2 payload");
    bitcode::serialize(&PlacedV3 {
        sku: old.sku,
        quantity: old.quantity,
        channel: "web".into(),
    })
    .expect("v3 payload")
}

fn chain() -> UpcasterChain {
    UpcasterChain::build(&[
        UpcasterEdge {
            event_type: "OrderPlaced",
            from_version: 1,
            to_version: 2,
            transform: v1_to_v2,
        },
        UpcasterEdge {
            event_type: "OrderPlaced",
            from_version: 2,
            to_version: 3,
            transform: v2_to_v3,
        },
    ])
    .expect("convergent chain")
}

#[test]
fn oldest_version_reads_back_as_current_schema() {
    let store = InMemoryEventStore::new().with_upcasters(chain());

    store
        .append(
            "order-1",
            vec![ProposedMessage::event(
                "OrderPlaced",
                &PlacedV1 { sku: "abc".into() },
            )],
            None,
        )
        .unwrap();

    let message = store.read_last("order-1").unwrap().unwrap();
    assert_eq!(message.metadata.schema_version, 3);

    // Upcasting the oldest payload equals constructing the current event
    // from equivalent modern data.
    let upcast: PlacedV3 = message.decode().unwrap();
    let direct = PlacedV3 {
        sku: "abc".into(),
        quantity: 1,
        channel: "web".into(),
    };
    assert_eq!(upcast, direct);
}

#[test]
fn mid_chain_and_current_versions_resolve() {
    let store = InMemoryEventStore::new().with_upcasters(chain());

    store
        .append(
            "order-2",
            vec![
                ProposedMessage::event(
                    "OrderPlaced",
                    &PlacedV2 {
                        sku: "mid".into(),
                        quantity: 4,
                    },
                )
                .with_schema_version(2),
                ProposedMessage::event(
                    "OrderPlaced",
                    &PlacedV3 {
                        sku: "new".into(),
                        quantity: 2,
                        channel: "store".into(),
                    },
                )
                .with_schema_version(3),
            ],
            None,
        )
        .unwrap();

    let messages = store.read("order-2", 0, 10).unwrap();
    let mid: PlacedV3 = messages[0].decode().unwrap();
    assert_eq!(mid.quantity, 4);
    assert_eq!(mid.channel, "web");

    let current: PlacedV3 = messages[1].decode().unwrap();
    assert_eq!(current.channel, "store");
    assert_eq!(messages[1].metadata.schema_version, 3);
}

#[test]
fn unrelated_event_types_pass_through() {
    let store = InMemoryEventStore::new().with_upcasters(chain());

    store
        .append(
            "order-3",
            vec![ProposedMessage::event("OrderShipped", &"carrier")],
            None,
        )
        .unwrap();

    let message = store.read_last("order-3").unwrap().unwrap();
    assert_eq!(message.metadata.schema_version, 1);
    assert_eq!(message.decode::<String>().unwrap(), "carrier");
}
