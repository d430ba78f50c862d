use serde::{Deserialize, Serialize};

/// Message type used for snapshot messages.
pub const SNAPSHOT_MESSAGE_TYPE: &str = "Snapshot";

/// Snapshot substream for one aggregate instance.
///
/// The `:` marker keeps the substream's category (`order:snapshot`) disjoint
/// from the entity category (`order`), so category reads never see
/// snapshots.
pub fn snapshot_stream(category: &str, id: &str) -> String {
    format!("{}:snapshot-{}", category, id)
}

/// Materialized aggregate state at a known stream version.
///
/// Multiple snapshots may coexist on the substream; loaders pick the latest
/// one at or below the requested bound.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Stream version the state reflects.
    pub version: i64,
    /// Bitcode-encoded aggregate state.
    pub state: Vec<u8>,
}
