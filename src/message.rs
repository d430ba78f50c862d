use std::time::SystemTime;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Whether a message records something that happened or requests something
/// to happen. Routing differs (events fan out, commands are point-to-point)
/// but the wire shape is the same.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Event,
    Command,
}

/// Metadata carried alongside every message payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Position of this message within its stream (0-based).
    pub version: i64,
    /// Store-wide monotonic sequence number.
    pub global_position: u64,
    /// The writer's expected stream version at append time, if any.
    pub expected_version: Option<i64>,
    /// Stream the message originated from, when relayed across streams.
    pub origin_stream: Option<String>,
    pub timestamp: SystemTime,
    pub kind: MessageKind,
    /// Schema version of the payload, consulted by the upcaster chain.
    pub schema_version: u64,
    /// Caller-supplied token deduplicating repeated submissions.
    pub idempotency_key: Option<String>,
}

/// An immutable message in a stream: event or command.
///
/// The payload is bitcode-encoded bytes; base64 when rendered through a
/// human-readable serializer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub message_type: String,
    pub stream: String,
    #[serde(with = "payload_serde")]
    pub data: Vec<u8>,
    pub metadata: Metadata,
}

mod payload_serde {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(payload: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            STANDARD.encode(payload).serialize(serializer)
        } else {
            payload.serialize(serializer)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s: String = String::deserialize(deserializer)?;
            STANDARD.decode(&s).map_err(serde::de::Error::custom)
        } else {
            Vec::<u8>::deserialize(deserializer)
        }
    }
}

impl Message {
    /// Decode the payload into the given type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, bitcode::Error> {
        bitcode::deserialize(&self.data)
    }

    /// Serialize the whole message for transport (outbox rows, broker
    /// payloads).
    pub fn encode_transport(&self) -> Vec<u8> {
        bitcode::serialize(self).expect("message is always bitcode-serializable")
    }

    /// Deserialize a message from its transport encoding.
    pub fn decode_transport(bytes: &[u8]) -> Result<Message, bitcode::Error> {
        bitcode::deserialize(bytes)
    }

    /// Category of the message's stream.
    pub fn category(&self) -> &str {
        category(&self.stream)
    }
}

/// A message proposed for appending: everything the caller supplies, with
/// positions and timestamps assigned by the store.
#[derive(Clone, Debug, PartialEq)]
pub struct ProposedMessage {
    pub message_type: String,
    pub data: Vec<u8>,
    pub kind: MessageKind,
    pub schema_version: u64,
    pub origin_stream: Option<String>,
    pub idempotency_key: Option<String>,
}

impl ProposedMessage {
    /// Propose an event with a serializable payload.
    pub fn event<T: Serialize>(message_type: impl Into<String>, payload: &T) -> Self {
        ProposedMessage {
            message_type: message_type.into(),
            data: bitcode::serialize(payload).expect("failed to serialize payload"),
            kind: MessageKind::Event,
            schema_version: 1,
            origin_stream: None,
            idempotency_key: None,
        }
    }

    /// Propose a command with a serializable payload.
    pub fn command<T: Serialize>(message_type: impl Into<String>, payload: &T) -> Self {
        ProposedMessage {
            kind: MessageKind::Command,
            ..Self::event(message_type, payload)
        }
    }

    pub fn with_schema_version(mut self, version: u64) -> Self {
        self.schema_version = version;
        self
    }

    pub fn with_origin_stream(mut self, stream: impl Into<String>) -> Self {
        self.origin_stream = Some(stream.into());
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Category of a stream name: the prefix before the first `-`.
///
/// `order-1` belongs to category `order`; a name without a `-` is itself a
/// category. Snapshot substreams use a `:` marker (`order:snapshot-1`) so
/// their category (`order:snapshot`) never collides with the entity
/// category.
pub fn category(stream: &str) -> &str {
    match stream.find('-') {
        Some(idx) => &stream[..idx],
        None => stream,
    }
}

/// Whether a stream name refers to a whole category rather than one stream.
pub fn is_category(name: &str) -> bool {
    !name.contains('-')
}

/// Generate a message id.
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
