use std::fmt;

/// Misuse of the API — conflicting parameters or writes against a read-only
/// temporal load. These fail fast and are never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    /// `at_version` and `as_of` are mutually exclusive.
    ConflictingTemporalBounds,
    /// Recording events on an aggregate loaded at a historical bound.
    ReadOnlyAggregate { id: String },
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsageError::ConflictingTemporalBounds => {
                write!(f, "at_version and as_of cannot both be set")
            }
            UsageError::ReadOnlyAggregate { id } => {
                write!(f, "aggregate {} was loaded read-only at a temporal bound", id)
            }
        }
    }
}

impl std::error::Error for UsageError {}

/// Errors from the event store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The stream moved past the caller's expected version — a lost update.
    /// Never auto-retried by the store.
    ConcurrencyConflict {
        stream: String,
        expected: i64,
        actual: i64,
    },
    /// A stored message could not be decoded into a known shape.
    Deserialization {
        stream: String,
        message_type: String,
        message: String,
    },
    LockPoisoned(&'static str),
    Usage(UsageError),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::ConcurrencyConflict {
                stream,
                expected,
                actual,
            } => write!(
                f,
                "concurrent write detected on stream {} (expected version {}, got {})",
                stream, expected, actual
            ),
            StoreError::Deserialization {
                stream,
                message_type,
                message,
            } => write!(
                f,
                "cannot deserialize {} message on stream {}: {}",
                message_type, stream, message
            ),
            StoreError::LockPoisoned(operation) => {
                write!(f, "store lock poisoned during {}", operation)
            }
            StoreError::Usage(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Usage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<UsageError> for StoreError {
    fn from(err: UsageError) -> Self {
        StoreError::Usage(err)
    }
}

/// Error publishing a relayed message to its destination.
#[derive(Debug)]
pub enum PublishError {
    ConnectionFailed(String),
    Rejected(String),
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::ConnectionFailed(msg) => write!(f, "connection failed: {}", msg),
            PublishError::Rejected(msg) => write!(f, "message rejected: {}", msg),
            PublishError::Other(e) => write!(f, "publish error: {}", e),
        }
    }
}

impl std::error::Error for PublishError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PublishError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// A handler rejected or failed to process a message.
///
/// One failure nacks only the message it belongs to; the dispatch loop
/// itself never propagates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        HandlerError {
            message: message.into(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler failed: {}", self.message)
    }
}

impl std::error::Error for HandlerError {}
