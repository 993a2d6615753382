use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a purchase, booking or other generated entity.
///
/// Wraps a UUID so that entity ids cannot be mixed up with other UUID-based
/// values such as event ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(Uuid);

impl AggregateId {
    /// Creates a new random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an id from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Returns the first eight hex digits, upper-cased.
    ///
    /// Used for human-facing references such as confirmation numbers.
    pub fn short_code(&self) -> String {
        self.0.simple().to_string()[..8].to_ascii_uppercase()
    }
}

impl Default for AggregateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AggregateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AggregateId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for AggregateId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<AggregateId> for Uuid {
    fn from(id: AggregateId) -> Self {
        id.0
    }
}

/// Name of an event stream in the journal, e.g. `coupon-SAVE20`.
///
/// Every consistency boundary (a purchase, a coupon, a workshop session, the
/// calendar) owns exactly one stream, and writes to it are serialised by the
/// stream version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    /// Creates a stream id from a raw name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Creates a stream id of the form `{category}-{key}`.
    pub fn of(category: &str, key: impl std::fmt::Display) -> Self {
        Self(format!("{category}-{key}"))
    }

    /// Returns the stream name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the part of the name before the first `-`.
    pub fn category(&self) -> &str {
        self.0.split('-').next().unwrap_or_default()
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for StreamId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
