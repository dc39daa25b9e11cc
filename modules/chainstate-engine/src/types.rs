//! Core types for the state cache. Domain-agnostic.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sentinel event delivered when the feed starts replaying history.
pub const SYNC_STATUS_SYNCING: &str = "SYNC_STATUS_SYNCING";

/// Sentinel event delivered once the feed has caught up with chain head.
pub const SYNC_STATUS_SYNCED: &str = "SYNC_STATUS_SYNCED";

// ---------------------------------------------------------------------------
// Keys and pointers
// ---------------------------------------------------------------------------

/// Identity of a cached entity: an address or a numeric id.
///
/// Hex addresses are lower-cased on construction so that checksummed and
/// plain spellings of the same address collapse to one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        if raw.starts_with("0x") || raw.starts_with("0X") {
            Self(raw.to_ascii_lowercase())
        } else {
            Self(raw)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityKey {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for EntityKey {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

/// On-chain reference to a payload in the content-addressed store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pointer(String);

impl Pointer {
    /// Wrap a raw pointer value. Empty strings mean "nothing here".
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// A cached record. Only resolved payloads are ever stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity<P> {
    pub key: EntityKey,
    pub data: P,
}

impl<P> Entity<P> {
    pub fn new(key: EntityKey, data: P) -> Self {
        Self { key, data }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// An event as delivered by the chain subscription feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub event: String,
    #[serde(rename = "returnValues", default)]
    pub return_values: serde_json::Map<String, serde_json::Value>,
}

impl RawEvent {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            return_values: serde_json::Map::new(),
        }
    }

    pub fn with_value(mut self, field: &str, value: impl Into<serde_json::Value>) -> Self {
        self.return_values.insert(field.to_string(), value.into());
        self
    }

    pub fn syncing() -> Self {
        Self::new(SYNC_STATUS_SYNCING)
    }

    pub fn synced() -> Self {
        Self::new(SYNC_STATUS_SYNCED)
    }
}

/// What the driver made of a raw event.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivered<E> {
    /// One of the two sync sentinels. `true` while replaying history.
    SyncStatus(bool),
    Domain(E),
    /// No transition is registered for this name. Passed through unchanged.
    Unknown(String),
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

/// The unit of state a change writes. Commits are validated per slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    Entity {
        collection: &'static str,
        key: EntityKey,
    },
    Field(&'static str),
}

impl Slot {
    pub fn entity(collection: &'static str, key: EntityKey) -> Self {
        Slot::Entity { collection, key }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Entity { collection, key } => write!(f, "{collection}/{key}"),
            Slot::Field(name) => f.write_str(name),
        }
    }
}
