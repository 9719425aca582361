#![forbid(unsafe_code)]

//! Addressing primitives, values, records, and the crate-wide error type.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

mod error;
mod record;
mod value;

pub use error::{PenumbraError, Result};
pub use record::{Record, RelationshipValue};
pub use value::Value;

/// Storage partition holding the records of one entity type.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize, Deserialize,
)]
pub struct PartitionId(pub u32);

/// Slot offset of a record inside its partition.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct RecordOffset(pub u64);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RecordOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PartitionId {
    fn from(value: u32) -> Self {
        PartitionId(value)
    }
}

impl From<u64> for RecordOffset {
    fn from(value: u64) -> Self {
        RecordOffset(value)
    }
}

/// Durable location key identifying exactly one physical record slot.
///
/// Two references are equal iff both partition and offset are equal.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct Reference {
    /// Partition owning the slot.
    pub partition: PartitionId,
    /// Offset of the slot within the partition.
    pub offset: RecordOffset,
}

impl Reference {
    /// Creates a reference from its two coordinates.
    pub fn new(partition: PartitionId, offset: RecordOffset) -> Self {
        Self { partition, offset }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.partition, self.offset)
    }
}

/// Relationship endpoint identity: `(identifier, partition)` plus a lazily
/// resolved offset.
///
/// Equality and hashing ignore the offset; it is a cache filled at most once.
#[derive(Clone, Debug)]
pub struct RelationshipReference {
    identifier: Value,
    partition: PartitionId,
    offset: OnceLock<RecordOffset>,
}

impl RelationshipReference {
    /// Creates an unresolved endpoint.
    pub fn new(identifier: Value, partition: PartitionId) -> Self {
        Self {
            identifier,
            partition,
            offset: OnceLock::new(),
        }
    }

    /// Creates an endpoint whose offset is already known.
    pub fn resolved(identifier: Value, reference: Reference) -> Self {
        let this = Self::new(identifier, reference.partition);
        let _ = this.offset.set(reference.offset);
        this
    }

    /// Declared primary key of the endpoint record.
    pub fn identifier(&self) -> &Value {
        &self.identifier
    }

    /// Partition of the endpoint record.
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Cached offset, if this endpoint has been resolved.
    pub fn cached_offset(&self) -> Option<RecordOffset> {
        self.offset.get().copied()
    }

    /// Cached location, if resolved.
    pub fn cached_reference(&self) -> Option<Reference> {
        self.cached_offset()
            .map(|offset| Reference::new(self.partition, offset))
    }

    /// Records the resolved offset. Later calls keep the first value.
    pub fn cache_offset(&self, offset: RecordOffset) {
        let _ = self.offset.set(offset);
    }
}

impl PartialEq for RelationshipReference {
    fn eq(&self, other: &Self) -> bool {
        self.partition == other.partition && self.identifier == other.identifier
    }
}

impl Eq for RelationshipReference {}

impl Hash for RelationshipReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.partition.hash(state);
        self.identifier.hash(state);
    }
}

impl PartialOrd for RelationshipReference {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RelationshipReference {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.partition
            .cmp(&other.partition)
            .then_with(|| self.identifier.cmp(&other.identifier))
    }
}

impl fmt::Display for RelationshipReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.partition, self.identifier)
    }
}
