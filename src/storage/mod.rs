#![forbid(unsafe_code)]

//! Record-layer and scan-provider contracts consumed by the engine.
//!
//! The physical storage layer is an external collaborator; the engine only
//! depends on the traits declared here. [`MemoryRecordStore`] implements
//! both contracts in memory.

use crate::query::Predicate;
use crate::schema::EntityDescriptor;
use crate::types::{PartitionId, PenumbraError, Record, Reference, Result, Value};

/// Reference addressing on top of a [`RecordLayer`].
pub mod addressing;

mod memory;

pub use addressing::ReferenceResolver;
pub use memory::MemoryRecordStore;

/// Record storage contract.
///
/// Records are stored without their relationship slots; relationship edges
/// live in the relationship engine's reference maps.
pub trait RecordLayer: Send + Sync {
    /// Resolves a declared identifier to the record's location.
    ///
    /// Fails with [`PenumbraError::NotFound`] when no record carries `identifier`.
    fn resolve_reference(&self, partition: PartitionId, identifier: &Value) -> Result<Reference>;

    /// Loads the record stored at `reference`.
    fn materialize(&self, reference: Reference) -> Result<Record>;

    /// Inserts or replaces the record keyed by its identifier, returning its
    /// location and the record it replaced.
    ///
    /// Reading the old version and writing the new one is a single atomic
    /// step: each version of an identifier is handed back exactly once.
    fn replace(&self, partition: PartitionId, record: &Record) -> Result<(Reference, Option<Record>)>;

    /// Inserts or replaces the record keyed by its identifier.
    fn save(&self, partition: PartitionId, record: &Record) -> Result<Reference> {
        self.replace(partition, record).map(|(reference, _)| reference)
    }

    /// Removes the record (and its index entries) at `reference`.
    fn delete(&self, reference: Reference) -> Result<()>;

    /// Looks a record up by identifier, mapping `NotFound` to `None`.
    fn find(&self, partition: PartitionId, identifier: &Value) -> Result<Option<(Reference, Record)>> {
        let reference = match self.resolve_reference(partition, identifier) {
            Ok(reference) => reference,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err),
        };
        match self.materialize(reference) {
            Ok(record) => Ok(Some((reference, record))),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Callback receiving matched pairs from a scan. May be called concurrently.
pub type ScanSink<'a> = dyn Fn(Reference, Record) -> Result<()> + Sync + 'a;

/// Supplies `(Reference, Record)` pairs matching a predicate.
///
/// Delivery order is unspecified and may be parallel.
pub trait ScanProvider: Send + Sync {
    /// Feeds every record of `entity` matching `predicate` into `sink`.
    fn scan(
        &self,
        entity: &EntityDescriptor,
        predicate: Option<&Predicate>,
        sink: &ScanSink<'_>,
    ) -> Result<()>;
}

/// Storage backend implementing both collaborator contracts.
pub trait RecordStore: RecordLayer + ScanProvider {}

impl<T: RecordLayer + ScanProvider> RecordStore for T {}

pub(crate) fn partition_not_found(partition: PartitionId, identifier: impl ToString) -> PenumbraError {
    PenumbraError::not_found(format!("partition {partition}"), identifier)
}
