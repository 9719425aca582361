use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::query::Predicate;
use crate::schema::EntityDescriptor;
use crate::types::{PartitionId, Record, RecordOffset, Reference, Result, Value};

use super::{partition_not_found, RecordLayer, ScanProvider, ScanSink};

#[derive(Default)]
struct PartitionState {
    by_identifier: FxHashMap<Value, RecordOffset>,
    slots: BTreeMap<RecordOffset, Record>,
    next_offset: u64,
}

/// In-memory record layer and scan provider.
///
/// Each partition sits behind its own lock. Offsets are allocated
/// monotonically and never reused.
#[derive(Default)]
pub struct MemoryRecordStore {
    partitions: RwLock<FxHashMap<PartitionId, Arc<RwLock<PartitionState>>>>,
    parallel_scan: bool,
}

impl MemoryRecordStore {
    /// Creates an empty store with sequential scans.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables rayon-parallel scans.
    pub fn parallel_scan(mut self, enabled: bool) -> Self {
        self.parallel_scan = enabled;
        self
    }

    /// Number of live records in `partition`.
    pub fn len(&self, partition: PartitionId) -> usize {
        self.partitions
            .read()
            .get(&partition)
            .map_or(0, |state| state.read().slots.len())
    }

    /// True if `partition` holds no records.
    pub fn is_empty(&self, partition: PartitionId) -> bool {
        self.len(partition) == 0
    }

    fn partition(&self, partition: PartitionId) -> Option<Arc<RwLock<PartitionState>>> {
        self.partitions.read().get(&partition).cloned()
    }

    fn partition_or_create(&self, partition: PartitionId) -> Arc<RwLock<PartitionState>> {
        if let Some(state) = self.partition(partition) {
            return state;
        }
        let mut partitions = self.partitions.write();
        Arc::clone(partitions.entry(partition).or_default())
    }
}

impl RecordLayer for MemoryRecordStore {
    fn resolve_reference(&self, partition: PartitionId, identifier: &Value) -> Result<Reference> {
        let state = self
            .partition(partition)
            .ok_or_else(|| partition_not_found(partition, identifier))?;
        let guard = state.read();
        guard
            .by_identifier
            .get(identifier)
            .map(|offset| Reference::new(partition, *offset))
            .ok_or_else(|| partition_not_found(partition, identifier))
    }

    fn materialize(&self, reference: Reference) -> Result<Record> {
        let state = self
            .partition(reference.partition)
            .ok_or_else(|| partition_not_found(reference.partition, reference))?;
        let guard = state.read();
        guard
            .slots
            .get(&reference.offset)
            .cloned()
            .ok_or_else(|| partition_not_found(reference.partition, reference))
    }

    fn replace(&self, partition: PartitionId, record: &Record) -> Result<(Reference, Option<Record>)> {
        let state = self.partition_or_create(partition);
        let mut guard = state.write();
        let offset = match guard.by_identifier.get(record.identifier()) {
            Some(offset) => *offset,
            None => {
                let offset = RecordOffset(guard.next_offset);
                guard.next_offset += 1;
                guard
                    .by_identifier
                    .insert(record.identifier().clone(), offset);
                offset
            }
        };
        let previous = guard.slots.insert(offset, record.detached());
        trace!(partition = %partition, offset = %offset, replaced = previous.is_some(), "memory_store.save");
        Ok((Reference::new(partition, offset), previous))
    }

    fn delete(&self, reference: Reference) -> Result<()> {
        let state = self
            .partition(reference.partition)
            .ok_or_else(|| partition_not_found(reference.partition, reference))?;
        let mut guard = state.write();
        let record = guard
            .slots
            .remove(&reference.offset)
            .ok_or_else(|| partition_not_found(reference.partition, reference))?;
        guard.by_identifier.remove(record.identifier());
        trace!(partition = %reference.partition, offset = %reference.offset, "memory_store.delete");
        Ok(())
    }
}

impl ScanProvider for MemoryRecordStore {
    fn scan(
        &self,
        entity: &EntityDescriptor,
        predicate: Option<&Predicate>,
        sink: &ScanSink<'_>,
    ) -> Result<()> {
        let Some(state) = self.partition(entity.partition) else {
            return Ok(());
        };
        let guard = state.read();
        let partition = entity.partition;
        let visit = |(offset, record): (&RecordOffset, &Record)| -> Result<()> {
            if predicate.map_or(true, |p| p.matches(entity, record)) {
                sink(Reference::new(partition, *offset), record.clone())?;
            }
            Ok(())
        };
        if self.parallel_scan {
            guard.slots.par_iter().try_for_each(visit)
        } else {
            guard.slots.iter().try_for_each(visit)
        }
    }
}
