use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHasher};

use crate::schema::{Cardinality, SchemaContext};
use crate::types::{PenumbraError, RelationshipReference, Result};

use super::lock_table::EntryLockTable;

/// Ordered set of relationship endpoints.
pub type ReferenceSet = BTreeSet<RelationshipReference>;

/// Dense identifier of a relationship map, used for lock striping.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct MapId(pub u32);

type Shard = RwLock<FxHashMap<RelationshipReference, ReferenceSet>>;

/// Durable edge list of one `(entity type, relationship)` pair.
///
/// Storage is sharded by parent endpoint; shard locks are held only for a
/// single get/put. Read-modify-write sequences are serialized by the entry
/// locks of the owning [`RelationshipStore`], so mutators are crate-private.
pub struct RelationshipReferenceMap {
    id: MapId,
    entity: String,
    relationship: String,
    cardinality: Cardinality,
    shards: Vec<Shard>,
}

impl RelationshipReferenceMap {
    fn new(id: MapId, entity: &str, relationship: &str, cardinality: Cardinality, shards: usize) -> Self {
        let count = shards.max(1);
        Self {
            id,
            entity: entity.to_owned(),
            relationship: relationship.to_owned(),
            cardinality,
            shards: (0..count).map(|_| RwLock::new(FxHashMap::default())).collect(),
        }
    }

    /// Map identifier.
    pub fn id(&self) -> MapId {
        self.id
    }

    /// Owning entity type.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Relationship name.
    pub fn relationship(&self) -> &str {
        &self.relationship
    }

    /// Declared cardinality.
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    fn shard(&self, parent: &RelationshipReference) -> &Shard {
        let mut hasher = FxHasher::default();
        parent.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Children currently attached to `parent` (empty if none).
    pub fn get(&self, parent: &RelationshipReference) -> ReferenceSet {
        self.shard(parent)
            .read()
            .get(parent)
            .cloned()
            .unwrap_or_default()
    }

    /// True if `child` is attached to `parent`.
    pub fn contains(&self, parent: &RelationshipReference, child: &RelationshipReference) -> bool {
        self.shard(parent)
            .read()
            .get(parent)
            .is_some_and(|set| set.contains(child))
    }

    /// Number of parents with at least one child.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    /// True if no parent has children.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every entry.
    pub fn entries(&self) -> Vec<(RelationshipReference, ReferenceSet)> {
        let mut out = Vec::new();
        for shard in &self.shards {
            out.extend(
                shard
                    .read()
                    .iter()
                    .map(|(parent, set)| (parent.clone(), set.clone())),
            );
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Replaces the entry; an empty set removes it. Returns the previous set.
    pub(crate) fn put(&self, parent: RelationshipReference, children: ReferenceSet) -> ReferenceSet {
        let mut shard = self.shard(&parent).write();
        if children.is_empty() {
            shard.remove(&parent).unwrap_or_default()
        } else {
            shard.insert(parent, children).unwrap_or_default()
        }
    }

    /// Reads and clears the entry.
    pub(crate) fn take(&self, parent: &RelationshipReference) -> ReferenceSet {
        self.shard(parent).write().remove(parent).unwrap_or_default()
    }

    /// Attaches one child.
    pub(crate) fn insert(&self, parent: &RelationshipReference, child: RelationshipReference) {
        self.shard(parent)
            .write()
            .entry(parent.clone())
            .or_default()
            .insert(child);
    }

    /// Detaches one child; returns whether it was attached.
    pub(crate) fn remove_child(&self, parent: &RelationshipReference, child: &RelationshipReference) -> bool {
        let mut shard = self.shard(parent).write();
        let Some(set) = shard.get_mut(parent) else {
            return false;
        };
        let removed = set.remove(child);
        if set.is_empty() {
            shard.remove(parent);
        }
        removed
    }
}

/// Every relationship map of a schema plus the shared entry-lock table.
pub struct RelationshipStore {
    maps: FxHashMap<String, FxHashMap<String, Arc<RelationshipReferenceMap>>>,
    locks: EntryLockTable,
}

impl RelationshipStore {
    /// Creates one empty map per declared relationship.
    pub fn new(schema: &SchemaContext, lock_stripes: usize, map_shards: usize) -> Self {
        let mut maps: FxHashMap<String, FxHashMap<String, Arc<RelationshipReferenceMap>>> =
            FxHashMap::default();
        let mut entities: Vec<_> = schema.entities().collect();
        entities.sort_by(|a, b| a.name.cmp(&b.name));
        let mut next_id = 0u32;
        for entity in entities {
            let per_entity = maps.entry(entity.name.clone()).or_default();
            for relationship in &entity.relationships {
                let map = RelationshipReferenceMap::new(
                    MapId(next_id),
                    &entity.name,
                    &relationship.name,
                    relationship.cardinality,
                    map_shards,
                );
                next_id += 1;
                per_entity.insert(relationship.name.clone(), Arc::new(map));
            }
        }
        Self {
            maps,
            locks: EntryLockTable::new(lock_stripes),
        }
    }

    /// Map for `entity.relationship`.
    pub fn map(&self, entity: &str, relationship: &str) -> Result<&Arc<RelationshipReferenceMap>> {
        self.maps
            .get(entity)
            .and_then(|per_entity| per_entity.get(relationship))
            .ok_or_else(|| PenumbraError::unknown_relationship(entity, relationship))
    }

    pub(crate) fn locks(&self) -> &EntryLockTable {
        &self.locks
    }
}
