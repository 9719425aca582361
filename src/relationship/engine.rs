use std::sync::Arc;

use tracing::{debug, trace};

use crate::db::DbOptions;
use crate::metrics::EngineMetrics;
use crate::schema::{
    Cardinality, CascadePolicy, EntityDescriptor, FetchPolicy, RelationshipDescriptor,
    SchemaContext, UpdatePolicy,
};
use crate::storage::{RecordLayer, ReferenceResolver};
use crate::types::{
    PenumbraError, Record, Reference, RelationshipReference, RelationshipValue, Result, Value,
};

use super::lazy::LazyRelationshipList;
use super::manager::EntityRelationshipManager;
use super::reference_map::{ReferenceSet, RelationshipReferenceMap, RelationshipStore};

/// Receives every record the engine writes or deletes, cascades included.
pub trait EntityObserver: Send + Sync {
    /// Called after `current` (relationship slots stripped) was stored at
    /// `reference`. `previous` is the version it replaced, if any.
    fn entity_saved(
        &self,
        entity: &EntityDescriptor,
        reference: Reference,
        previous: Option<&Record>,
        current: &Record,
    );

    /// Called after the record formerly stored at `reference` was deleted.
    fn entity_deleted(&self, entity: &EntityDescriptor, reference: Reference, record: &Record);
}

/// Observer that ignores every event.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl EntityObserver for NoopObserver {
    fn entity_saved(&self, _: &EntityDescriptor, _: Reference, _: Option<&Record>, _: &Record) {}

    fn entity_deleted(&self, _: &EntityDescriptor, _: Reference, _: &Record) {}
}

struct EngineInner {
    schema: Arc<SchemaContext>,
    resolver: ReferenceResolver,
    store: RelationshipStore,
    observer: Arc<dyn EntityObserver>,
    metrics: Arc<dyn EngineMetrics>,
    lazy_page_size: usize,
}

type InverseSide<'a> = Option<(&'a RelationshipDescriptor, &'a Arc<RelationshipReferenceMap>)>;

/// Save, delete, hydrate and update-all over the relationship graph.
///
/// The engine never holds pointers between records: edges are
/// [`RelationshipReference`] sets in per-relationship maps, and recursion
/// through cyclic graphs is bounded by the caller's
/// [`EntityRelationshipManager`]. Cloning is cheap and shares all state.
#[derive(Clone)]
pub struct RelationshipEngine {
    inner: Arc<EngineInner>,
}

impl RelationshipEngine {
    /// Creates an engine over `records` with empty relationship maps.
    pub fn new(
        schema: Arc<SchemaContext>,
        records: Arc<dyn RecordLayer>,
        options: &DbOptions,
        observer: Arc<dyn EntityObserver>,
    ) -> Self {
        let store = RelationshipStore::new(&schema, options.lock_stripes, options.map_shards);
        let resolver = ReferenceResolver::new(records, Arc::clone(&schema));
        Self {
            inner: Arc::new(EngineInner {
                schema,
                resolver,
                store,
                observer,
                metrics: options.metrics_sink(),
                lazy_page_size: options.lazy_page_size.max(1),
            }),
        }
    }

    /// Schema the engine was built for.
    pub fn schema(&self) -> &Arc<SchemaContext> {
        &self.inner.schema
    }

    /// Identifier/location resolver.
    pub fn resolver(&self) -> &ReferenceResolver {
        &self.inner.resolver
    }

    /// Relationship maps.
    pub fn store(&self) -> &RelationshipStore {
        &self.inner.store
    }

    /// Persists `record`, then every materialized relationship slot.
    ///
    /// A record already visited in this call tree is not written again; its
    /// current location is returned instead.
    pub fn save_entity(
        &self,
        record: &mut Record,
        visited: &mut EntityRelationshipManager,
    ) -> Result<Reference> {
        let entity = Arc::clone(self.inner.schema.entity(record.entity())?);
        entity.validate_record(record)?;
        let endpoint = self.inner.resolver.relationship_reference_for(record)?;
        if !visited.mark(endpoint.clone()) {
            return self.inner.resolver.resolve(&endpoint);
        }

        let records = self.inner.resolver.records();
        let (reference, previous) = records.replace(entity.partition, record)?;
        endpoint.cache_offset(reference.offset);
        debug!(entity = %entity.name, id = %record.identifier(), %reference, "relationship.save_entity");

        for relationship in &entity.relationships {
            self.save_relationship(&entity, relationship, record, &endpoint, visited)?;
        }

        self.inner.metrics.entity_saved();
        self.inner.observer.entity_saved(
            &entity,
            reference,
            previous.as_ref(),
            &record.detached(),
        );
        Ok(reference)
    }

    /// Deletes `record`'s relationships, then the record itself.
    ///
    /// Fails with [`PenumbraError::NotFound`] when the record is not stored.
    pub fn delete_entity(
        &self,
        record: &Record,
        visited: &mut EntityRelationshipManager,
    ) -> Result<()> {
        self.inner.schema.entity(record.entity())?;
        let endpoint = self.inner.resolver.relationship_reference_for(record)?;
        self.delete_endpoint(&endpoint, visited, true)?;
        Ok(())
    }

    /// Hydrates every relationship slot of `record`.
    ///
    /// A record already visited in this call tree is left shallow.
    pub fn hydrate_entity(
        &self,
        record: &mut Record,
        visited: &mut EntityRelationshipManager,
        force: bool,
    ) -> Result<()> {
        let entity = Arc::clone(self.inner.schema.entity(record.entity())?);
        let endpoint = self.inner.resolver.relationship_reference_for(record)?;
        if !visited.mark(endpoint.clone()) {
            return Ok(());
        }
        for relationship in &entity.relationships {
            self.hydrate_relationship(&entity, relationship, record, &endpoint, visited, force)?;
        }
        Ok(())
    }

    /// Saves one relationship slot of an already stored `record`.
    pub fn save_relationship_for_entity(
        &self,
        record: &mut Record,
        relationship: &str,
        visited: &mut EntityRelationshipManager,
    ) -> Result<()> {
        let entity = Arc::clone(self.inner.schema.entity(record.entity())?);
        let descriptor = entity.relationship_descriptor(relationship)?;
        let parent = self.inner.resolver.relationship_reference_for(record)?;
        visited.mark(parent.clone());
        self.save_relationship(&entity, descriptor, record, &parent, visited)
    }

    /// Clears one relationship of `record`, detaching and cascading as declared.
    pub fn delete_relationship_for_entity(
        &self,
        record: &Record,
        relationship: &str,
        visited: &mut EntityRelationshipManager,
    ) -> Result<()> {
        let entity = Arc::clone(self.inner.schema.entity(record.entity())?);
        let descriptor = entity.relationship_descriptor(relationship)?;
        let parent = self.inner.resolver.relationship_reference_for(record)?;
        visited.mark(parent.clone());
        self.delete_relationship(&entity, descriptor, &parent, visited)
    }

    /// Hydrates one relationship slot of `record`.
    pub fn hydrate_relationship_for_entity(
        &self,
        record: &mut Record,
        relationship: &str,
        visited: &mut EntityRelationshipManager,
        force: bool,
    ) -> Result<()> {
        let entity = Arc::clone(self.inner.schema.entity(record.entity())?);
        let descriptor = entity.relationship_descriptor(relationship)?;
        let parent = self.inner.resolver.relationship_reference_for(record)?;
        visited.mark(parent.clone());
        self.hydrate_relationship(&entity, descriptor, record, &parent, visited, force)
    }

    /// Replaces the stored children of a to-many relationship wholesale.
    ///
    /// No diffing, inverse maintenance, or cascading takes place.
    pub fn update_all(
        &self,
        record: &Record,
        relationship: &str,
        identifiers: Vec<Value>,
    ) -> Result<()> {
        let entity = self.inner.schema.entity(record.entity())?;
        let descriptor = entity.relationship_descriptor(relationship)?;
        if !descriptor.is_to_many() {
            return Err(invalid_shape(descriptor));
        }
        let target = self.inner.schema.entity(&descriptor.target)?;
        let parent = self.inner.resolver.relationship_reference_for(record)?;
        let mut children = ReferenceSet::new();
        for identifier in identifiers {
            if identifier.is_null() {
                return Err(PenumbraError::MissingIdentifier(target.name.clone()));
            }
            children.insert(RelationshipReference::new(identifier, target.partition));
        }
        let map = self.inner.store.map(&entity.name, &descriptor.name)?;
        let count = children.len();
        self.locked(
            || vec![self.stripe(map, &parent)],
            || map.put(parent.clone(), children),
        );
        debug!(entity = %entity.name, relationship = %descriptor.name, children = count, "relationship.update_all");
        Ok(())
    }

    /// Stored children of `record.relationship`.
    pub fn relationship_references(
        &self,
        record: &Record,
        relationship: &str,
    ) -> Result<ReferenceSet> {
        let entity = self.inner.schema.entity(record.entity())?;
        entity.relationship_descriptor(relationship)?;
        let parent = self.inner.resolver.relationship_reference_for(record)?;
        Ok(self.inner.store.map(&entity.name, relationship)?.get(&parent))
    }

    /// Loads and hydrates one child of a lazy collection owned by `parent`.
    pub(crate) fn load_child(
        &self,
        parent: &RelationshipReference,
        endpoint: &RelationshipReference,
    ) -> Result<Record> {
        let (_, mut child) = self.inner.resolver.record_for_endpoint(endpoint)?;
        let mut visited = EntityRelationshipManager::new();
        visited.mark(parent.clone());
        self.hydrate_entity(&mut child, &mut visited, false)?;
        Ok(child)
    }

    fn stripe(&self, map: &RelationshipReferenceMap, endpoint: &RelationshipReference) -> usize {
        self.inner.store.locks().stripe(map.id(), endpoint)
    }

    /// Runs `apply` holding every stripe `stripes` reports.
    ///
    /// The stripe set is recomputed once the locks are held; if the entries
    /// changed in between so that more stripes are needed, the attempt is
    /// released and retried.
    fn locked<R>(&self, stripes: impl Fn() -> Vec<usize>, apply: impl FnOnce() -> R) -> R {
        loop {
            let guard = self.inner.store.locks().lock(stripes());
            if guard.covers(&stripes()) {
                return apply();
            }
            drop(guard);
            trace!("relationship.lock_retry");
        }
    }

    fn inverse_side<'a>(&'a self, relationship: &RelationshipDescriptor) -> Result<InverseSide<'a>> {
        match self.inner.schema.inverse_of(relationship) {
            Some(inverse) => {
                let map = self.inner.store.map(&inverse.owner, &inverse.name)?;
                Ok(Some((inverse, map)))
            }
            None => Ok(None),
        }
    }

    fn save_relationship(
        &self,
        entity: &EntityDescriptor,
        relationship: &RelationshipDescriptor,
        record: &mut Record,
        parent: &RelationshipReference,
        visited: &mut EntityRelationshipManager,
    ) -> Result<()> {
        if relationship.cascade == CascadePolicy::DeferSave {
            return Ok(());
        }
        let Some(slot) = record.relationship_mut(&relationship.name) else {
            return Ok(());
        };
        let children: Vec<&mut Record> = match (relationship.cardinality, slot) {
            (Cardinality::ToOne, RelationshipValue::One(child)) => child.iter_mut().collect(),
            (Cardinality::ToMany, RelationshipValue::Many(children)) => children.iter_mut().collect(),
            // A lazy collection is a view of the stored set.
            (Cardinality::ToMany, RelationshipValue::Lazy(_)) => return Ok(()),
            _ => return Err(invalid_shape(relationship)),
        };

        let mut new_set = ReferenceSet::new();
        for child in children {
            if child.entity() != relationship.target {
                return Err(PenumbraError::Schema(format!(
                    "relationship '{}.{}' holds a '{}' record, expected '{}'",
                    entity.name,
                    relationship.name,
                    child.entity(),
                    relationship.target
                )));
            }
            let endpoint = self.inner.resolver.relationship_reference_for(child)?;
            if relationship.cascade.cascades_save() && !visited.contains(&endpoint) {
                self.save_entity(child, visited)?;
                self.inner.metrics.cascade_save();
            }
            new_set.insert(endpoint);
        }

        let map = self.inner.store.map(&entity.name, &relationship.name)?;
        let inverse = self.inverse_side(relationship)?;
        let merge = relationship.is_to_many() && relationship.update == UpdatePolicy::Merge;

        let stripes = || {
            let mut out = vec![self.stripe(map, parent)];
            if let Some((inverse, inverse_map)) = inverse {
                let current = map.get(parent);
                for child in current.iter().chain(new_set.iter()) {
                    out.push(self.stripe(inverse_map, child));
                }
                if !inverse.is_to_many() {
                    for child in &new_set {
                        for other in inverse_map.get(child) {
                            if &other != parent {
                                out.push(self.stripe(map, &other));
                            }
                        }
                    }
                }
            }
            out
        };

        let removed = self.locked(stripes, || {
            let current = map.get(parent);
            let (stored, removed): (ReferenceSet, ReferenceSet) = if merge {
                (current.union(&new_set).cloned().collect(), ReferenceSet::new())
            } else {
                (new_set.clone(), current.difference(&new_set).cloned().collect())
            };
            map.put(parent.clone(), stored);
            if let Some((inverse, inverse_map)) = inverse {
                for child in &removed {
                    inverse_map.remove_child(child, parent);
                }
                for child in &new_set {
                    if inverse.is_to_many() {
                        inverse_map.insert(child, parent.clone());
                        continue;
                    }
                    for other in inverse_map.get(child) {
                        if &other != parent {
                            map.remove_child(&other, child);
                            trace!(child = %child, displaced = %other, "relationship.displace");
                        }
                    }
                    inverse_map.put(child.clone(), ReferenceSet::from([parent.clone()]));
                }
            }
            removed
        });

        if relationship.cascade.cascades_delete() {
            for child in &removed {
                if visited.contains(child) {
                    continue;
                }
                if self.delete_endpoint(child, visited, false)? {
                    self.inner.metrics.cascade_delete();
                    debug!(parent = %parent, child = %child, "relationship.cascade_delete");
                }
            }
        }
        Ok(())
    }

    fn delete_relationship(
        &self,
        entity: &EntityDescriptor,
        relationship: &RelationshipDescriptor,
        parent: &RelationshipReference,
        visited: &mut EntityRelationshipManager,
    ) -> Result<()> {
        let map = self.inner.store.map(&entity.name, &relationship.name)?;
        let inverse = self.inverse_side(relationship)?;

        let stripes = || {
            let mut out = vec![self.stripe(map, parent)];
            if let Some((_, inverse_map)) = inverse {
                for child in map.get(parent) {
                    out.push(self.stripe(inverse_map, &child));
                }
            }
            out
        };
        let children = self.locked(stripes, || {
            let children = map.take(parent);
            if let Some((_, inverse_map)) = inverse {
                for child in &children {
                    inverse_map.remove_child(child, parent);
                }
            }
            children
        });

        if relationship.cascade.cascades_delete() {
            for child in &children {
                if visited.contains(child) {
                    continue;
                }
                if self.delete_endpoint(child, visited, false)? {
                    self.inner.metrics.cascade_delete();
                    debug!(parent = %parent, child = %child, "relationship.cascade_delete");
                }
            }
        }
        Ok(())
    }

    /// Deletes the record behind `endpoint` with all of its relationships.
    ///
    /// Returns `false` when the endpoint was already visited or, with
    /// `must_exist` unset, when nothing is stored there.
    fn delete_endpoint(
        &self,
        endpoint: &RelationshipReference,
        visited: &mut EntityRelationshipManager,
        must_exist: bool,
    ) -> Result<bool> {
        if !visited.mark(endpoint.clone()) {
            return Ok(false);
        }
        let entity = Arc::clone(self.inner.schema.entity_for_partition(endpoint.partition())?);
        let Some((reference, record)) = self.inner.resolver.find_endpoint(endpoint)? else {
            if must_exist {
                return Err(PenumbraError::not_found(&entity.name, endpoint.identifier()));
            }
            return Ok(false);
        };

        for relationship in &entity.relationships {
            self.delete_relationship(&entity, relationship, endpoint, visited)?;
        }

        match self.inner.resolver.records().delete(reference) {
            Ok(()) => {}
            Err(err) if err.is_not_found() && !must_exist => return Ok(false),
            Err(err) => return Err(err),
        }
        debug!(entity = %entity.name, id = %endpoint.identifier(), %reference, "relationship.delete_entity");
        self.inner.metrics.entity_deleted();
        self.inner.observer.entity_deleted(&entity, reference, &record);
        Ok(true)
    }

    fn hydrate_relationship(
        &self,
        entity: &EntityDescriptor,
        relationship: &RelationshipDescriptor,
        record: &mut Record,
        parent: &RelationshipReference,
        visited: &mut EntityRelationshipManager,
        force: bool,
    ) -> Result<()> {
        if relationship.fetch == FetchPolicy::None && !force {
            return Ok(());
        }
        let map = self.inner.store.map(&entity.name, &relationship.name)?;
        let children = map.get(parent);

        match relationship.cardinality {
            Cardinality::ToOne => {
                let child = match children.iter().next() {
                    Some(endpoint) => {
                        let (_, mut child) = self.inner.resolver.record_for_endpoint(endpoint)?;
                        self.hydrate_entity(&mut child, visited, false)?;
                        Some(child)
                    }
                    None => None,
                };
                match record.relationship_mut(&relationship.name) {
                    Some(RelationshipValue::One(slot)) => *slot = child,
                    _ => record.set_relationship(&relationship.name, RelationshipValue::One(child)),
                }
                self.inner.metrics.relationship_hydrated(false);
            }
            Cardinality::ToMany if relationship.fetch == FetchPolicy::Lazy && !force => {
                let list = LazyRelationshipList::new(
                    self.clone(),
                    parent.clone(),
                    children.into_iter().collect(),
                    self.inner.lazy_page_size,
                );
                record.set_relationship(&relationship.name, RelationshipValue::Lazy(list));
                self.inner.metrics.relationship_hydrated(true);
            }
            Cardinality::ToMany => {
                let mut loaded = Vec::with_capacity(children.len());
                for endpoint in &children {
                    let (_, mut child) = self.inner.resolver.record_for_endpoint(endpoint)?;
                    self.hydrate_entity(&mut child, visited, false)?;
                    loaded.push(child);
                }
                let target = self.inner.schema.entity(&relationship.target)?;
                if target.is_naturally_orderable() {
                    loaded.sort_by(|a, b| target.natural_cmp(a, b));
                }
                record.set_relationship(&relationship.name, RelationshipValue::Many(loaded));
                self.inner.metrics.relationship_hydrated(false);
            }
        }
        Ok(())
    }
}

fn invalid_shape(relationship: &RelationshipDescriptor) -> PenumbraError {
    PenumbraError::InvalidRelationshipType {
        entity: relationship.owner.clone(),
        relationship: relationship.name.clone(),
        expected: relationship.expected_shape(),
    }
}
