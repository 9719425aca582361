use std::sync::Arc;

use crate::schema::SchemaContext;
use crate::types::{PenumbraError, Record, Reference, RelationshipReference, Result};

use super::RecordLayer;

/// Pure coordinate system mapping identifiers and locations to records.
///
/// The only cached state is the offset cell inside
/// [`RelationshipReference`]; a stale cached offset falls back to a fresh
/// identifier lookup.
#[derive(Clone)]
pub struct ReferenceResolver {
    records: Arc<dyn RecordLayer>,
    schema: Arc<SchemaContext>,
}

impl ReferenceResolver {
    /// Creates a resolver over `records`.
    pub fn new(records: Arc<dyn RecordLayer>, schema: Arc<SchemaContext>) -> Self {
        Self { records, schema }
    }

    /// Underlying record layer.
    pub fn records(&self) -> &Arc<dyn RecordLayer> {
        &self.records
    }

    /// Location of a stored record, by its declared identifier.
    pub fn reference_for(&self, record: &Record) -> Result<Reference> {
        let entity = self.schema.entity(record.entity())?;
        self.records
            .resolve_reference(entity.partition, record.identifier())
            .map_err(|err| rename_not_found(err, record.entity(), record.identifier()))
    }

    /// Relationship endpoint identity for a record.
    pub fn relationship_reference_for(&self, record: &Record) -> Result<RelationshipReference> {
        let entity = self.schema.entity(record.entity())?;
        if record.identifier().is_null() {
            return Err(PenumbraError::MissingIdentifier(entity.name.clone()));
        }
        Ok(RelationshipReference::new(
            record.identifier().clone(),
            entity.partition,
        ))
    }

    /// Location of a relationship endpoint, resolving and caching the offset.
    pub fn resolve(&self, endpoint: &RelationshipReference) -> Result<Reference> {
        if let Some(reference) = endpoint.cached_reference() {
            return Ok(reference);
        }
        let reference = self
            .records
            .resolve_reference(endpoint.partition(), endpoint.identifier())
            .map_err(|err| self.endpoint_not_found(err, endpoint))?;
        endpoint.cache_offset(reference.offset);
        Ok(reference)
    }

    /// Loads the record stored at `reference`.
    pub fn record_for(&self, reference: Reference) -> Result<Record> {
        self.records.materialize(reference)
    }

    /// Loads the record behind a relationship endpoint.
    ///
    /// A dangling endpoint surfaces as [`PenumbraError::NotFound`].
    pub fn record_for_endpoint(&self, endpoint: &RelationshipReference) -> Result<(Reference, Record)> {
        if let Some(cached) = endpoint.cached_reference() {
            match self.records.materialize(cached) {
                Ok(record) if record.identifier() == endpoint.identifier() => {
                    return Ok((cached, record))
                }
                Ok(_) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
            let reference = self
                .records
                .resolve_reference(endpoint.partition(), endpoint.identifier())
                .map_err(|err| self.endpoint_not_found(err, endpoint))?;
            let record = self.records.materialize(reference)?;
            return Ok((reference, record));
        }
        let reference = self.resolve(endpoint)?;
        let record = self
            .records
            .materialize(reference)
            .map_err(|err| self.endpoint_not_found(err, endpoint))?;
        Ok((reference, record))
    }

    /// Looks up an endpoint, mapping `NotFound` to `None`.
    pub fn find_endpoint(&self, endpoint: &RelationshipReference) -> Result<Option<(Reference, Record)>> {
        match self.record_for_endpoint(endpoint) {
            Ok(found) => Ok(Some(found)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn endpoint_not_found(&self, err: PenumbraError, endpoint: &RelationshipReference) -> PenumbraError {
        match self.schema.entity_for_partition(endpoint.partition()) {
            Ok(entity) => rename_not_found(err, &entity.name, endpoint.identifier()),
            Err(_) => err,
        }
    }
}

fn rename_not_found(err: PenumbraError, entity: &str, identifier: impl ToString) -> PenumbraError {
    if err.is_not_found() {
        PenumbraError::not_found(entity, identifier)
    } else {
        err
    }
}
