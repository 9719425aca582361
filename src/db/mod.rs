mod options;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use tracing::{debug, info};

pub use options::{
    DbConfig, DbOptions, DEFAULT_IDLE_QUERY_CACHE_CAPACITY, DEFAULT_LAZY_PAGE_SIZE,
    DEFAULT_LOCK_STRIPES, DEFAULT_MAP_SHARDS, DEFAULT_MAX_CACHED_REFERENCES,
};

use crate::cache::{QueryListener, QueryResultCache};
use crate::metrics::EngineMetrics;
use crate::query::{Query, QueryExecutor, QueryResult};
use crate::relationship::{EntityRelationshipManager, ReferenceSet, RelationshipEngine};
use crate::schema::SchemaContext;
use crate::storage::{MemoryRecordStore, RecordLayer, RecordStore, ScanProvider};
use crate::types::{Record, Reference, Result, Value};

/// Embedded object database: relationship engine, query executor, and
/// live-query cache over one record store.
///
/// Every public operation starts a fresh visited set; `Db` is `Send + Sync`
/// and meant to be shared behind an `Arc`.
pub struct Db {
    schema: Arc<SchemaContext>,
    engine: RelationshipEngine,
    executor: QueryExecutor,
    cache: Arc<QueryResultCache>,
    metrics: Arc<dyn EngineMetrics>,
}

impl Db {
    /// Opens a database over a fresh in-memory store.
    pub fn open(schema: Arc<SchemaContext>, options: DbOptions) -> Result<Self> {
        let store = Arc::new(MemoryRecordStore::new().parallel_scan(options.parallel_scan));
        Self::with_store(schema, store, options)
    }

    /// Opens a database over an external record store.
    pub fn with_store<S>(schema: Arc<SchemaContext>, store: Arc<S>, options: DbOptions) -> Result<Self>
    where
        S: RecordStore + 'static,
    {
        let metrics = options.metrics_sink();
        let cache = Arc::new(QueryResultCache::new(
            options.idle_query_cache_capacity,
            Arc::clone(&metrics),
        ));
        let records: Arc<dyn RecordLayer> = store.clone();
        let scans: Arc<dyn ScanProvider> = store;
        let engine = RelationshipEngine::new(Arc::clone(&schema), records, &options, cache.clone());
        let executor = QueryExecutor::new(
            engine.clone(),
            scans,
            Arc::clone(&cache),
            Arc::clone(&metrics),
            options.max_cached_references,
        );
        info!(
            entities = schema.entities().count(),
            lock_stripes = options.lock_stripes,
            max_cached_references = options.max_cached_references,
            "db.open"
        );
        Ok(Self {
            schema,
            engine,
            executor,
            cache,
            metrics,
        })
    }

    /// Schema in use.
    pub fn schema(&self) -> &Arc<SchemaContext> {
        &self.schema
    }

    /// Relationship engine.
    pub fn engine(&self) -> &RelationshipEngine {
        &self.engine
    }

    /// Live-query cache.
    pub fn cache(&self) -> &Arc<QueryResultCache> {
        &self.cache
    }

    /// Metrics sink.
    pub fn metrics(&self) -> &Arc<dyn EngineMetrics> {
        &self.metrics
    }

    /// Saves `record` with its materialized relationships and cascades.
    pub fn save(&self, record: &mut Record) -> Result<Reference> {
        self.engine
            .save_entity(record, &mut EntityRelationshipManager::new())
    }

    /// Deletes `record` with its relationships and cascades.
    ///
    /// Fails with [`crate::PenumbraError::NotFound`] if it is not stored.
    pub fn delete(&self, record: &Record) -> Result<()> {
        self.engine
            .delete_entity(record, &mut EntityRelationshipManager::new())
    }

    /// Loads and hydrates the record of `entity` keyed by `identifier`.
    pub fn find(&self, entity: &str, identifier: impl Into<Value>) -> Result<Option<Record>> {
        let descriptor = self.schema.entity(entity)?;
        let identifier = identifier.into();
        let Some((_, mut record)) = self
            .engine
            .resolver()
            .records()
            .find(descriptor.partition, &identifier)?
        else {
            debug!(entity, %identifier, "db.find_miss");
            return Ok(None);
        };
        self.hydrate(&mut record, false)?;
        Ok(Some(record))
    }

    /// Loads and hydrates the record stored at `reference`.
    pub fn find_by_reference(&self, reference: Reference) -> Result<Record> {
        let mut record = self.engine.resolver().record_for(reference)?;
        self.hydrate(&mut record, false)?;
        Ok(record)
    }

    /// Hydrates `record`'s relationships; `force` also loads lazy and
    /// never-fetched relationships.
    pub fn hydrate(&self, record: &mut Record, force: bool) -> Result<()> {
        self.engine
            .hydrate_entity(record, &mut EntityRelationshipManager::new(), force)
    }

    /// Replaces the stored children of a to-many relationship.
    pub fn update_all(&self, record: &Record, relationship: &str, identifiers: Vec<Value>) -> Result<()> {
        self.engine.update_all(record, relationship, identifiers)
    }

    /// Stored children of `record.relationship`.
    pub fn relationship_references(&self, record: &Record, relationship: &str) -> Result<ReferenceSet> {
        self.engine.relationship_references(record, relationship)
    }

    /// Executes a read query.
    pub fn execute(&self, query: &Query) -> Result<QueryResult> {
        self.executor.execute(query)
    }

    /// Executes an update query; returns the number of records updated.
    pub fn execute_update(&self, query: &Query) -> Result<usize> {
        self.executor.execute_update(query)
    }

    /// Executes a delete query; returns the number of records deleted.
    pub fn execute_delete(&self, query: &Query) -> Result<usize> {
        self.executor.execute_delete(query)
    }

    /// Counts the results of `query`, ignoring paging.
    pub fn count(&self, query: &Query) -> Result<usize> {
        self.executor.count(query)
    }

    /// Executes `query` and subscribes `listener` to its changes.
    pub fn listen(&self, query: &Query, listener: Arc<dyn QueryListener>) -> Result<QueryResult> {
        let mut listened = query.clone();
        listened.listener = Some(listener);
        self.executor.execute(&listened)
    }

    /// Unsubscribes `listener` from `query`. Returns `false` if it was not
    /// subscribed.
    pub fn unlisten(&self, query: &Query, listener: &Arc<dyn QueryListener>) -> Result<bool> {
        Ok(self.cache.unsubscribe(query.signature()?, listener))
    }
}
