//! Query execution: scan, collect, finalize, hydrate, register.

use std::sync::Arc;

use tracing::debug;

use crate::cache::QueryResultCache;
use crate::metrics::EngineMetrics;
use crate::relationship::{EntityRelationshipManager, RelationshipEngine};
use crate::schema::EntityDescriptor;
use crate::storage::ScanProvider;
use crate::types::{PenumbraError, Record, Reference, Result};

use super::ast::Query;
use super::collector::{CollectedItems, CollectedResults, Collector, Row};

/// Results of a read query.
#[derive(Clone, Debug, PartialEq)]
pub enum ResultItems {
    /// Hydrated records with their locations.
    Records(Vec<(Reference, Record)>),
    /// Projected or aggregated rows.
    Rows(Vec<Row>),
}

/// Limited results plus the total count before paging.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryResult {
    /// Returned results.
    pub items: ResultItems,
    /// Total number of results before `first_row` / `max_results`.
    pub number_of_results: usize,
}

impl QueryResult {
    /// Returned records, if the query was not a projection.
    pub fn records(&self) -> Option<Vec<&Record>> {
        match &self.items {
            ResultItems::Records(records) => Some(records.iter().map(|(_, r)| r).collect()),
            ResultItems::Rows(_) => None,
        }
    }

    /// Returned rows, if the query was a projection.
    pub fn rows(&self) -> Option<&[Row]> {
        match &self.items {
            ResultItems::Rows(rows) => Some(rows),
            ResultItems::Records(_) => None,
        }
    }

    /// Number of returned results.
    pub fn len(&self) -> usize {
        match &self.items {
            ResultItems::Records(records) => records.len(),
            ResultItems::Rows(rows) => rows.len(),
        }
    }

    /// True if nothing was returned.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs queries against a scan provider.
#[derive(Clone)]
pub struct QueryExecutor {
    engine: RelationshipEngine,
    scans: Arc<dyn ScanProvider>,
    cache: Arc<QueryResultCache>,
    metrics: Arc<dyn EngineMetrics>,
    max_cached_references: usize,
}

impl QueryExecutor {
    /// Creates an executor.
    pub fn new(
        engine: RelationshipEngine,
        scans: Arc<dyn ScanProvider>,
        cache: Arc<QueryResultCache>,
        metrics: Arc<dyn EngineMetrics>,
        max_cached_references: usize,
    ) -> Self {
        Self {
            engine,
            scans,
            cache,
            metrics,
            max_cached_references,
        }
    }

    fn entity(&self, query: &Query) -> Result<Arc<EntityDescriptor>> {
        let entity = Arc::clone(self.engine.schema().entity(&query.entity)?);
        query.validate(&entity)?;
        Ok(entity)
    }

    fn run(&self, query: &Query, entity: &EntityDescriptor, collector: Collector) -> Result<CollectedResults> {
        self.scans.scan(entity, query.criteria.as_ref(), &|reference, record| {
            collector.collect(reference, record)
        })?;
        self.metrics.query_executed(collector.kind());
        Ok(collector.finalize_results())
    }

    /// Executes a read query.
    ///
    /// Returned records are hydrated, each with its own visited set. When the
    /// query carries a listener, the full reference set is registered with
    /// the live-query cache.
    pub fn execute(&self, query: &Query) -> Result<QueryResult> {
        let entity = self.entity(query)?;
        let collector = Collector::for_query(query, Arc::clone(&entity), self.max_cached_references);
        let kind = collector.kind();
        let results = self.run(query, &entity, collector)?;

        let items = match results.items {
            CollectedItems::Records(records) => {
                let mut hydrated = Vec::with_capacity(records.len());
                for (reference, mut record) in records {
                    self.engine
                        .hydrate_entity(&mut record, &mut EntityRelationshipManager::new(), false)?;
                    hydrated.push((reference, record));
                }
                ResultItems::Records(hydrated)
            }
            CollectedItems::Rows(rows) => ResultItems::Rows(rows),
            CollectedItems::References(_) => {
                return Err(PenumbraError::Invalid("reference collector used for a read query"))
            }
        };

        if let Some(listener) = &query.listener {
            self.cache
                .register(query, results.cached_references, Arc::clone(listener))?;
        }
        debug!(
            entity = %query.entity,
            ?kind,
            returned = items_len(&items),
            total = results.number_of_results,
            "query.execute"
        );
        Ok(QueryResult {
            items,
            number_of_results: results.number_of_results,
        })
    }

    /// Total number of results of `query`, ignoring paging.
    pub fn count(&self, query: &Query) -> Result<usize> {
        let entity = self.entity(query)?;
        let mut counted = query.clone();
        counted.listener = None;
        counted.first_row = 0;
        if !counted.is_grouping() {
            counted.order_by.clear();
            counted.max_results = Some(0);
        } else {
            counted.max_results = None;
        }
        let collector = Collector::for_query(&counted, Arc::clone(&entity), 0);
        Ok(self.run(&counted, &entity, collector)?.number_of_results)
    }

    fn matched_references(&self, query: &Query) -> Result<Vec<Reference>> {
        let entity = self.entity(query)?;
        let collector = Collector::references(query, Arc::clone(&entity));
        match self.run(query, &entity, collector)?.items {
            CollectedItems::References(references) => Ok(references),
            _ => Err(PenumbraError::Invalid("expected a reference collection")),
        }
    }

    /// Applies the query's assignments to every (limited) match and saves
    /// it. Returns the number of records updated.
    pub fn execute_update(&self, query: &Query) -> Result<usize> {
        if query.updates.is_empty() {
            return Err(PenumbraError::Invalid("update query has no assignments"));
        }
        let references = self.matched_references(query)?;
        let mut updated = 0;
        for reference in references {
            let mut record = match self.engine.resolver().record_for(reference) {
                Ok(record) => record,
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            };
            for (attribute, value) in &query.updates {
                record.set_attribute(attribute.clone(), value.clone());
            }
            self.engine
                .save_entity(&mut record, &mut EntityRelationshipManager::new())?;
            updated += 1;
        }
        debug!(entity = %query.entity, updated, "query.execute_update");
        Ok(updated)
    }

    /// Deletes every (limited) match with its relationships and cascades.
    /// Returns the number of matched records deleted.
    pub fn execute_delete(&self, query: &Query) -> Result<usize> {
        let references = self.matched_references(query)?;
        let mut deleted = 0;
        for reference in references {
            let record = match self.engine.resolver().record_for(reference) {
                Ok(record) => record,
                // Removed by an earlier cascade.
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            };
            match self
                .engine
                .delete_entity(&record, &mut EntityRelationshipManager::new())
            {
                Ok(()) => deleted += 1,
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        debug!(entity = %query.entity, deleted, "query.execute_delete");
        Ok(deleted)
    }
}

fn items_len(items: &ResultItems) -> usize {
    match items {
        ResultItems::Records(records) => records.len(),
        ResultItems::Rows(rows) => rows.len(),
    }
}
