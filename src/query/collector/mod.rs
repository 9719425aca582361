//! Result collectors.
//!
//! A collector receives `(Reference, Record)` pairs from a scan, possibly
//! from many threads at once, and turns them into an ordered, deduplicated,
//! grouped, paginated result while bounding the number of retained records
//! to `first_row + max_results` (+1 transiently). Each collector guards its
//! state with one mutex.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::schema::EntityDescriptor;
use crate::types::{Record, Reference, Result, Value};

use super::ast::{OrderBy, Query};
use super::comparator::compare_keys;

mod grouping;
mod plain;
mod projection;
mod reference;

pub use grouping::GroupingCollector;
pub use plain::PlainCollector;
pub use projection::ProjectionCollector;
pub use reference::ReferenceCollector;

/// Projected result row: column name to value.
pub type Row = BTreeMap<String, Value>;

/// Collector strategy, reported to metrics.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CollectorKind {
    /// Whole records.
    Plain,
    /// Projected rows.
    Projection,
    /// Grouped and aggregated rows.
    Grouping,
    /// References only, for update/delete execution.
    Reference,
}

/// Finalized output of a collector.
#[derive(Clone, Debug, PartialEq)]
pub enum CollectedItems {
    /// Limited records, in result order.
    Records(Vec<(Reference, Record)>),
    /// Limited rows, helper columns stripped.
    Rows(Vec<Row>),
    /// Limited references.
    References(Vec<Reference>),
}

/// Everything a finished collection produced.
#[derive(Clone, Debug, PartialEq)]
pub struct CollectedResults {
    /// Limited results.
    pub items: CollectedItems,
    /// Total results before `first_row` / `max_results` were applied.
    pub number_of_results: usize,
    /// Every matched reference, unless the retention cap was exceeded.
    pub cached_references: Option<Vec<Reference>>,
}

/// Closed set of collection strategies.
pub enum Collector {
    /// See [`PlainCollector`].
    Plain(PlainCollector),
    /// See [`ProjectionCollector`].
    Projection(ProjectionCollector),
    /// See [`GroupingCollector`].
    Grouping(GroupingCollector),
    /// See [`ReferenceCollector`].
    Reference(ReferenceCollector),
}

impl Collector {
    /// Picks the strategy `query` needs.
    pub fn for_query(
        query: &Query,
        entity: Arc<EntityDescriptor>,
        max_cached_references: usize,
    ) -> Self {
        if query.is_grouping() {
            Collector::Grouping(GroupingCollector::new(query, entity, max_cached_references))
        } else if query.is_projection() {
            Collector::Projection(ProjectionCollector::new(query, entity, max_cached_references))
        } else {
            Collector::Plain(PlainCollector::new(query, entity, max_cached_references))
        }
    }

    /// Reference-only collector for update/delete execution.
    pub fn references(query: &Query, entity: Arc<EntityDescriptor>) -> Self {
        Collector::Reference(ReferenceCollector::new(query, entity))
    }

    /// Strategy in use.
    pub fn kind(&self) -> CollectorKind {
        match self {
            Collector::Plain(_) => CollectorKind::Plain,
            Collector::Projection(_) => CollectorKind::Projection,
            Collector::Grouping(_) => CollectorKind::Grouping,
            Collector::Reference(_) => CollectorKind::Reference,
        }
    }

    /// Accepts one matched pair. Safe to call from many threads.
    pub fn collect(&self, reference: Reference, record: Record) -> Result<()> {
        match self {
            Collector::Plain(c) => c.collect(reference, record),
            Collector::Projection(c) => c.collect(reference, record),
            Collector::Grouping(c) => c.collect(reference, record),
            Collector::Reference(c) => c.collect(reference, record),
        }
    }

    /// True while every matched reference is still retained.
    pub fn should_cache_results(&self) -> bool {
        match self {
            Collector::Plain(c) => c.should_cache_results(),
            Collector::Projection(c) => c.should_cache_results(),
            Collector::Grouping(c) => c.should_cache_results(),
            Collector::Reference(_) => false,
        }
    }

    /// Results accepted so far (groups, for grouping collectors, are only
    /// known after finalization).
    pub fn number_of_results(&self) -> usize {
        match self {
            Collector::Plain(c) => c.number_of_results(),
            Collector::Projection(c) => c.number_of_results(),
            Collector::Grouping(c) => c.number_of_results(),
            Collector::Reference(c) => c.number_of_results(),
        }
    }

    /// References of the currently retained, limited results.
    pub fn limited_references(&self) -> Vec<Reference> {
        match self {
            Collector::Plain(c) => c.limited_references(),
            Collector::Projection(c) => c.limited_references(),
            Collector::Grouping(_) => Vec::new(),
            Collector::Reference(c) => c.limited_references(),
        }
    }

    /// Records currently held, for memory accounting.
    pub fn retained(&self) -> usize {
        match self {
            Collector::Plain(c) => c.retained(),
            Collector::Projection(c) => c.retained(),
            Collector::Grouping(c) => c.retained(),
            Collector::Reference(c) => c.retained(),
        }
    }

    /// Sorts, limits, and strips helper columns.
    pub fn finalize_results(self) -> CollectedResults {
        match self {
            Collector::Plain(c) => c.finalize_results(),
            Collector::Projection(c) => c.finalize_results(),
            Collector::Grouping(c) => c.finalize_results(),
            Collector::Reference(c) => c.finalize_results(),
        }
    }
}

/// Reads the order-by key of a record.
pub(crate) fn record_key(entity: &EntityDescriptor, record: &Record, order: &[OrderBy]) -> Vec<Value> {
    order
        .iter()
        .map(|key| {
            entity
                .attribute_value(record, &key.attribute)
                .cloned()
                .unwrap_or(Value::Null)
        })
        .collect()
}

/// Reads the order-by key of a row.
pub(crate) fn row_key(row: &Row, order: &[OrderBy]) -> Vec<Value> {
    order
        .iter()
        .map(|key| row.get(&key.attribute).cloned().unwrap_or(Value::Null))
        .collect()
}

/// Bounded result window.
///
/// Ordered windows keep the best `first_row + max_results` entries in a
/// sorted vector, evicting the boundary element after each insertion;
/// equal keys keep arrival order. Unordered windows skip the first
/// `first_row` entries and keep the next `max_results`.
pub(crate) struct Window<T> {
    order: Vec<OrderBy>,
    first_row: usize,
    max_results: Option<usize>,
    skipped: usize,
    entries: Vec<(Vec<Value>, T)>,
}

impl<T> Window<T> {
    pub(crate) fn new(query: &Query) -> Self {
        Self {
            order: query.order_by.clone(),
            first_row: query.first_row,
            max_results: query.max_results,
            skipped: 0,
            entries: Vec::new(),
        }
    }

    fn capacity(&self) -> Option<usize> {
        self.max_results
            .map(|max| self.first_row.saturating_add(max))
    }

    pub(crate) fn offer(&mut self, key: Vec<Value>, item: T) {
        if self.order.is_empty() {
            if self.skipped < self.first_row {
                self.skipped += 1;
            } else if self.max_results.map_or(true, |max| self.entries.len() < max) {
                self.entries.push((key, item));
            }
            return;
        }
        let at = self
            .entries
            .partition_point(|(existing, _)| compare_keys(existing, &key, &self.order) != Ordering::Greater);
        self.entries.insert(at, (key, item));
        if let Some(capacity) = self.capacity() {
            if self.entries.len() > capacity {
                self.entries.pop();
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn offset(&self) -> usize {
        if self.order.is_empty() {
            0
        } else {
            self.first_row
        }
    }

    pub(crate) fn items(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().skip(self.offset()).map(|(_, item)| item)
    }

    pub(crate) fn into_items(self) -> Vec<T> {
        let offset = self.offset();
        self.entries
            .into_iter()
            .skip(offset)
            .map(|(_, item)| item)
            .collect()
    }
}

/// Side list of every matched reference, abandoned past the cap.
pub(crate) struct Retention {
    limit: usize,
    references: Option<Vec<Reference>>,
}

impl Retention {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            references: Some(Vec::new()),
        }
    }

    pub(crate) fn retain(&mut self, reference: Reference) {
        let full = match &self.references {
            Some(references) => references.len() >= self.limit,
            None => return,
        };
        if full {
            self.references = None;
            debug!(limit = self.limit, "query.cache_disabled");
        } else if let Some(references) = &mut self.references {
            references.push(reference);
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.references.is_some()
    }

    pub(crate) fn into_references(self) -> Option<Vec<Reference>> {
        self.references
    }
}
