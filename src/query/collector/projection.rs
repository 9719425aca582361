use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::query::ast::{OrderBy, Query};
use crate::schema::EntityDescriptor;
use crate::types::{Record, Reference, Result, Value};

use super::{row_key, CollectedItems, CollectedResults, Retention, Row, Window};

struct ProjectionState {
    window: Window<(Reference, Row)>,
    seen: FxHashSet<Vec<Value>>,
    accepted: usize,
    retention: Retention,
}

/// Collects records projected to rows.
///
/// Rows carry the selected columns plus any order-by attribute that is not
/// selected; those helper columns are stripped at finalization. Distinct
/// compares selected columns only, remembering every distinct column tuple of
/// the scan (not just the window) so `number_of_results` stays exact.
pub struct ProjectionCollector {
    entity: Arc<EntityDescriptor>,
    columns: Vec<String>,
    fields: Vec<String>,
    order: Vec<OrderBy>,
    distinct: bool,
    state: Mutex<ProjectionState>,
}

impl ProjectionCollector {
    /// Creates a collector for `query`.
    pub fn new(query: &Query, entity: Arc<EntityDescriptor>, max_cached_references: usize) -> Self {
        let columns = query.columns();
        let mut fields = columns.clone();
        for key in &query.order_by {
            if !fields.contains(&key.attribute) {
                fields.push(key.attribute.clone());
            }
        }
        Self {
            entity,
            columns,
            fields,
            order: query.order_by.clone(),
            distinct: query.distinct,
            state: Mutex::new(ProjectionState {
                window: Window::new(query),
                seen: FxHashSet::default(),
                accepted: 0,
                retention: Retention::new(max_cached_references),
            }),
        }
    }

    fn project(&self, record: &Record) -> Row {
        self.fields
            .iter()
            .map(|field| {
                let value = self
                    .entity
                    .attribute_value(record, field)
                    .cloned()
                    .unwrap_or(Value::Null);
                (field.clone(), value)
            })
            .collect()
    }

    /// Accepts one matched record.
    pub fn collect(&self, reference: Reference, record: Record) -> Result<()> {
        let row = self.project(&record);
        let key = row_key(&row, &self.order);
        let fingerprint = self.distinct.then(|| {
            self.columns
                .iter()
                .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                .collect::<Vec<_>>()
        });
        let mut state = self.state.lock();
        state.retention.retain(reference);
        if let Some(fingerprint) = fingerprint {
            if !state.seen.insert(fingerprint) {
                return Ok(());
            }
        }
        state.accepted += 1;
        state.window.offer(key, (reference, row));
        Ok(())
    }

    /// True while every matched reference is retained.
    pub fn should_cache_results(&self) -> bool {
        self.state.lock().retention.is_enabled()
    }

    /// Rows accepted so far.
    pub fn number_of_results(&self) -> usize {
        self.state.lock().accepted
    }

    /// References behind the limited rows.
    pub fn limited_references(&self) -> Vec<Reference> {
        self.state
            .lock()
            .window
            .items()
            .map(|(reference, _)| *reference)
            .collect()
    }

    /// Rows currently held by the window.
    pub fn retained(&self) -> usize {
        self.state.lock().window.len()
    }

    /// Produces the limited rows without helper columns.
    pub fn finalize_results(self) -> CollectedResults {
        let state = self.state.into_inner();
        let rows = state
            .window
            .into_items()
            .into_iter()
            .map(|(_, mut row)| {
                row.retain(|name, _| self.columns.contains(name));
                row
            })
            .collect();
        CollectedResults {
            items: CollectedItems::Rows(rows),
            number_of_results: state.accepted,
            cached_references: state.retention.into_references(),
        }
    }
}
