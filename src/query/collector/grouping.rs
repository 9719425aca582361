use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::query::aggregate::Aggregate;
use crate::query::ast::{OrderBy, Query, Selection};
use crate::query::comparator::compare_keys;
use crate::schema::EntityDescriptor;
use crate::types::{Record, Reference, Result, Value};

use super::{row_key, CollectedItems, CollectedResults, Retention, Row};

struct Group {
    first: Row,
    aggregates: Vec<Aggregate>,
}

struct GroupingState {
    groups: FxHashMap<Vec<Value>, Group>,
    retention: Retention,
}

/// Aggregates records into one row per group-key tuple.
///
/// Non-aggregated selections (and order-by helpers) keep the first value
/// seen in each group. Without group-by every record falls into a single
/// group, which is reported even when nothing matched.
pub struct GroupingCollector {
    entity: Arc<EntityDescriptor>,
    group_by: Vec<String>,
    columns: Vec<String>,
    first_seen: Vec<String>,
    aggregates: Vec<(String, Selection)>,
    order: Vec<OrderBy>,
    distinct: bool,
    first_row: usize,
    max_results: Option<usize>,
    state: Mutex<GroupingState>,
}

impl GroupingCollector {
    /// Creates a collector for `query`.
    pub fn new(query: &Query, entity: Arc<EntityDescriptor>, max_cached_references: usize) -> Self {
        let columns = query.columns();
        let mut aggregates = Vec::new();
        let mut first_seen = Vec::new();
        for selection in &query.selections {
            match selection {
                Selection::Aggregate { .. } => aggregates.push((selection.column(), selection.clone())),
                Selection::Attribute(name) if !query.group_by.contains(name) => {
                    first_seen.push(name.clone())
                }
                Selection::Attribute(_) => {}
            }
        }
        for key in &query.order_by {
            let known = columns.contains(&key.attribute)
                || query.group_by.contains(&key.attribute)
                || first_seen.contains(&key.attribute);
            if !known {
                first_seen.push(key.attribute.clone());
            }
        }
        Self {
            entity,
            group_by: query.group_by.clone(),
            columns,
            first_seen,
            aggregates,
            order: query.order_by.clone(),
            distinct: query.distinct,
            first_row: query.first_row,
            max_results: query.max_results,
            state: Mutex::new(GroupingState {
                groups: FxHashMap::default(),
                retention: Retention::new(max_cached_references),
            }),
        }
    }

    fn value_of(&self, record: &Record, attribute: &str) -> Value {
        self.entity
            .attribute_value(record, attribute)
            .cloned()
            .unwrap_or(Value::Null)
    }

    fn empty_group(&self) -> Group {
        Group {
            first: Row::new(),
            aggregates: self
                .aggregates
                .iter()
                .filter_map(|(_, selection)| match selection {
                    Selection::Aggregate { function, .. } => Some(Aggregate::new(*function)),
                    Selection::Attribute(_) => None,
                })
                .collect(),
        }
    }

    /// Folds one matched record into its group.
    pub fn collect(&self, reference: Reference, record: Record) -> Result<()> {
        let key: Vec<Value> = self
            .group_by
            .iter()
            .map(|attribute| self.value_of(&record, attribute))
            .collect();
        let arguments: Vec<Option<Value>> = self
            .aggregates
            .iter()
            .map(|(_, selection)| match selection {
                Selection::Aggregate {
                    attribute: Some(attribute),
                    ..
                } => Some(self.value_of(&record, attribute)),
                _ => None,
            })
            .collect();

        let mut state = self.state.lock();
        state.retention.retain(reference);
        let group = state.groups.entry(key).or_insert_with(|| {
            let mut group = self.empty_group();
            for attribute in &self.first_seen {
                group
                    .first
                    .insert(attribute.clone(), self.value_of(&record, attribute));
            }
            group
        });
        for (aggregate, argument) in group.aggregates.iter_mut().zip(&arguments) {
            aggregate.pre_process(argument.as_ref());
        }
        Ok(())
    }

    /// True while every matched reference is retained.
    pub fn should_cache_results(&self) -> bool {
        self.state.lock().retention.is_enabled()
    }

    /// Groups formed so far.
    pub fn number_of_results(&self) -> usize {
        self.state.lock().groups.len()
    }

    /// Groups currently held.
    pub fn retained(&self) -> usize {
        self.state.lock().groups.len()
    }

    /// Post-processes aggregates, then sorts, deduplicates, limits, and strips.
    pub fn finalize_results(self) -> CollectedResults {
        let empty = self.empty_group();
        let state = self.state.into_inner();
        let mut groups: Vec<(Vec<Value>, Group)> = state.groups.into_iter().collect();
        if groups.is_empty() && self.group_by.is_empty() {
            groups.push((Vec::new(), empty));
        }
        groups.sort_by(|a, b| a.0.cmp(&b.0));

        let mut rows: Vec<Row> = groups
            .into_iter()
            .map(|(key, mut group)| {
                let mut row = std::mem::take(&mut group.first);
                for (attribute, value) in self.group_by.iter().zip(key) {
                    row.insert(attribute.clone(), value);
                }
                for ((column, _), aggregate) in self.aggregates.iter().zip(group.aggregates.iter_mut()) {
                    aggregate.post_process();
                    row.insert(column.clone(), aggregate.value());
                }
                row
            })
            .collect();

        if !self.order.is_empty() {
            rows.sort_by(|a, b| compare_keys(&row_key(a, &self.order), &row_key(b, &self.order), &self.order));
        }
        if self.distinct {
            let mut seen = FxHashSet::default();
            rows.retain(|row| {
                let visible: Vec<Value> = self
                    .columns
                    .iter()
                    .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                    .collect();
                seen.insert(visible)
            });
        }

        let number_of_results = rows.len();
        let rows = rows
            .into_iter()
            .skip(self.first_row)
            .take(self.max_results.unwrap_or(usize::MAX))
            .map(|mut row| {
                row.retain(|name, _| self.columns.contains(name));
                row
            })
            .collect();
        CollectedResults {
            items: CollectedItems::Rows(rows),
            number_of_results,
            cached_references: state.retention.into_references(),
        }
    }
}
