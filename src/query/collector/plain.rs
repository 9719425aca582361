use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::query::ast::{OrderBy, Query};
use crate::schema::EntityDescriptor;
use crate::types::{Record, Reference, Result, Value};

use super::{record_key, CollectedItems, CollectedResults, Retention, Window};

struct PlainState {
    window: Window<(Reference, Record)>,
    seen: FxHashSet<BTreeMap<String, Value>>,
    accepted: usize,
    retention: Retention,
}

/// Collects whole records.
///
/// With `distinct`, records with equal attribute maps (identifier excluded)
/// are kept once; the first arrival wins. The set of attribute maps already
/// seen spans the whole scan, so memory under `distinct` grows with the
/// number of distinct records rather than with the window; that set is what
/// keeps `number_of_results` exact.
pub struct PlainCollector {
    entity: Arc<EntityDescriptor>,
    order: Vec<OrderBy>,
    distinct: bool,
    state: Mutex<PlainState>,
}

impl PlainCollector {
    /// Creates a collector for `query`.
    pub fn new(query: &Query, entity: Arc<EntityDescriptor>, max_cached_references: usize) -> Self {
        Self {
            entity,
            order: query.order_by.clone(),
            distinct: query.distinct,
            state: Mutex::new(PlainState {
                window: Window::new(query),
                seen: FxHashSet::default(),
                accepted: 0,
                retention: Retention::new(max_cached_references),
            }),
        }
    }

    /// Accepts one matched record.
    pub fn collect(&self, reference: Reference, record: Record) -> Result<()> {
        let key = record_key(&self.entity, &record, &self.order);
        let fingerprint = self.distinct.then(|| record.attributes().clone());
        let mut state = self.state.lock();
        state.retention.retain(reference);
        if let Some(fingerprint) = fingerprint {
            if !state.seen.insert(fingerprint) {
                return Ok(());
            }
        }
        state.accepted += 1;
        state.window.offer(key, (reference, record));
        Ok(())
    }

    /// True while every matched reference is retained.
    pub fn should_cache_results(&self) -> bool {
        self.state.lock().retention.is_enabled()
    }

    /// Records accepted so far.
    pub fn number_of_results(&self) -> usize {
        self.state.lock().accepted
    }

    /// References of the limited results.
    pub fn limited_references(&self) -> Vec<Reference> {
        self.state
            .lock()
            .window
            .items()
            .map(|(reference, _)| *reference)
            .collect()
    }

    /// Records currently held by the window.
    pub fn retained(&self) -> usize {
        self.state.lock().window.len()
    }

    /// Produces the limited records.
    pub fn finalize_results(self) -> CollectedResults {
        let state = self.state.into_inner();
        CollectedResults {
            items: CollectedItems::Records(state.window.into_items()),
            number_of_results: state.accepted,
            cached_references: state.retention.into_references(),
        }
    }
}
