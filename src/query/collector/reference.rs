use std::sync::Arc;

use parking_lot::Mutex;

use crate::query::ast::{OrderBy, Query};
use crate::schema::EntityDescriptor;
use crate::types::{Record, Reference, Result};

use super::{record_key, CollectedItems, CollectedResults, Window};

struct ReferenceState {
    window: Window<Reference>,
    accepted: usize,
}

/// Keeps only references (and their order-by keys) for update and delete
/// execution; matched records are dropped as soon as the key is read.
pub struct ReferenceCollector {
    entity: Arc<EntityDescriptor>,
    order: Vec<OrderBy>,
    state: Mutex<ReferenceState>,
}

impl ReferenceCollector {
    /// Creates a collector for `query`.
    pub fn new(query: &Query, entity: Arc<EntityDescriptor>) -> Self {
        Self {
            entity,
            order: query.order_by.clone(),
            state: Mutex::new(ReferenceState {
                window: Window::new(query),
                accepted: 0,
            }),
        }
    }

    /// Accepts one matched record.
    pub fn collect(&self, reference: Reference, record: Record) -> Result<()> {
        let key = record_key(&self.entity, &record, &self.order);
        drop(record);
        let mut state = self.state.lock();
        state.accepted += 1;
        state.window.offer(key, reference);
        Ok(())
    }

    /// References accepted so far.
    pub fn number_of_results(&self) -> usize {
        self.state.lock().accepted
    }

    /// Limited references.
    pub fn limited_references(&self) -> Vec<Reference> {
        self.state.lock().window.items().copied().collect()
    }

    /// References currently held by the window.
    pub fn retained(&self) -> usize {
        self.state.lock().window.len()
    }

    /// Produces the limited references.
    pub fn finalize_results(self) -> CollectedResults {
        let state = self.state.into_inner();
        CollectedResults {
            items: CollectedItems::References(state.window.into_items()),
            number_of_results: state.accepted,
            cached_references: None,
        }
    }
}
