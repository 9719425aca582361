use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::query::CollectorKind;

/// Live-query event kinds reported to [`EngineMetrics::live_event`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LiveEventKind {
    /// A record started matching a live query.
    Added,
    /// A matching record was rewritten and still matches.
    Updated,
    /// A record stopped matching (or was deleted).
    Removed,
}

/// Trait for tracking relationship and query activity.
///
/// Implementations must be cheap; they are called on every write and query.
pub trait EngineMetrics: Send + Sync {
    /// Records a persisted entity (including cascaded children).
    fn entity_saved(&self);

    /// Records a deleted entity (including cascaded children).
    fn entity_deleted(&self);

    /// Records a child persisted because of a save cascade.
    fn cascade_save(&self);

    /// Records a child deleted because of a delete cascade.
    fn cascade_delete(&self);

    /// Records a relationship hydration.
    ///
    /// # Parameters
    /// * `lazy` - Whether a deferred collection was assigned instead of records.
    fn relationship_hydrated(&self, lazy: bool);

    /// Records a query execution by collector strategy.
    fn query_executed(&self, kind: CollectorKind);

    /// Records a dispatched live-query event.
    fn live_event(&self, kind: LiveEventKind);
}

/// A no-op implementation of [`EngineMetrics`].
#[derive(Default)]
pub struct NoopMetrics;

impl EngineMetrics for NoopMetrics {
    fn entity_saved(&self) {}
    fn entity_deleted(&self) {}
    fn cascade_save(&self) {}
    fn cascade_delete(&self) {}
    fn relationship_hydrated(&self, _lazy: bool) {}
    fn query_executed(&self, _kind: CollectorKind) {}
    fn live_event(&self, _kind: LiveEventKind) {}
}

/// A thread-safe counter-based implementation of [`EngineMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Entities written.
    pub entities_saved: AtomicU64,
    /// Entities deleted.
    pub entities_deleted: AtomicU64,
    /// Children written through a save cascade.
    pub cascade_saves: AtomicU64,
    /// Children deleted through a delete cascade.
    pub cascade_deletes: AtomicU64,
    /// Relationships hydrated eagerly.
    pub eager_hydrations: AtomicU64,
    /// Relationships hydrated as lazy collections.
    pub lazy_hydrations: AtomicU64,
    /// Queries answered by the plain collector.
    pub plain_queries: AtomicU64,
    /// Queries answered by the projection collector.
    pub projection_queries: AtomicU64,
    /// Queries answered by the grouping collector.
    pub grouping_queries: AtomicU64,
    /// Update/delete executions (reference-only collector).
    pub reference_queries: AtomicU64,
    /// `on_item_added` dispatches.
    pub items_added: AtomicU64,
    /// `on_item_updated` dispatches.
    pub items_updated: AtomicU64,
    /// `on_item_removed` dispatches.
    pub items_removed: AtomicU64,
}

impl EngineMetrics for CounterMetrics {
    fn entity_saved(&self) {
        self.entities_saved.fetch_add(1, Ordering::Relaxed);
    }

    fn entity_deleted(&self) {
        self.entities_deleted.fetch_add(1, Ordering::Relaxed);
    }

    fn cascade_save(&self) {
        self.cascade_saves.fetch_add(1, Ordering::Relaxed);
    }

    fn cascade_delete(&self) {
        self.cascade_deletes.fetch_add(1, Ordering::Relaxed);
    }

    fn relationship_hydrated(&self, lazy: bool) {
        if lazy {
            self.lazy_hydrations.fetch_add(1, Ordering::Relaxed);
        } else {
            self.eager_hydrations.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn query_executed(&self, kind: CollectorKind) {
        let counter = match kind {
            CollectorKind::Plain => &self.plain_queries,
            CollectorKind::Projection => &self.projection_queries,
            CollectorKind::Grouping => &self.grouping_queries,
            CollectorKind::Reference => &self.reference_queries,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn live_event(&self, kind: LiveEventKind) {
        let counter = match kind {
            LiveEventKind::Added => &self.items_added,
            LiveEventKind::Updated => &self.items_updated,
            LiveEventKind::Removed => &self.items_removed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation, [`NoopMetrics`].
pub fn default_metrics() -> Arc<dyn EngineMetrics> {
    Arc::new(NoopMetrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_by_kind() {
        let metrics = CounterMetrics::default();
        metrics.query_executed(CollectorKind::Grouping);
        metrics.query_executed(CollectorKind::Grouping);
        metrics.live_event(LiveEventKind::Removed);
        metrics.relationship_hydrated(true);
        assert_eq!(metrics.grouping_queries.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.items_removed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.lazy_hydrations.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.eager_hydrations.load(Ordering::Relaxed), 0);
    }
}
