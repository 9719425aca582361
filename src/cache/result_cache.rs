use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use crate::metrics::{EngineMetrics, LiveEventKind};
use crate::query::{Predicate, Query, QuerySignature};
use crate::relationship::EntityObserver;
use crate::schema::EntityDescriptor;
use crate::types::{Record, Reference, Result};

use super::QueryListener;

struct CachedState {
    references: Option<FxHashSet<Reference>>,
    listeners: Vec<Arc<dyn QueryListener>>,
}

/// Cached reference set and listeners of one query signature.
pub struct CachedQueryResult {
    signature: QuerySignature,
    entity: String,
    predicate: Option<Predicate>,
    state: Mutex<CachedState>,
}

impl CachedQueryResult {
    fn new(signature: QuerySignature, query: &Query) -> Self {
        Self {
            signature,
            entity: query.entity.clone(),
            predicate: query.criteria.clone(),
            state: Mutex::new(CachedState {
                references: None,
                listeners: Vec::new(),
            }),
        }
    }

    /// Signature of the cached query.
    pub fn signature(&self) -> QuerySignature {
        self.signature
    }

    /// Entity type the query scans.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// False when the last execution exceeded the retention cap.
    pub fn is_cacheable(&self) -> bool {
        self.state.lock().references.is_some()
    }

    /// Currently matching references, sorted, if cacheable.
    pub fn references(&self) -> Option<Vec<Reference>> {
        self.state.lock().references.as_ref().map(|set| {
            let mut references: Vec<_> = set.iter().copied().collect();
            references.sort_unstable();
            references
        })
    }

    /// Number of subscribed listeners.
    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    fn matches(&self, entity: &EntityDescriptor, record: &Record) -> bool {
        self.predicate
            .as_ref()
            .map_or(true, |predicate| predicate.matches(entity, record))
    }

    /// Applies one write and returns the event to dispatch, if any.
    ///
    /// Without a cached set, membership before the write is decided by
    /// evaluating the predicate on the previously stored record.
    fn apply(
        &self,
        entity: &EntityDescriptor,
        reference: Reference,
        previous: Option<&Record>,
        current: Option<&Record>,
    ) -> Option<(LiveEventKind, Vec<Arc<dyn QueryListener>>)> {
        let now = current.is_some_and(|record| self.matches(entity, record));
        let mut state = self.state.lock();
        let before = match &state.references {
            Some(set) => set.contains(&reference),
            None => previous.is_some_and(|record| self.matches(entity, record)),
        };
        if let Some(set) = &mut state.references {
            if now {
                set.insert(reference);
            } else {
                set.remove(&reference);
            }
        }
        let kind = match (before, now) {
            (false, true) => LiveEventKind::Added,
            (true, true) => LiveEventKind::Updated,
            (true, false) => LiveEventKind::Removed,
            (false, false) => return None,
        };
        if state.listeners.is_empty() {
            return None;
        }
        Some((kind, state.listeners.clone()))
    }
}

fn same_listener(a: &Arc<dyn QueryListener>, b: &Arc<dyn QueryListener>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Live-query cache keyed by query signature.
///
/// Entries with listeners are pinned in the live map. When the last
/// listener unsubscribes, the entry moves to a bounded LRU of idle entries;
/// idle entries keep being maintained on every write, so a resubscription
/// within the LRU window revives an up-to-date reference set.
pub struct QueryResultCache {
    live: RwLock<FxHashMap<QuerySignature, Arc<CachedQueryResult>>>,
    idle: Option<Mutex<LruCache<QuerySignature, Arc<CachedQueryResult>>>>,
    metrics: Arc<dyn EngineMetrics>,
}

impl QueryResultCache {
    /// Creates a cache keeping at most `idle_capacity` unsubscribed entries.
    pub fn new(idle_capacity: usize, metrics: Arc<dyn EngineMetrics>) -> Self {
        Self {
            live: RwLock::new(FxHashMap::default()),
            idle: NonZeroUsize::new(idle_capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            metrics,
        }
    }

    /// Stores the reference set of a fresh execution of `query` and
    /// subscribes `listener`.
    ///
    /// `references` is `None` when the execution exceeded the retention cap.
    /// Subscribing the same listener twice has no further effect.
    pub fn register(
        &self,
        query: &Query,
        references: Option<Vec<Reference>>,
        listener: Arc<dyn QueryListener>,
    ) -> Result<QuerySignature> {
        let signature = query.signature()?;
        let mut live = self.live.write();
        let entry = match live.get(&signature) {
            Some(entry) => Arc::clone(entry),
            None => self
                .idle
                .as_ref()
                .and_then(|idle| idle.lock().pop(&signature))
                .unwrap_or_else(|| Arc::new(CachedQueryResult::new(signature, query))),
        };
        {
            let mut state = entry.state.lock();
            state.references = references.map(|refs| refs.into_iter().collect());
            if !state.listeners.iter().any(|l| same_listener(l, &listener)) {
                state.listeners.push(listener);
            }
        }
        live.insert(signature, entry);
        debug!(%signature, entity = %query.entity, "query_cache.subscribe");
        Ok(signature)
    }

    /// Removes `listener` from the entry of `signature`.
    ///
    /// Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, signature: QuerySignature, listener: &Arc<dyn QueryListener>) -> bool {
        let mut live = self.live.write();
        let Some(entry) = live.get(&signature).cloned() else {
            return false;
        };
        let remaining = {
            let mut state = entry.state.lock();
            let before = state.listeners.len();
            state.listeners.retain(|l| !same_listener(l, listener));
            if state.listeners.len() == before {
                return false;
            }
            state.listeners.len()
        };
        if remaining == 0 {
            live.remove(&signature);
            if let Some(idle) = &self.idle {
                if let Some((evicted, _)) = idle.lock().push(signature, entry) {
                    trace!(signature = %evicted, "query_cache.evict");
                }
            }
            debug!(%signature, "query_cache.idle");
        }
        true
    }

    /// Live or idle entry of `signature`. Does not touch LRU recency.
    pub fn get(&self, signature: QuerySignature) -> Option<Arc<CachedQueryResult>> {
        if let Some(entry) = self.live.read().get(&signature) {
            return Some(Arc::clone(entry));
        }
        self.idle
            .as_ref()
            .and_then(|idle| idle.lock().peek(&signature).cloned())
    }

    /// True if `signature` has at least one listener.
    pub fn is_live(&self, signature: QuerySignature) -> bool {
        self.live.read().contains_key(&signature)
    }

    /// Number of entries with listeners.
    pub fn live_len(&self) -> usize {
        self.live.read().len()
    }

    /// Number of idle entries.
    pub fn idle_len(&self) -> usize {
        self.idle.as_ref().map_or(0, |idle| idle.lock().len())
    }

    fn entries_for(&self, entity: &str) -> Vec<Arc<CachedQueryResult>> {
        let mut entries: Vec<_> = self
            .live
            .read()
            .values()
            .filter(|entry| entry.entity == entity)
            .cloned()
            .collect();
        if let Some(idle) = &self.idle {
            entries.extend(
                idle.lock()
                    .iter()
                    .map(|(_, entry)| entry)
                    .filter(|entry| entry.entity == entity)
                    .cloned(),
            );
        }
        entries
    }

    fn dispatch(&self, kind: LiveEventKind, listeners: &[Arc<dyn QueryListener>], record: &Record) {
        for listener in listeners {
            match kind {
                LiveEventKind::Added => listener.on_item_added(record),
                LiveEventKind::Updated => listener.on_item_updated(record),
                LiveEventKind::Removed => listener.on_item_removed(record),
            }
        }
        self.metrics.live_event(kind);
    }
}

impl EntityObserver for QueryResultCache {
    fn entity_saved(
        &self,
        entity: &EntityDescriptor,
        reference: Reference,
        previous: Option<&Record>,
        current: &Record,
    ) {
        for entry in self.entries_for(&entity.name) {
            if let Some((kind, listeners)) = entry.apply(entity, reference, previous, Some(current)) {
                trace!(signature = %entry.signature, ?kind, %reference, "query_cache.event");
                self.dispatch(kind, &listeners, current);
            }
        }
    }

    fn entity_deleted(&self, entity: &EntityDescriptor, reference: Reference, record: &Record) {
        for entry in self.entries_for(&entity.name) {
            if let Some((kind, listeners)) = entry.apply(entity, reference, Some(record), None) {
                trace!(signature = %entry.signature, ?kind, %reference, "query_cache.event");
                self.dispatch(kind, &listeners, record);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::CounterMetrics;
    use crate::schema::AttributeType;
    use crate::types::{PartitionId, RecordOffset};
    use std::sync::atomic::Ordering;

    #[derive(Default)]
    struct Log(Mutex<Vec<(&'static str, crate::types::Value)>>);

    impl QueryListener for Log {
        fn on_item_added(&self, record: &Record) {
            self.0.lock().push(("added", record.identifier().clone()));
        }
        fn on_item_updated(&self, record: &Record) {
            self.0.lock().push(("updated", record.identifier().clone()));
        }
        fn on_item_removed(&self, record: &Record) {
            self.0.lock().push(("removed", record.identifier().clone()));
        }
    }

    fn entity() -> EntityDescriptor {
        EntityDescriptor::new("Ticket", 1).attribute("open", AttributeType::Bool)
    }

    fn open_query() -> Query {
        Query::builder("Ticket")
            .filter(Predicate::eq("open", true))
            .build()
            .unwrap()
    }

    fn reference(offset: u64) -> Reference {
        Reference::new(PartitionId(1), RecordOffset(offset))
    }

    fn ticket(id: i64, open: bool) -> Record {
        Record::new("Ticket", id).with("open", open)
    }

    #[test]
    fn transitions_produce_events() {
        let metrics = Arc::new(CounterMetrics::default());
        let cache = QueryResultCache::new(4, metrics.clone());
        let log = Arc::new(Log::default());
        let listener: Arc<dyn QueryListener> = log.clone();
        cache.register(&open_query(), Some(Vec::new()), listener).unwrap();

        let entity = entity();
        cache.entity_saved(&entity, reference(0), None, &ticket(1, true));
        cache.entity_saved(&entity, reference(0), Some(&ticket(1, true)), &ticket(1, false));
        cache.entity_saved(&entity, reference(0), Some(&ticket(1, false)), &ticket(1, true));
        cache.entity_saved(&entity, reference(0), Some(&ticket(1, true)), &ticket(1, true));
        cache.entity_deleted(&entity, reference(0), &ticket(1, true));

        let events: Vec<_> = log.0.lock().iter().map(|(kind, _)| *kind).collect();
        assert_eq!(events, vec!["added", "removed", "added", "updated", "removed"]);
        assert_eq!(metrics.items_added.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.items_removed.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn subscription_is_idempotent_per_listener() {
        let cache = QueryResultCache::new(4, crate::metrics::default_metrics());
        let log = Arc::new(Log::default());
        let listener: Arc<dyn QueryListener> = log.clone();
        let signature = cache
            .register(&open_query(), Some(Vec::new()), listener.clone())
            .unwrap();
        cache
            .register(&open_query(), Some(Vec::new()), listener.clone())
            .unwrap();
        assert_eq!(cache.get(signature).unwrap().listener_count(), 1);

        cache.entity_saved(&entity(), reference(3), None, &ticket(3, true));
        assert_eq!(log.0.lock().len(), 1);

        assert!(cache.unsubscribe(signature, &listener));
        assert!(!cache.unsubscribe(signature, &listener));
        assert!(!cache.is_live(signature));
        assert_eq!(cache.idle_len(), 1);
    }

    #[test]
    fn idle_entries_stay_current_and_revive() {
        let cache = QueryResultCache::new(1, crate::metrics::default_metrics());
        let log = Arc::new(Log::default());
        let listener: Arc<dyn QueryListener> = log.clone();
        let signature = cache
            .register(&open_query(), Some(vec![reference(0)]), listener.clone())
            .unwrap();
        cache.unsubscribe(signature, &listener);

        cache.entity_saved(&entity(), reference(5), None, &ticket(5, true));
        assert!(log.0.lock().is_empty());
        assert_eq!(
            cache.get(signature).unwrap().references(),
            Some(vec![reference(0), reference(5)])
        );

        let other = Query::builder("Ticket").build().unwrap();
        let other_sig = cache.register(&other, Some(Vec::new()), listener.clone()).unwrap();
        cache.unsubscribe(other_sig, &listener);
        // Capacity one: the first idle entry was evicted.
        assert!(cache.get(signature).is_none());
        assert!(cache.get(other_sig).is_some());
    }

    #[test]
    fn uncacheable_entries_fall_back_to_previous_record() {
        let cache = QueryResultCache::new(4, crate::metrics::default_metrics());
        let log = Arc::new(Log::default());
        cache.register(&open_query(), None, log.clone()).unwrap();

        let entity = entity();
        cache.entity_saved(&entity, reference(1), Some(&ticket(1, true)), &ticket(1, false));
        cache.entity_saved(&entity, reference(2), Some(&ticket(2, false)), &ticket(2, true));
        let events: Vec<_> = log.0.lock().iter().map(|(kind, _)| *kind).collect();
        assert_eq!(events, vec!["removed", "added"]);
    }
}
