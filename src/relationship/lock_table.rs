use std::hash::{Hash, Hasher};

use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHasher;

use crate::types::RelationshipReference;

use super::reference_map::MapId;

/// Striped locks serializing read-modify-write on relationship-map entries.
///
/// A single table is shared by every map so that a critical section spanning
/// a forward entry and its inverse entries can acquire all of its stripes in
/// ascending order, which rules out lock-order deadlocks.
pub(crate) struct EntryLockTable {
    stripes: Vec<Mutex<()>>,
}

impl EntryLockTable {
    pub(crate) fn new(stripes: usize) -> Self {
        let count = stripes.max(1);
        Self {
            stripes: (0..count).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Stripe guarding `(map, endpoint)`.
    pub(crate) fn stripe(&self, map: MapId, endpoint: &RelationshipReference) -> usize {
        let mut hasher = FxHasher::default();
        map.hash(&mut hasher);
        endpoint.hash(&mut hasher);
        (hasher.finish() as usize) % self.stripes.len()
    }

    /// Acquires every stripe in `stripes` in ascending order.
    pub(crate) fn lock(&self, mut stripes: Vec<usize>) -> EntryGuard<'_> {
        stripes.sort_unstable();
        stripes.dedup();
        let guards = stripes.iter().map(|idx| self.stripes[*idx].lock()).collect();
        EntryGuard {
            stripes,
            _guards: guards,
        }
    }
}

/// Set of held stripes; released on drop.
pub(crate) struct EntryGuard<'a> {
    stripes: Vec<usize>,
    _guards: Vec<MutexGuard<'a, ()>>,
}

impl EntryGuard<'_> {
    /// True if every stripe in `required` is held.
    pub(crate) fn covers(&self, required: &[usize]) -> bool {
        required
            .iter()
            .all(|idx| self.stripes.binary_search(idx).is_ok())
    }
}
