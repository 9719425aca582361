use rustc_hash::FxHashSet;

use crate::types::RelationshipReference;

/// Visited set of one save/delete/hydrate call tree.
///
/// Membership, not reachability, terminates recursion through cyclic
/// relationship graphs. Created at the root call and dropped when it returns;
/// never shared between threads.
#[derive(Debug, Default)]
pub struct EntityRelationshipManager {
    visited: FxHashSet<RelationshipReference>,
}

impl EntityRelationshipManager {
    /// Creates an empty visited set.
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `endpoint` was already entered in this call tree.
    pub fn contains(&self, endpoint: &RelationshipReference) -> bool {
        self.visited.contains(endpoint)
    }

    /// Marks `endpoint` visited; returns `false` if it already was.
    pub fn mark(&mut self, endpoint: RelationshipReference) -> bool {
        self.visited.insert(endpoint)
    }

    /// Number of endpoints visited so far.
    pub fn len(&self) -> usize {
        self.visited.len()
    }

    /// True if nothing has been visited.
    pub fn is_empty(&self) -> bool {
        self.visited.is_empty()
    }
}
