#![forbid(unsafe_code)]

//! Relationship graph engine.
//!
//! Edges live in one [`RelationshipReferenceMap`] per `(entity type,
//! relationship)` pair, keyed by [`crate::types::RelationshipReference`].
//! [`RelationshipEngine`] keeps inverse pairs symmetric, applies cascade
//! policy, and hydrates records eagerly or through
//! [`LazyRelationshipList`]s.

mod engine;
mod lazy;
mod lock_table;
mod manager;
mod reference_map;

pub use engine::{EntityObserver, NoopObserver, RelationshipEngine};
pub use lazy::{LazyIter, LazyRelationshipList};
pub use manager::EntityRelationshipManager;
pub use reference_map::{MapId, ReferenceSet, RelationshipReferenceMap, RelationshipStore};
