#![forbid(unsafe_code)]

//! Query descriptors, collectors, and execution.
//!
//! Queries are built programmatically, evaluated by a scan provider, and
//! aggregated by a [`Collector`] into a bounded, ordered result.

/// Aggregate functions and their accumulators.
pub mod aggregate;

/// Query descriptor, predicate tree, and signature.
pub mod ast;

/// Fluent query builder.
pub mod builder;

/// Plain, projection, grouping, and reference-only collectors.
pub mod collector;

/// Sort-key ordering shared by collectors and aggregates.
pub mod comparator;

/// Scan, collect, hydrate, and register.
pub mod executor;

mod predicate;

pub use aggregate::{Aggregate, AggregateFunction};
pub use ast::{CompareOp, Direction, OrderBy, Predicate, Query, QuerySignature, Selection};
pub use builder::QueryBuilder;
pub use collector::{CollectedItems, CollectedResults, Collector, CollectorKind, Row};
pub use executor::{QueryExecutor, QueryResult, ResultItems};
