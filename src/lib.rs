//! Penumbra: relationship-graph persistence and query aggregation for an
//! embedded object database.
//!
//! Records are stored by a pluggable record layer; relationships between
//! them live in per-relationship reference maps owned by the
//! [`relationship::RelationshipEngine`]. Queries are evaluated by a scan
//! provider and aggregated by [`query::Collector`]s, and listened queries are
//! kept current by the [`cache::QueryResultCache`].
//!
//! ```ignore
//! let db = Db::open(Arc::new(schema), DbOptions::default())?;
//! let mut project = Record::new("Project", 1).with_many("tasks", vec![Record::new("Task", 7)]);
//! db.save(&mut project)?;
//! let open = Query::builder("Task").filter(Predicate::eq("done", false)).build()?;
//! let result = db.execute(&open)?;
//! ```

#![warn(missing_docs)]

pub mod cache;
pub mod db;
pub mod logging;
pub mod metrics;
pub mod query;
pub mod relationship;
pub mod schema;
pub mod storage;
pub mod types;

pub use cache::{QueryListener, QueryResultCache};
pub use db::{Db, DbConfig, DbOptions};
pub use metrics::{CounterMetrics, EngineMetrics, LiveEventKind, NoopMetrics};
pub use query::{
    AggregateFunction, Direction, Predicate, Query, QueryBuilder, QueryResult, ResultItems, Row,
};
pub use relationship::{EntityRelationshipManager, LazyRelationshipList, RelationshipEngine};
pub use schema::{
    AttributeType, Cardinality, CascadePolicy, EntityDescriptor, FetchPolicy,
    RelationshipDescriptor, SchemaContext, UpdatePolicy,
};
pub use storage::{MemoryRecordStore, RecordLayer, RecordStore, ScanProvider};
pub use types::{
    PartitionId, PenumbraError, Record, RecordOffset, Reference, RelationshipReference,
    RelationshipValue, Result, Value,
};
