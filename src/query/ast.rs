//! Query descriptor.
//!
//! A [`Query`] is an immutable, programmatically built description of a
//! single-entity query: predicate tree, projections and aggregates,
//! grouping, ordering, paging, and optional update assignments. Its
//! [`QuerySignature`] identifies it in the live-query cache.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

use crate::cache::QueryListener;
use crate::schema::EntityDescriptor;
use crate::types::{PenumbraError, Result, Value};

use super::aggregate::AggregateFunction;
use super::builder::QueryBuilder;

/// Comparison operator of a [`Predicate::Compare`] node.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// Predicate tree evaluated against stored records.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Attribute compared with a literal.
    Compare {
        /// Attribute name (the identifier attribute is allowed).
        attribute: String,
        /// Operator.
        op: CompareOp,
        /// Right-hand literal.
        value: Value,
    },
    /// Attribute equal to one of the literals.
    In {
        /// Attribute name.
        attribute: String,
        /// Candidate literals.
        values: Vec<Value>,
    },
    /// Attribute absent or null.
    IsNull {
        /// Attribute name.
        attribute: String,
    },
    /// Every child matches; empty matches everything.
    And(Vec<Predicate>),
    /// Some child matches; empty matches nothing.
    Or(Vec<Predicate>),
    /// Child does not match.
    Not(Box<Predicate>),
}

/// Sort direction.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

/// One order-by key.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct OrderBy {
    /// Attribute or output column name.
    pub attribute: String,
    /// Direction.
    pub direction: Direction,
}

/// A selected output column.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// Plain attribute.
    Attribute(String),
    /// Aggregate over an attribute; `None` aggregates rows (`count(*)`).
    Aggregate {
        /// Aggregate function.
        function: AggregateFunction,
        /// Argument attribute.
        attribute: Option<String>,
        /// Output column name override.
        alias: Option<String>,
    },
}

impl Selection {
    /// Output column name.
    pub fn column(&self) -> String {
        match self {
            Selection::Attribute(name) => name.clone(),
            Selection::Aggregate {
                alias: Some(alias), ..
            } => alias.clone(),
            Selection::Aggregate {
                function,
                attribute,
                alias: None,
            } => format!("{}({})", function, attribute.as_deref().unwrap_or("*")),
        }
    }

    /// True for aggregate selections.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Selection::Aggregate { .. })
    }
}

/// Stable 64-bit identity of a query, excluding its listener.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct QuerySignature(pub u64);

impl fmt::Display for QuerySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Immutable query descriptor. Build it with [`Query::builder`].
#[derive(Clone, Default)]
pub struct Query {
    /// Entity type scanned.
    pub entity: String,
    /// Filter; `None` matches every record.
    pub criteria: Option<Predicate>,
    /// Output columns; empty returns whole records.
    pub selections: Vec<Selection>,
    /// Group-by attributes.
    pub group_by: Vec<String>,
    /// Order-by keys, most significant first.
    pub order_by: Vec<OrderBy>,
    /// Results skipped before the first returned one.
    pub first_row: usize,
    /// Maximum number of returned results.
    pub max_results: Option<usize>,
    /// Drop duplicate records or rows.
    pub distinct: bool,
    /// Assignments applied by update execution.
    pub updates: Vec<(String, Value)>,
    /// Change listener registered when the query executes.
    pub listener: Option<Arc<dyn QueryListener>>,
}

#[derive(Serialize)]
struct SignatureFields<'a> {
    entity: &'a str,
    criteria: &'a Option<Predicate>,
    selections: &'a [Selection],
    group_by: &'a [String],
    order_by: &'a [OrderBy],
    first_row: usize,
    max_results: Option<usize>,
    distinct: bool,
    updates: &'a [(String, Value)],
}

impl Query {
    /// Starts building a query over `entity`.
    pub fn builder(entity: impl Into<String>) -> QueryBuilder {
        QueryBuilder::new(entity)
    }

    /// True when results are aggregated into groups.
    pub fn is_grouping(&self) -> bool {
        !self.group_by.is_empty() || self.selections.iter().any(Selection::is_aggregate)
    }

    /// True when results are projected rows rather than records.
    pub fn is_projection(&self) -> bool {
        !self.selections.is_empty() || !self.group_by.is_empty()
    }

    /// Output column names, in selection order.
    pub fn columns(&self) -> Vec<String> {
        if self.selections.is_empty() {
            return self.group_by.clone();
        }
        self.selections.iter().map(Selection::column).collect()
    }

    /// Hash of every field except the listener.
    pub fn signature(&self) -> Result<QuerySignature> {
        let fields = SignatureFields {
            entity: &self.entity,
            criteria: &self.criteria,
            selections: &self.selections,
            group_by: &self.group_by,
            order_by: &self.order_by,
            first_row: self.first_row,
            max_results: self.max_results,
            distinct: self.distinct,
            updates: &self.updates,
        };
        let bytes = serde_json::to_vec(&fields)
            .map_err(|_| PenumbraError::Invalid("query is not serializable"))?;
        Ok(QuerySignature(xxh64(&bytes, 0)))
    }

    /// Checks every referenced attribute against `entity`.
    pub fn validate(&self, entity: &EntityDescriptor) -> Result<()> {
        let known = |name: &str| -> Result<()> {
            if entity.has_attribute(name) {
                Ok(())
            } else {
                Err(PenumbraError::unknown_attribute(&entity.name, name))
            }
        };
        if let Some(criteria) = &self.criteria {
            criteria.validate(entity)?;
        }
        for selection in &self.selections {
            match selection {
                Selection::Attribute(name) => known(name)?,
                Selection::Aggregate {
                    attribute: Some(name),
                    ..
                } => known(name)?,
                Selection::Aggregate { attribute: None, .. } => {}
            }
        }
        for name in &self.group_by {
            known(name)?;
        }
        let columns = self.columns();
        for order in &self.order_by {
            if !columns.contains(&order.attribute) {
                known(&order.attribute)?;
            }
        }
        for (name, _) in &self.updates {
            if name == &entity.identifier {
                return Err(PenumbraError::Invalid("the identifier cannot be updated"));
            }
            known(name)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("entity", &self.entity)
            .field("criteria", &self.criteria)
            .field("selections", &self.selections)
            .field("group_by", &self.group_by)
            .field("order_by", &self.order_by)
            .field("first_row", &self.first_row)
            .field("max_results", &self.max_results)
            .field("distinct", &self.distinct)
            .field("updates", &self.updates)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeType;

    #[test]
    fn signature_ignores_listener_and_tracks_fields() {
        struct Silent;
        impl QueryListener for Silent {
            fn on_item_added(&self, _: &crate::types::Record) {}
            fn on_item_updated(&self, _: &crate::types::Record) {}
            fn on_item_removed(&self, _: &crate::types::Record) {}
        }

        let base = Query::builder("Order")
            .filter(Predicate::eq("status", "open"))
            .build()
            .unwrap();
        let mut listened = base.clone();
        listened.listener = Some(Arc::new(Silent));
        assert_eq!(base.signature().unwrap(), listened.signature().unwrap());

        let limited = Query::builder("Order")
            .filter(Predicate::eq("status", "open"))
            .max_results(5)
            .build()
            .unwrap();
        assert_ne!(base.signature().unwrap(), limited.signature().unwrap());
    }

    #[test]
    fn columns_name_aggregates() {
        let query = Query::builder("Order")
            .group_by("status")
            .select("status")
            .count_all()
            .sum("amount")
            .build()
            .unwrap();
        assert_eq!(query.columns(), vec!["status", "count(*)", "sum(amount)"]);
        assert!(query.is_grouping());
    }

    #[test]
    fn validate_rejects_unknown_attributes() {
        let entity = EntityDescriptor::new("Order", 1).attribute("status", AttributeType::String);
        let query = Query::builder("Order").order_asc("missing").build().unwrap();
        assert_eq!(query.validate(&entity).unwrap_err().code(), "UnknownAttribute");

        let update = Query::builder("Order").set("id", 3).build().unwrap();
        assert!(update.validate(&entity).is_err());
    }
}
