//! Fluent query builder.

use std::sync::Arc;

use crate::cache::QueryListener;
use crate::types::{PenumbraError, Result, Value};

use super::aggregate::AggregateFunction;
use super::ast::{Direction, OrderBy, Predicate, Query, Selection};

/// Fluent builder producing an immutable [`Query`].
///
/// Misuse is recorded and reported by [`QueryBuilder::build`], so calls can
/// be chained without intermediate error handling.
pub struct QueryBuilder {
    query: Query,
    error: Option<PenumbraError>,
}

impl QueryBuilder {
    /// Creates a builder scanning `entity`.
    pub fn new(entity: impl Into<String>) -> Self {
        let entity = entity.into();
        let error = entity
            .is_empty()
            .then_some(PenumbraError::Invalid("query entity must not be empty"));
        Self {
            query: Query {
                entity,
                ..Query::default()
            },
            error,
        }
    }

    fn check_name(&mut self, name: &str) {
        if name.is_empty() && self.error.is_none() {
            self.error = Some(PenumbraError::Invalid("attribute name must not be empty"));
        }
    }

    /// Adds a filter; repeated calls are combined with AND.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.query.criteria = Some(match self.query.criteria.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// Selects an attribute column.
    pub fn select(mut self, attribute: impl Into<String>) -> Self {
        let attribute = attribute.into();
        self.check_name(&attribute);
        self.query.selections.push(Selection::Attribute(attribute));
        self
    }

    /// Selects an aggregate column with an optional alias.
    pub fn aggregate(
        mut self,
        function: AggregateFunction,
        attribute: Option<&str>,
        alias: Option<&str>,
    ) -> Self {
        if let Some(attribute) = attribute {
            self.check_name(attribute);
        }
        if attribute.is_none() && function != AggregateFunction::Count && self.error.is_none() {
            self.error = Some(PenumbraError::Invalid("only count may omit its attribute"));
        }
        self.query.selections.push(Selection::Aggregate {
            function,
            attribute: attribute.map(str::to_owned),
            alias: alias.map(str::to_owned),
        });
        self
    }

    /// `count(*)`
    pub fn count_all(self) -> Self {
        self.aggregate(AggregateFunction::Count, None, None)
    }

    /// `count(attribute)`
    pub fn count(self, attribute: &str) -> Self {
        self.aggregate(AggregateFunction::Count, Some(attribute), None)
    }

    /// `sum(attribute)`
    pub fn sum(self, attribute: &str) -> Self {
        self.aggregate(AggregateFunction::Sum, Some(attribute), None)
    }

    /// `avg(attribute)`
    pub fn avg(self, attribute: &str) -> Self {
        self.aggregate(AggregateFunction::Avg, Some(attribute), None)
    }

    /// `min(attribute)`
    pub fn min(self, attribute: &str) -> Self {
        self.aggregate(AggregateFunction::Min, Some(attribute), None)
    }

    /// `max(attribute)`
    pub fn max(self, attribute: &str) -> Self {
        self.aggregate(AggregateFunction::Max, Some(attribute), None)
    }

    /// Adds a group-by attribute.
    pub fn group_by(mut self, attribute: impl Into<String>) -> Self {
        let attribute = attribute.into();
        self.check_name(&attribute);
        self.query.group_by.push(attribute);
        self
    }

    /// Adds an order-by key.
    pub fn order_by(mut self, attribute: impl Into<String>, direction: Direction) -> Self {
        let attribute = attribute.into();
        self.check_name(&attribute);
        self.query.order_by.push(OrderBy {
            attribute,
            direction,
        });
        self
    }

    /// Adds an ascending order-by key.
    pub fn order_asc(self, attribute: impl Into<String>) -> Self {
        self.order_by(attribute, Direction::Asc)
    }

    /// Adds a descending order-by key.
    pub fn order_desc(self, attribute: impl Into<String>) -> Self {
        self.order_by(attribute, Direction::Desc)
    }

    /// Skips the first `first_row` results.
    pub fn first_row(mut self, first_row: usize) -> Self {
        self.query.first_row = first_row;
        self
    }

    /// Returns at most `max_results` results.
    pub fn max_results(mut self, max_results: usize) -> Self {
        self.query.max_results = Some(max_results);
        self
    }

    /// Drops duplicate records or rows.
    pub fn distinct(mut self) -> Self {
        self.query.distinct = true;
        self
    }

    /// Adds an update assignment.
    pub fn set(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        let attribute = attribute.into();
        self.check_name(&attribute);
        if self.query.updates.iter().any(|(name, _)| name == &attribute) && self.error.is_none() {
            self.error = Some(PenumbraError::Invalid("attribute assigned twice"));
        }
        self.query.updates.push((attribute, value.into()));
        self
    }

    /// Registers a change listener for when the query executes.
    pub fn listener(mut self, listener: Arc<dyn QueryListener>) -> Self {
        self.query.listener = Some(listener);
        self
    }

    /// Finishes the query, reporting the first recorded misuse.
    pub fn build(self) -> Result<Query> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.query),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_accumulate_as_conjunction() {
        let query = Query::builder("T")
            .filter(Predicate::eq("a", 1))
            .filter(Predicate::eq("b", 2))
            .filter(Predicate::eq("c", 3))
            .build()
            .unwrap();
        match query.criteria {
            Some(Predicate::And(children)) => assert_eq!(children.len(), 3),
            other => panic!("unexpected criteria {other:?}"),
        }
    }

    #[test]
    fn misuse_is_reported_at_build() {
        assert!(Query::builder("T").select("").build().is_err());
        assert!(Query::builder("").build().is_err());
        assert!(Query::builder("T").set("a", 1).set("a", 2).build().is_err());
        assert!(Query::builder("T")
            .aggregate(AggregateFunction::Sum, None, None)
            .build()
            .is_err());
    }

    #[test]
    fn alias_renames_aggregate_column() {
        let query = Query::builder("T")
            .aggregate(AggregateFunction::Max, Some("v"), Some("top"))
            .build()
            .unwrap();
        assert_eq!(query.columns(), vec!["top"]);
    }
}
