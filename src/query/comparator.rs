//! Ordering of sort keys.

use std::cmp::Ordering;

use crate::types::Value;

use super::ast::{Direction, OrderBy};

/// Orders two values by the total value order (integers and floats
/// numerically, other types by rank).
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    a.cmp(b)
}

/// Orders two key tuples position by position under `order`.
///
/// Ties are broken only by later positions of the declared order-by list.
pub fn compare_keys(a: &[Value], b: &[Value], order: &[OrderBy]) -> Ordering {
    for ((left, right), key) in a.iter().zip(b).zip(order) {
        let ordering = compare_values(left, right);
        let ordering = match key.direction {
            Direction::Asc => ordering,
            Direction::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
