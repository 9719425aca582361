//! Aggregate functions used by grouping collectors.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Value;

use super::comparator::compare_values;

/// Supported aggregate functions.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    /// Number of rows, or of non-null arguments.
    Count,
    /// Sum of numeric arguments; integer unless a float is seen.
    Sum,
    /// Arithmetic mean of numeric arguments.
    Avg,
    /// Smallest non-null argument.
    Min,
    /// Largest non-null argument.
    Max,
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug)]
enum State {
    Count(u64),
    Sum { int: i64, float: f64, floating: bool, seen: bool },
    Avg { total: f64, count: u64, mean: Option<f64> },
    Extreme(Option<Value>),
}

/// Running accumulator for one aggregate in one group.
#[derive(Clone, Debug)]
pub struct Aggregate {
    function: AggregateFunction,
    state: State,
}

impl Aggregate {
    /// Creates an empty accumulator.
    pub fn new(function: AggregateFunction) -> Self {
        let state = match function {
            AggregateFunction::Count => State::Count(0),
            AggregateFunction::Sum => State::Sum {
                int: 0,
                float: 0.0,
                floating: false,
                seen: false,
            },
            AggregateFunction::Avg => State::Avg {
                total: 0.0,
                count: 0,
                mean: None,
            },
            AggregateFunction::Min | AggregateFunction::Max => State::Extreme(None),
        };
        Self { function, state }
    }

    /// Function computed by this accumulator.
    pub fn function(&self) -> AggregateFunction {
        self.function
    }

    /// Folds one row in. `None` is a row without an argument (`count(*)`).
    pub fn pre_process(&mut self, argument: Option<&Value>) {
        let argument = match argument {
            None => {
                if let State::Count(count) = &mut self.state {
                    *count += 1;
                }
                return;
            }
            Some(value) if value.is_null() => return,
            Some(value) => value,
        };
        match &mut self.state {
            State::Count(count) => *count += 1,
            State::Sum {
                int,
                float,
                floating,
                seen,
            } => match argument {
                Value::Int(v) if !*floating => match int.checked_add(*v) {
                    Some(next) => {
                        *int = next;
                        *seen = true;
                    }
                    None => {
                        *float = *int as f64 + *v as f64;
                        *floating = true;
                        *seen = true;
                    }
                },
                other => {
                    if let Some(v) = other.as_f64() {
                        if !*floating {
                            *float = *int as f64;
                            *floating = true;
                        }
                        *float += v;
                        *seen = true;
                    }
                }
            },
            State::Avg { total, count, .. } => {
                if let Some(v) = argument.as_f64() {
                    *total += v;
                    *count += 1;
                }
            }
            State::Extreme(current) => {
                let wanted = if self.function == AggregateFunction::Min {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                let replace = match current {
                    Some(existing) => compare_values(argument, existing) == wanted,
                    None => true,
                };
                if replace {
                    *current = Some(argument.clone());
                }
            }
        }
    }

    /// Finishes the accumulator once every row was folded in.
    pub fn post_process(&mut self) {
        if let State::Avg { total, count, mean } = &mut self.state {
            *mean = (*count > 0).then(|| *total / *count as f64);
        }
    }

    /// Current result. Empty sums, averages and extremes are null.
    pub fn value(&self) -> Value {
        match &self.state {
            State::Count(count) => Value::Int(i64::try_from(*count).unwrap_or(i64::MAX)),
            State::Sum { seen: false, .. } => Value::Null,
            State::Sum {
                floating: true,
                float,
                ..
            } => Value::Float(*float),
            State::Sum { int, .. } => Value::Int(*int),
            State::Avg { mean, .. } => mean.map_or(Value::Null, Value::Float),
            State::Extreme(value) => value.clone().unwrap_or(Value::Null),
        }
    }
}
