//! Predicate construction and evaluation.

use std::cmp::Ordering;

use crate::schema::EntityDescriptor;
use crate::types::{PenumbraError, Record, Result, Value};

use super::ast::{CompareOp, Predicate};

impl Predicate {
    fn compare(attribute: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            attribute: attribute.into(),
            op,
            value: value.into(),
        }
    }

    /// `attribute = value`
    pub fn eq(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(attribute, CompareOp::Eq, value)
    }

    /// `attribute <> value`
    pub fn ne(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(attribute, CompareOp::Ne, value)
    }

    /// `attribute < value`
    pub fn lt(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(attribute, CompareOp::Lt, value)
    }

    /// `attribute <= value`
    pub fn le(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(attribute, CompareOp::Le, value)
    }

    /// `attribute > value`
    pub fn gt(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(attribute, CompareOp::Gt, value)
    }

    /// `attribute >= value`
    pub fn ge(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(attribute, CompareOp::Ge, value)
    }

    /// `attribute IN (values)`
    pub fn is_in<I, V>(attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Predicate::In {
            attribute: attribute.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// `attribute IS NULL`
    pub fn is_null(attribute: impl Into<String>) -> Self {
        Predicate::IsNull {
            attribute: attribute.into(),
        }
    }

    /// Conjunction of `self` and `other`, flattening nested `And`s.
    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Predicate::And(mut left), Predicate::And(right)) => {
                left.extend(right);
                Predicate::And(left)
            }
            (Predicate::And(mut left), right) => {
                left.push(right);
                Predicate::And(left)
            }
            (left, right) => Predicate::And(vec![left, right]),
        }
    }

    /// Disjunction of `self` and `other`.
    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut children) => {
                children.push(other);
                Predicate::Or(children)
            }
            left => Predicate::Or(vec![left, other]),
        }
    }

    /// Negation of `self`.
    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Evaluates the predicate against a stored record.
    ///
    /// Comparisons involving null or values of incompatible types are false;
    /// integers and floats compare numerically.
    pub fn matches(&self, entity: &EntityDescriptor, record: &Record) -> bool {
        match self {
            Predicate::Compare {
                attribute,
                op,
                value,
            } => {
                let Some(actual) = entity.attribute_value(record, attribute) else {
                    return false;
                };
                if actual.is_null() || value.is_null() {
                    return false;
                }
                let Some(ordering) = actual.compare_loose(value) else {
                    return false;
                };
                match op {
                    CompareOp::Eq => ordering == Ordering::Equal,
                    CompareOp::Ne => ordering != Ordering::Equal,
                    CompareOp::Lt => ordering == Ordering::Less,
                    CompareOp::Le => ordering != Ordering::Greater,
                    CompareOp::Gt => ordering == Ordering::Greater,
                    CompareOp::Ge => ordering != Ordering::Less,
                }
            }
            Predicate::In { attribute, values } => {
                let Some(actual) = entity.attribute_value(record, attribute) else {
                    return false;
                };
                !actual.is_null()
                    && values
                        .iter()
                        .any(|candidate| actual.compare_loose(candidate) == Some(Ordering::Equal))
            }
            Predicate::IsNull { attribute } => entity
                .attribute_value(record, attribute)
                .map_or(true, Value::is_null),
            Predicate::And(children) => children.iter().all(|c| c.matches(entity, record)),
            Predicate::Or(children) => children.iter().any(|c| c.matches(entity, record)),
            Predicate::Not(child) => !child.matches(entity, record),
        }
    }

    /// Checks that every referenced attribute exists on `entity`.
    pub fn validate(&self, entity: &EntityDescriptor) -> Result<()> {
        match self {
            Predicate::Compare { attribute, .. }
            | Predicate::In { attribute, .. }
            | Predicate::IsNull { attribute } => {
                if entity.has_attribute(attribute) {
                    Ok(())
                } else {
                    Err(PenumbraError::unknown_attribute(&entity.name, attribute))
                }
            }
            Predicate::And(children) | Predicate::Or(children) => {
                children.iter().try_for_each(|c| c.validate(entity))
            }
            Predicate::Not(child) => child.validate(entity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeType;

    fn entity() -> EntityDescriptor {
        EntityDescriptor::new("Item", 1)
            .attribute("price", AttributeType::Float)
            .attribute("tag", AttributeType::String)
    }

    #[test]
    fn numeric_comparisons_coerce() {
        let entity = entity();
        let record = Record::new("Item", 1).with("price", 10);
        assert!(Predicate::ge("price", 9.5).matches(&entity, &record));
        assert!(Predicate::eq("price", 10.0).matches(&entity, &record));
        assert!(!Predicate::lt("price", 10).matches(&entity, &record));
        assert!(Predicate::eq("id", 1).matches(&entity, &record));
    }

    #[test]
    fn nulls_never_compare() {
        let entity = entity();
        let record = Record::new("Item", 1);
        assert!(!Predicate::eq("tag", "a").matches(&entity, &record));
        assert!(!Predicate::ne("tag", "a").matches(&entity, &record));
        assert!(Predicate::is_null("tag").matches(&entity, &record));
        assert!(Predicate::is_null("tag").negate().negate().matches(&entity, &record));
    }

    #[test]
    fn boolean_combinators() {
        let entity = entity();
        let record = Record::new("Item", 1).with("tag", "b").with("price", 3.0);
        let p = Predicate::is_in("tag", ["a", "b"]).and(Predicate::gt("price", 1));
        assert!(p.matches(&entity, &record));
        let q = Predicate::eq("tag", "z").or(Predicate::lt("price", 1));
        assert!(!q.matches(&entity, &record));
        assert!(Predicate::And(Vec::new()).matches(&entity, &record));
        assert!(!Predicate::Or(Vec::new()).matches(&entity, &record));
    }

    #[test]
    fn validate_walks_the_tree() {
        let entity = entity();
        let bad = Predicate::eq("tag", "a").and(Predicate::eq("nope", 1).negate());
        assert_eq!(bad.validate(&entity).unwrap_err().code(), "UnknownAttribute");
    }
}
