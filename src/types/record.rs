use std::collections::BTreeMap;

use crate::relationship::LazyRelationshipList;

use super::Value;

/// Materialized value of one relationship slot on a [`Record`].
#[derive(Clone, Debug, PartialEq)]
pub enum RelationshipValue {
    /// To-one slot; `None` means "explicitly detached".
    One(Option<Record>),
    /// Eagerly materialized to-many slot.
    Many(Vec<Record>),
    /// Deferred to-many slot backed by the stored reference set.
    Lazy(LazyRelationshipList),
}

impl RelationshipValue {
    /// Human-readable shape, used in cardinality errors.
    pub fn shape(&self) -> &'static str {
        match self {
            RelationshipValue::One(_) => "to-one",
            RelationshipValue::Many(_) | RelationshipValue::Lazy(_) => "to-many",
        }
    }
}

/// Dynamically typed entity instance.
///
/// Attributes are stored by the record layer; relationship slots are never
/// stored inline and only travel between the caller and the relationship
/// engine. A slot that is absent from the map is "not materialized" and is
/// left untouched on save.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    entity: String,
    identifier: Value,
    attributes: BTreeMap<String, Value>,
    relationships: BTreeMap<String, RelationshipValue>,
}

impl Record {
    /// Creates an empty record of `entity` keyed by `identifier`.
    pub fn new(entity: impl Into<String>, identifier: impl Into<Value>) -> Self {
        Self {
            entity: entity.into(),
            identifier: identifier.into(),
            attributes: BTreeMap::new(),
            relationships: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Builder-style to-one relationship setter.
    pub fn with_one(mut self, name: impl Into<String>, child: Option<Record>) -> Self {
        self.relationships
            .insert(name.into(), RelationshipValue::One(child));
        self
    }

    /// Builder-style to-many relationship setter.
    pub fn with_many(mut self, name: impl Into<String>, children: Vec<Record>) -> Self {
        self.relationships
            .insert(name.into(), RelationshipValue::Many(children));
        self
    }

    /// Entity type name.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Declared primary key.
    pub fn identifier(&self) -> &Value {
        &self.identifier
    }

    /// Attribute value by name (the identifier is not part of this map).
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// All stored attributes.
    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    /// Sets or replaces an attribute.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Relationship slot by name.
    pub fn relationship(&self, name: &str) -> Option<&RelationshipValue> {
        self.relationships.get(name)
    }

    /// Mutable relationship slot by name.
    pub fn relationship_mut(&mut self, name: &str) -> Option<&mut RelationshipValue> {
        self.relationships.get_mut(name)
    }

    /// Replaces a relationship slot.
    pub fn set_relationship(&mut self, name: impl Into<String>, value: RelationshipValue) {
        self.relationships.insert(name.into(), value);
    }

    /// Removes a relationship slot, marking it as not materialized.
    pub fn clear_relationship(&mut self, name: &str) -> Option<RelationshipValue> {
        self.relationships.remove(name)
    }

    /// Copy of this record without any relationship slots.
    pub fn detached(&self) -> Record {
        Record {
            entity: self.entity.clone(),
            identifier: self.identifier.clone(),
            attributes: self.attributes.clone(),
            relationships: BTreeMap::new(),
        }
    }

    /// Convenience accessor for an eagerly materialized to-one child.
    pub fn one(&self, name: &str) -> Option<&Record> {
        match self.relationships.get(name) {
            Some(RelationshipValue::One(child)) => child.as_ref(),
            _ => None,
        }
    }

    /// Convenience accessor for an eagerly materialized to-many slot.
    pub fn many(&self, name: &str) -> Option<&[Record]> {
        match self.relationships.get(name) {
            Some(RelationshipValue::Many(children)) => Some(children),
            _ => None,
        }
    }
}
