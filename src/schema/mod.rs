#![forbid(unsafe_code)]

//! Schema context: entity and relationship descriptors.
//!
//! The context is read-only after construction and shared process-wide via
//! `Arc`. It can be assembled programmatically with [`SchemaBuilder`] or
//! loaded from TOML with [`SchemaContext::from_toml_str`].

use std::cmp::Ordering;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{PartitionId, PenumbraError, Record, Result, Value};

/// Relationship cardinality.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// At most one child per parent.
    #[default]
    ToOne,
    /// Any number of children per parent.
    ToMany,
}

/// Whether saves and deletes propagate from a parent to its children.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadePolicy {
    /// Children are referenced, never written or deleted.
    #[default]
    None,
    /// Children are persisted with the parent.
    Save,
    /// Orphaned children are deleted with the parent.
    Delete,
    /// Both save and delete cascade.
    All,
    /// The relationship is not written by entity saves; use `update_all`.
    DeferSave,
}

impl CascadePolicy {
    /// True when child records are persisted along with the parent.
    pub fn cascades_save(self) -> bool {
        matches!(self, CascadePolicy::Save | CascadePolicy::All)
    }

    /// True when detached children are deleted.
    pub fn cascades_delete(self) -> bool {
        matches!(self, CascadePolicy::Delete | CascadePolicy::All)
    }
}

/// Hydration strategy for a relationship.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchPolicy {
    /// Children are materialized with the parent.
    #[default]
    Eager,
    /// To-many children are materialized page by page on access.
    Lazy,
    /// Not hydrated unless explicitly forced.
    None,
}

/// How a to-many save combines the in-memory children with the stored set.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// The stored set becomes exactly the in-memory set.
    #[default]
    Replace,
    /// The in-memory set is unioned into the stored set; nothing is detached.
    Merge,
}

/// Declared attribute type. `Any` disables type checks.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    /// Any value.
    #[default]
    Any,
    /// Boolean.
    Bool,
    /// Integer.
    Int,
    /// Float.
    Float,
    /// String.
    String,
    /// Binary.
    Bytes,
    /// Milliseconds since epoch.
    DateTime,
}

impl AttributeType {
    /// Checks whether `value` is acceptable for this attribute type.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (AttributeType::Any, _) | (_, Value::Null) => true,
            (AttributeType::Bool, Value::Bool(_))
            | (AttributeType::Int, Value::Int(_))
            | (AttributeType::Float, Value::Float(_) | Value::Int(_))
            | (AttributeType::String, Value::String(_))
            | (AttributeType::Bytes, Value::Bytes(_))
            | (AttributeType::DateTime, Value::DateTime(_)) => true,
            _ => false,
        }
    }
}

/// Attribute metadata.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    /// Attribute name.
    pub name: String,
    /// Declared type.
    #[serde(default)]
    pub kind: AttributeType,
}

/// Relationship metadata bound to its owning entity type.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RelationshipDescriptor {
    /// Relationship (field) name.
    pub name: String,
    /// Owning entity type; filled in by the schema builder.
    #[serde(default)]
    pub owner: String,
    /// Entity type of the children.
    pub target: String,
    /// Declared cardinality.
    #[serde(default)]
    pub cardinality: Cardinality,
    /// Cascade policy.
    #[serde(default)]
    pub cascade: CascadePolicy,
    /// Fetch policy.
    #[serde(default)]
    pub fetch: FetchPolicy,
    /// Name of the paired relationship on the target type, if any.
    #[serde(default)]
    pub inverse: Option<String>,
    /// To-many save combination policy.
    #[serde(default)]
    pub update: UpdatePolicy,
}

impl RelationshipDescriptor {
    /// Creates a to-one relationship to `target`.
    pub fn to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, target, Cardinality::ToOne)
    }

    /// Creates a to-many relationship to `target`.
    pub fn to_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, target, Cardinality::ToMany)
    }

    fn new(name: impl Into<String>, target: impl Into<String>, cardinality: Cardinality) -> Self {
        Self {
            name: name.into(),
            owner: String::new(),
            target: target.into(),
            cardinality,
            cascade: CascadePolicy::None,
            fetch: FetchPolicy::Eager,
            inverse: None,
            update: UpdatePolicy::Replace,
        }
    }

    /// Sets the cascade policy.
    pub fn cascade(mut self, policy: CascadePolicy) -> Self {
        self.cascade = policy;
        self
    }

    /// Sets the fetch policy.
    pub fn fetch(mut self, policy: FetchPolicy) -> Self {
        self.fetch = policy;
        self
    }

    /// Names the paired relationship on the target type.
    pub fn inverse(mut self, name: impl Into<String>) -> Self {
        self.inverse = Some(name.into());
        self
    }

    /// Sets the to-many update policy.
    pub fn update(mut self, policy: UpdatePolicy) -> Self {
        self.update = policy;
        self
    }

    /// True for to-many relationships.
    pub fn is_to_many(&self) -> bool {
        self.cardinality == Cardinality::ToMany
    }

    /// Expected shape, used in cardinality errors.
    pub fn expected_shape(&self) -> &'static str {
        match self.cardinality {
            Cardinality::ToOne => "to-one",
            Cardinality::ToMany => "to-many",
        }
    }
}

/// Entity type metadata.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    /// Entity type name.
    pub name: String,
    /// Storage partition for records of this type.
    pub partition: PartitionId,
    /// Name of the identifier attribute.
    #[serde(default = "default_identifier")]
    pub identifier: String,
    /// Declared attributes (excluding the identifier).
    #[serde(default)]
    pub attributes: Vec<AttributeDescriptor>,
    /// Declared relationships.
    #[serde(default)]
    pub relationships: Vec<RelationshipDescriptor>,
    /// Attributes defining the natural order; empty means unordered.
    #[serde(default)]
    pub natural_order: Vec<String>,
}

fn default_identifier() -> String {
    "id".to_owned()
}

impl EntityDescriptor {
    /// Creates a descriptor with identifier attribute `id`.
    pub fn new(name: impl Into<String>, partition: impl Into<PartitionId>) -> Self {
        Self {
            name: name.into(),
            partition: partition.into(),
            identifier: default_identifier(),
            attributes: Vec::new(),
            relationships: Vec::new(),
            natural_order: Vec::new(),
        }
    }

    /// Renames the identifier attribute.
    pub fn identifier(mut self, name: impl Into<String>) -> Self {
        self.identifier = name.into();
        self
    }

    /// Declares an attribute.
    pub fn attribute(mut self, name: impl Into<String>, kind: AttributeType) -> Self {
        self.attributes.push(AttributeDescriptor {
            name: name.into(),
            kind,
        });
        self
    }

    /// Declares a relationship.
    pub fn relationship(mut self, relationship: RelationshipDescriptor) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Declares the natural order used when sorting hydrated collections.
    pub fn natural_order<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.natural_order = attributes.into_iter().map(Into::into).collect();
        self
    }

    /// True if `name` is the identifier or a declared attribute.
    pub fn has_attribute(&self, name: &str) -> bool {
        name == self.identifier || self.attributes.iter().any(|a| a.name == name)
    }

    /// Looks up a declared attribute.
    pub fn attribute_descriptor(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Looks up a relationship by name.
    pub fn relationship_descriptor(&self, name: &str) -> Result<&RelationshipDescriptor> {
        self.relationships
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| PenumbraError::unknown_relationship(&self.name, name))
    }

    /// Reads an attribute from `record`, treating the identifier as an attribute.
    pub fn attribute_value<'r>(&self, record: &'r Record, name: &str) -> Option<&'r Value> {
        if name == self.identifier {
            Some(record.identifier())
        } else {
            record.attribute(name)
        }
    }

    /// True if the type declares a natural order.
    pub fn is_naturally_orderable(&self) -> bool {
        !self.natural_order.is_empty()
    }

    /// Compares two records of this type by natural order.
    pub fn natural_cmp(&self, a: &Record, b: &Record) -> Ordering {
        for attribute in &self.natural_order {
            let left = self.attribute_value(a, attribute).unwrap_or(&Value::Null);
            let right = self.attribute_value(b, attribute).unwrap_or(&Value::Null);
            match left.cmp(right) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }

    /// Validates attribute names and types of a record about to be saved.
    pub fn validate_record(&self, record: &Record) -> Result<()> {
        if record.identifier().is_null() {
            return Err(PenumbraError::MissingIdentifier(self.name.clone()));
        }
        for (name, value) in record.attributes() {
            let Some(attribute) = self.attribute_descriptor(name) else {
                return Err(PenumbraError::unknown_attribute(&self.name, name));
            };
            if !attribute.kind.accepts(value) {
                return Err(PenumbraError::Schema(format!(
                    "attribute '{}.{}' does not accept {}",
                    self.name, name, value
                )));
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct SchemaFile {
    #[serde(default, rename = "entity")]
    entities: Vec<EntityDescriptor>,
}

/// Assembles and validates a [`SchemaContext`].
#[derive(Default)]
pub struct SchemaBuilder {
    entities: Vec<EntityDescriptor>,
}

impl SchemaBuilder {
    /// Adds an entity type.
    pub fn entity(mut self, entity: EntityDescriptor) -> Self {
        self.entities.push(entity);
        self
    }

    /// Validates the descriptors and freezes them into a context.
    pub fn build(self) -> Result<SchemaContext> {
        let mut entities = FxHashMap::default();
        let mut by_partition = FxHashMap::default();
        for mut entity in self.entities {
            if by_partition
                .insert(entity.partition, entity.name.clone())
                .is_some()
            {
                return Err(PenumbraError::Schema(format!(
                    "partition {} assigned twice",
                    entity.partition
                )));
            }
            for relationship in &mut entity.relationships {
                relationship.owner = entity.name.clone();
            }
            let name = entity.name.clone();
            if entities.insert(name.clone(), Arc::new(entity)).is_some() {
                return Err(PenumbraError::Schema(format!("entity '{name}' declared twice")));
            }
        }
        let context = SchemaContext {
            entities,
            by_partition,
        };
        context.validate()?;
        debug!(entities = context.entities.len(), "schema.built");
        Ok(context)
    }
}

/// Read-only, process-wide schema metadata.
#[derive(Debug, Default)]
pub struct SchemaContext {
    entities: FxHashMap<String, Arc<EntityDescriptor>>,
    by_partition: FxHashMap<PartitionId, String>,
}

impl SchemaContext {
    /// Starts a programmatic schema definition.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Parses a schema from TOML (`[[entity]]` tables).
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let file: SchemaFile = toml::from_str(source)?;
        let mut builder = SchemaBuilder::default();
        for entity in file.entities {
            builder = builder.entity(entity);
        }
        builder.build()
    }

    /// Looks up an entity descriptor.
    pub fn entity(&self, name: &str) -> Result<&Arc<EntityDescriptor>> {
        self.entities
            .get(name)
            .ok_or_else(|| PenumbraError::UnknownEntity(name.to_owned()))
    }

    /// Looks up the entity stored in `partition`.
    pub fn entity_for_partition(&self, partition: PartitionId) -> Result<&Arc<EntityDescriptor>> {
        let name = self
            .by_partition
            .get(&partition)
            .ok_or_else(|| PenumbraError::UnknownEntity(format!("partition {partition}")))?;
        self.entity(name)
    }

    /// Looks up a relationship descriptor.
    pub fn relationship(&self, entity: &str, name: &str) -> Result<&RelationshipDescriptor> {
        self.entity(entity)?.relationship_descriptor(name)
    }

    /// Returns the paired descriptor on the target type, if declared.
    pub fn inverse_of(&self, relationship: &RelationshipDescriptor) -> Option<&RelationshipDescriptor> {
        let inverse = relationship.inverse.as_deref()?;
        self.entities
            .get(&relationship.target)?
            .relationships
            .iter()
            .find(|r| r.name == inverse)
    }

    /// Iterates over every entity descriptor.
    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.entities.values()
    }

    fn validate(&self) -> Result<()> {
        for entity in self.entities.values() {
            for order in &entity.natural_order {
                if !entity.has_attribute(order) {
                    return Err(PenumbraError::unknown_attribute(&entity.name, order));
                }
            }
            for relationship in &entity.relationships {
                let target = self.entities.get(&relationship.target).ok_or_else(|| {
                    PenumbraError::Schema(format!(
                        "relationship '{}.{}' targets unknown entity '{}'",
                        entity.name, relationship.name, relationship.target
                    ))
                })?;
                let Some(inverse_name) = relationship.inverse.as_deref() else {
                    continue;
                };
                let inverse = target
                    .relationships
                    .iter()
                    .find(|r| r.name == inverse_name)
                    .ok_or_else(|| {
                        PenumbraError::unknown_relationship(&target.name, inverse_name)
                    })?;
                if inverse.target != entity.name {
                    return Err(PenumbraError::Schema(format!(
                        "inverse '{}.{}' does not point back to '{}'",
                        target.name, inverse.name, entity.name
                    )));
                }
                if let Some(back) = inverse.inverse.as_deref() {
                    if back != relationship.name {
                        return Err(PenumbraError::Schema(format!(
                            "inverse pair '{}.{}' / '{}.{}' is inconsistent",
                            entity.name, relationship.name, target.name, inverse.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_schema() -> SchemaContext {
        SchemaContext::builder()
            .entity(
                EntityDescriptor::new("Project", 1)
                    .attribute("name", AttributeType::String)
                    .relationship(
                        RelationshipDescriptor::to_many("tasks", "Task")
                            .cascade(CascadePolicy::All)
                            .inverse("project"),
                    ),
            )
            .entity(
                EntityDescriptor::new("Task", 2)
                    .attribute("title", AttributeType::String)
                    .relationship(RelationshipDescriptor::to_one("project", "Project").inverse("tasks"))
                    .natural_order(["title"]),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn resolves_inverse_pairs() {
        let schema = project_schema();
        let tasks = schema.relationship("Project", "tasks").unwrap();
        assert_eq!(tasks.owner, "Project");
        let inverse = schema.inverse_of(tasks).unwrap();
        assert_eq!(inverse.name, "project");
        assert_eq!(inverse.owner, "Task");
        assert_eq!(schema.entity_for_partition(PartitionId(2)).unwrap().name, "Task");
    }

    #[test]
    fn rejects_dangling_inverse() {
        let err = SchemaContext::builder()
            .entity(
                EntityDescriptor::new("A", 1)
                    .relationship(RelationshipDescriptor::to_one("b", "B").inverse("missing")),
            )
            .entity(EntityDescriptor::new("B", 2))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), "UnknownRelationship");
    }

    #[test]
    fn rejects_shared_partition() {
        let err = SchemaContext::builder()
            .entity(EntityDescriptor::new("A", 1))
            .entity(EntityDescriptor::new("B", 1))
            .build()
            .unwrap_err();
        assert!(matches!(err, PenumbraError::Schema(_)));
    }

    #[test]
    fn loads_from_toml() {
        let schema = SchemaContext::from_toml_str(
            r#"
            [[entity]]
            name = "Team"
            partition = 1
            attributes = [{ name = "name", kind = "string" }]
            relationships = [
              { name = "members", target = "Player", cardinality = "to_many", cascade = "save", fetch = "lazy", inverse = "team" },
            ]

            [[entity]]
            name = "Player"
            partition = 2
            identifier = "handle"
            relationships = [{ name = "team", target = "Team", inverse = "members" }]
            "#,
        )
        .unwrap();
        let members = schema.relationship("Team", "members").unwrap();
        assert!(members.is_to_many());
        assert_eq!(members.fetch, FetchPolicy::Lazy);
        assert!(members.cascade.cascades_save());
        assert!(!members.cascade.cascades_delete());
        assert_eq!(schema.entity("Player").unwrap().identifier, "handle");
    }

    #[test]
    fn validates_attribute_types() {
        let schema = project_schema();
        let project = schema.entity("Project").unwrap();
        assert!(project
            .validate_record(&Record::new("Project", 1).with("name", "x"))
            .is_ok());
        assert!(project
            .validate_record(&Record::new("Project", 1).with("name", 3))
            .is_err());
        assert_eq!(
            project
                .validate_record(&Record::new("Project", Value::Null))
                .unwrap_err()
                .code(),
            "MissingIdentifier"
        );
    }
}
