use thiserror::Error;

/// Errors surfaced by the relationship engine, the query layer, and the
/// record-layer contracts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PenumbraError {
    /// A reference or identifier did not resolve to a stored record.
    #[error("{entity} {identifier} not found")]
    NotFound {
        /// Entity type that was looked up.
        entity: String,
        /// Identifier or location that failed to resolve.
        identifier: String,
    },
    /// The relationship value disagrees with the declared cardinality.
    #[error("relationship '{entity}.{relationship}' expects {expected}")]
    InvalidRelationshipType {
        /// Owning entity type.
        entity: String,
        /// Relationship name.
        relationship: String,
        /// Expected shape ("to-one" / "to-many").
        expected: &'static str,
    },
    /// Entity type is absent from the schema.
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),
    /// Attribute is not declared on the entity.
    #[error("unknown attribute '{attribute}' on '{entity}'")]
    UnknownAttribute {
        /// Entity type.
        entity: String,
        /// Attribute name.
        attribute: String,
    },
    /// Relationship is not declared on the entity.
    #[error("unknown relationship '{relationship}' on '{entity}'")]
    UnknownRelationship {
        /// Entity type.
        entity: String,
        /// Relationship name.
        relationship: String,
    },
    /// Record carries a null identifier.
    #[error("record of '{0}' has no identifier")]
    MissingIdentifier(String),
    /// Schema or configuration could not be built.
    #[error("schema error: {0}")]
    Schema(String),
    /// Generic invalid argument.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PenumbraError>;

impl PenumbraError {
    /// Builds a [`PenumbraError::NotFound`] for an entity/identifier pair.
    pub fn not_found(entity: impl Into<String>, identifier: impl ToString) -> Self {
        PenumbraError::NotFound {
            entity: entity.into(),
            identifier: identifier.to_string(),
        }
    }

    /// Builds a [`PenumbraError::UnknownAttribute`].
    pub fn unknown_attribute(entity: impl Into<String>, attribute: impl Into<String>) -> Self {
        PenumbraError::UnknownAttribute {
            entity: entity.into(),
            attribute: attribute.into(),
        }
    }

    /// Builds a [`PenumbraError::UnknownRelationship`].
    pub fn unknown_relationship(
        entity: impl Into<String>,
        relationship: impl Into<String>,
    ) -> Self {
        PenumbraError::UnknownRelationship {
            entity: entity.into(),
            relationship: relationship.into(),
        }
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            PenumbraError::NotFound { .. } => "NotFound",
            PenumbraError::InvalidRelationshipType { .. } => "InvalidRelationshipType",
            PenumbraError::UnknownEntity(_) => "UnknownEntity",
            PenumbraError::UnknownAttribute { .. } => "UnknownAttribute",
            PenumbraError::UnknownRelationship { .. } => "UnknownRelationship",
            PenumbraError::MissingIdentifier(_) => "MissingIdentifier",
            PenumbraError::Schema(_) => "Schema",
            PenumbraError::Invalid(_) => "Invalid",
        }
    }

    /// True for [`PenumbraError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, PenumbraError::NotFound { .. })
    }
}

impl From<toml::de::Error> for PenumbraError {
    fn from(err: toml::de::Error) -> Self {
        PenumbraError::Schema(err.to_string())
    }
}
