use thiserror::Error;

/// Errors produced while building or querying an entity data model.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EdmError {
    #[error("duplicate type definition: {0}")]
    DuplicateType(String),

    #[error("duplicate navigation source: {0}")]
    DuplicateNavigationSource(String),

    #[error("type {derived} names unknown base type {base}")]
    UnknownBaseType { derived: String, base: String },

    #[error("inheritance cycle through type {0}")]
    InheritanceCycle(String),

    #[error("navigation source {source_name} references unknown entity type {type_name}")]
    UnknownEntityType { source_name: String, type_name: String },

    #[error("navigation property {property} on {type_name} targets unknown type {target}")]
    UnknownNavigationTarget {
        type_name: String,
        property: String,
        target: String,
    },

    #[error("binding {source_name}/{path} refers to unknown navigation source {target}")]
    InvalidBinding {
        source_name: String,
        path: String,
        target: String,
    },

    #[error("invalid type name: {0}")]
    InvalidTypeName(String),
}

pub type EdmResult<T> = Result<T, EdmError>;
