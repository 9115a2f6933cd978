use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// How a navigation source is addressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NavigationSourceKind {
    EntitySet,
    Singleton,
    /// Implicit set behind a containment navigation property.
    ContainedEntitySet,
    /// The target of a navigation property with no binding in the model.
    UnknownEntitySet,
}

impl fmt::Display for NavigationSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EntitySet => write!(f, "EntitySet"),
            Self::Singleton => write!(f, "Singleton"),
            Self::ContainedEntitySet => write!(f, "ContainedEntitySet"),
            Self::UnknownEntitySet => write!(f, "UnknownEntitySet"),
        }
    }
}

/// An entity set, singleton, or contained set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdmNavigationSource {
    pub name: String,
    pub kind: NavigationSourceKind,
    /// Qualified name of the element entity type.
    pub entity_type: String,
    /// Navigation property path -> target navigation source name.
    pub bindings: BTreeMap<String, String>,
}

impl EdmNavigationSource {
    pub fn entity_set(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NavigationSourceKind::EntitySet,
            entity_type: entity_type.into(),
            bindings: BTreeMap::new(),
        }
    }

    pub fn singleton(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            kind: NavigationSourceKind::Singleton,
            ..Self::entity_set(name, entity_type)
        }
    }

    pub fn contained(property: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            kind: NavigationSourceKind::ContainedEntitySet,
            ..Self::entity_set(property, entity_type)
        }
    }

    pub fn unknown(property: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            kind: NavigationSourceKind::UnknownEntitySet,
            ..Self::entity_set(property, entity_type)
        }
    }

    pub fn with_binding(mut self, path: impl Into<String>, target: impl Into<String>) -> Self {
        self.bindings.insert(path.into(), target.into());
        self
    }

    pub fn is_singleton(&self) -> bool {
        self.kind == NavigationSourceKind::Singleton
    }

    pub fn is_contained(&self) -> bool {
        self.kind == NavigationSourceKind::ContainedEntitySet
    }
}
