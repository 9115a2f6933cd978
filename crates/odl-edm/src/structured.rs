use serde::{Deserialize, Serialize};

use crate::types::EdmTypeRef;

/// Entity types carry keys and can be the target of navigation; complex types
/// are keyless values nested inside a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StructuredKind {
    Entity,
    Complex,
}

/// A declared structural property.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdmProperty {
    pub name: String,
    pub type_ref: EdmTypeRef,
    pub nullable: bool,
}

impl EdmProperty {
    pub fn new(name: impl Into<String>, type_ref: EdmTypeRef) -> Self {
        Self {
            name: name.into(),
            type_ref,
            nullable: true,
        }
    }

    pub fn non_nullable(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// A declared navigation property: a named relationship to another entity
/// type, single-valued or collection-valued.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdmNavigationProperty {
    pub name: String,
    /// Qualified name of the target entity type.
    pub target_type: String,
    pub is_collection: bool,
    /// Contained navigation: the targets live in an implicit entity set
    /// rooted at the owning resource.
    pub contains_target: bool,
    pub nullable: bool,
}

impl EdmNavigationProperty {
    pub fn single(name: impl Into<String>, target_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_type: target_type.into(),
            is_collection: false,
            contains_target: false,
            nullable: true,
        }
    }

    pub fn collection(name: impl Into<String>, target_type: impl Into<String>) -> Self {
        Self {
            is_collection: true,
            ..Self::single(name, target_type)
        }
    }

    pub fn contained(mut self) -> Self {
        self.contains_target = true;
        self
    }
}

/// An entity or complex type definition.
///
/// Lookups on this struct only see *declared* members. Use the model
/// (`EdmModel::find_property` and friends) to include inherited ones.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdmStructuredType {
    pub full_name: String,
    pub kind: StructuredKind,
    pub base_type: Option<String>,
    pub is_open: bool,
    pub is_abstract: bool,
    pub key: Vec<String>,
    pub properties: Vec<EdmProperty>,
    pub navigation_properties: Vec<EdmNavigationProperty>,
}

impl EdmStructuredType {
    pub fn entity(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            kind: StructuredKind::Entity,
            base_type: None,
            is_open: false,
            is_abstract: false,
            key: Vec::new(),
            properties: Vec::new(),
            navigation_properties: Vec::new(),
        }
    }

    pub fn complex(full_name: impl Into<String>) -> Self {
        Self {
            kind: StructuredKind::Complex,
            ..Self::entity(full_name)
        }
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base_type = Some(base.into());
        self
    }

    pub fn open(mut self) -> Self {
        self.is_open = true;
        self
    }

    pub fn with_key(mut self, name: impl Into<String>) -> Self {
        self.key.push(name.into());
        self
    }

    pub fn with_property(mut self, property: EdmProperty) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_navigation(mut self, navigation: EdmNavigationProperty) -> Self {
        self.navigation_properties.push(navigation);
        self
    }

    pub fn is_entity(&self) -> bool {
        self.kind == StructuredKind::Entity
    }

    /// Unqualified name (`Customer` for `NS.Customer`).
    pub fn name(&self) -> &str {
        self.full_name
            .rsplit_once('.')
            .map(|(_, name)| name)
            .unwrap_or(&self.full_name)
    }

    pub fn namespace(&self) -> &str {
        self.full_name
            .rsplit_once('.')
            .map(|(ns, _)| ns)
            .unwrap_or("")
    }

    pub fn declared_property(&self, name: &str) -> Option<&EdmProperty> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn declared_navigation_property(&self, name: &str) -> Option<&EdmNavigationProperty> {
        self.navigation_properties.iter().find(|p| p.name == name)
    }
}
