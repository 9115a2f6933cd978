//! Entity data model capability for the OData JSON core.
//!
//! The reader and writer cores never build models themselves; they consume
//! the [`EdmModel`] trait to answer four kinds of question:
//!
//! - type lookup by qualified name ([`EdmModel::find_type`])
//! - navigation source lookup by name ([`EdmModel::find_navigation_source`])
//! - navigation-property-to-target resolution ([`EdmModel::find_navigation_target`])
//! - whether the model is a real user model or the built-in [`CoreModel`]
//!
//! [`InMemoryModel`] is a complete implementation suitable for services
//! that describe their schema in code.

pub mod error;
pub mod model;
pub mod source;
pub mod structured;
pub mod types;

pub use error::{EdmError, EdmResult};
pub use model::{CoreModel, EdmModel, EdmModelBuilder, InMemoryModel};
pub use source::{EdmNavigationSource, NavigationSourceKind};
pub use structured::{EdmNavigationProperty, EdmProperty, EdmStructuredType, StructuredKind};
pub use types::{EdmPrimitiveKind, EdmTypeRef};
