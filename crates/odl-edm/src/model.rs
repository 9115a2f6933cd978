use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::error::{EdmError, EdmResult};
use crate::source::EdmNavigationSource;
use crate::structured::{EdmNavigationProperty, EdmProperty, EdmStructuredType};

// ---------------------------------------------------------------------------
// EdmModel trait
// ---------------------------------------------------------------------------

/// Read-only model capability consumed by the reader and writer cores.
///
/// Implementations must be cheap to query: the cores ask the model on every
/// resource and navigation link. Only the four required methods need an
/// implementation; the inheritance-aware helpers are derived from them.
pub trait EdmModel: Send + Sync {
    /// Look up an entity or complex type by qualified name.
    fn find_type(&self, full_name: &str) -> Option<Arc<EdmStructuredType>>;

    /// Look up an entity set or singleton by name.
    fn find_navigation_source(&self, name: &str) -> Option<Arc<EdmNavigationSource>>;

    /// `false` for the built-in core model, which declares nothing. Metadata
    /// validators are skipped entirely when this returns `false`.
    fn is_user_model(&self) -> bool;

    /// All types in the model, in declaration order.
    fn types(&self) -> Vec<Arc<EdmStructuredType>>;

    /// Follow a navigation property from a source to the source holding its
    /// targets: contained navigation yields a synthetic contained set,
    /// bound navigation yields the bound source, unbound navigation yields
    /// an unknown set typed by the property's target.
    fn find_navigation_target(
        &self,
        source: &EdmNavigationSource,
        navigation: &EdmNavigationProperty,
    ) -> Arc<EdmNavigationSource> {
        if navigation.contains_target {
            return Arc::new(EdmNavigationSource::contained(
                navigation.name.clone(),
                navigation.target_type.clone(),
            ));
        }
        source
            .bindings
            .get(&navigation.name)
            .and_then(|target| self.find_navigation_source(target))
            .unwrap_or_else(|| {
                Arc::new(EdmNavigationSource::unknown(
                    navigation.name.clone(),
                    navigation.target_type.clone(),
                ))
            })
    }

    /// Find a structural property, walking base types.
    fn find_property(&self, ty: &EdmStructuredType, name: &str) -> Option<EdmProperty> {
        let mut current = Some(Arc::new(ty.clone()));
        let mut guard = 0;
        while let Some(t) = current {
            if let Some(p) = t.declared_property(name) {
                return Some(p.clone());
            }
            guard += 1;
            if guard > 64 {
                return None;
            }
            current = t.base_type.as_deref().and_then(|b| self.find_type(b));
        }
        None
    }

    /// Find a navigation property, walking base types.
    fn find_navigation_property(
        &self,
        ty: &EdmStructuredType,
        name: &str,
    ) -> Option<EdmNavigationProperty> {
        self.navigation_properties(ty)
            .into_iter()
            .find(|n| n.name == name)
    }

    /// Navigation properties declared on the type and its base types, base
    /// first.
    fn navigation_properties(&self, ty: &EdmStructuredType) -> Vec<EdmNavigationProperty> {
        let mut chain = vec![ty.clone()];
        let mut next = ty.base_type.clone();
        while let Some(base) = next {
            match self.find_type(&base) {
                Some(t) if chain.len() < 64 => {
                    next = t.base_type.clone();
                    chain.push((*t).clone());
                }
                _ => break,
            }
        }
        chain
            .iter()
            .rev()
            .flat_map(|t| t.navigation_properties.iter().cloned())
            .collect()
    }

    /// Key property names, inherited from the root of the hierarchy.
    fn key_properties(&self, ty: &EdmStructuredType) -> Vec<String> {
        if !ty.key.is_empty() {
            return ty.key.clone();
        }
        ty.base_type
            .as_deref()
            .and_then(|b| self.find_type(b))
            .map(|base| self.key_properties(&base))
            .unwrap_or_default()
    }

    /// Returns `true` if `derived` is `base` or inherits from it.
    fn is_assignable(&self, base: &str, derived: &str) -> bool {
        let mut current = Some(derived.to_string());
        let mut guard = 0;
        while let Some(name) = current {
            if name == base {
                return true;
            }
            guard += 1;
            if guard > 64 {
                return false;
            }
            current = self.find_type(&name).and_then(|t| t.base_type.clone());
        }
        false
    }
}

// ---------------------------------------------------------------------------
// CoreModel
// ---------------------------------------------------------------------------

/// The built-in model: declares no types or sources. Used when the caller
/// has no service metadata; everything is read and written as open content.
#[derive(Clone, Copy, Debug, Default)]
pub struct CoreModel;

impl EdmModel for CoreModel {
    fn find_type(&self, _full_name: &str) -> Option<Arc<EdmStructuredType>> {
        None
    }

    fn find_navigation_source(&self, _name: &str) -> Option<Arc<EdmNavigationSource>> {
        None
    }

    fn is_user_model(&self) -> bool {
        false
    }

    fn types(&self) -> Vec<Arc<EdmStructuredType>> {
        Vec::new()
    }
}

// ---------------------------------------------------------------------------
// InMemoryModel
// ---------------------------------------------------------------------------

/// HashMap-backed user model built with [`EdmModelBuilder`].
#[derive(Debug, Default)]
pub struct InMemoryModel {
    types: HashMap<String, Arc<EdmStructuredType>>,
    order: Vec<String>,
    sources: HashMap<String, Arc<EdmNavigationSource>>,
}

impl InMemoryModel {
    pub fn builder() -> EdmModelBuilder {
        EdmModelBuilder::default()
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }
}

impl EdmModel for InMemoryModel {
    fn find_type(&self, full_name: &str) -> Option<Arc<EdmStructuredType>> {
        self.types.get(full_name.trim_start_matches('#')).cloned()
    }

    fn find_navigation_source(&self, name: &str) -> Option<Arc<EdmNavigationSource>> {
        self.sources.get(name).cloned()
    }

    fn is_user_model(&self) -> bool {
        true
    }

    fn types(&self) -> Vec<Arc<EdmStructuredType>> {
        self.order
            .iter()
            .filter_map(|name| self.types.get(name).cloned())
            .collect()
    }
}

/// Collects type and source declarations and validates cross references on
/// [`EdmModelBuilder::build`].
#[derive(Debug, Default)]
pub struct EdmModelBuilder {
    types: Vec<EdmStructuredType>,
    sources: Vec<EdmNavigationSource>,
}

impl EdmModelBuilder {
    pub fn add_type(mut self, ty: EdmStructuredType) -> Self {
        self.types.push(ty);
        self
    }

    pub fn add_source(mut self, source: EdmNavigationSource) -> Self {
        self.sources.push(source);
        self
    }

    pub fn build(self) -> EdmResult<InMemoryModel> {
        let mut model = InMemoryModel::default();

        for ty in self.types {
            if model.types.contains_key(&ty.full_name) {
                return Err(EdmError::DuplicateType(ty.full_name));
            }
            model.order.push(ty.full_name.clone());
            model.types.insert(ty.full_name.clone(), Arc::new(ty));
        }

        for ty in model.types.values() {
            if let Some(base) = &ty.base_type {
                if !model.types.contains_key(base) {
                    return Err(EdmError::UnknownBaseType {
                        derived: ty.full_name.clone(),
                        base: base.clone(),
                    });
                }
            }
            for nav in &ty.navigation_properties {
                if !model.types.contains_key(&nav.target_type) {
                    return Err(EdmError::UnknownNavigationTarget {
                        type_name: ty.full_name.clone(),
                        property: nav.name.clone(),
                        target: nav.target_type.clone(),
                    });
                }
            }
        }

        for name in &model.order {
            let mut seen = HashSet::new();
            let mut current = Some(name.clone());
            while let Some(n) = current {
                if !seen.insert(n.clone()) {
                    return Err(EdmError::InheritanceCycle(name.clone()));
                }
                current = model.types.get(&n).and_then(|t| t.base_type.clone());
            }
        }

        for source in self.sources {
            if model.sources.contains_key(&source.name) {
                return Err(EdmError::DuplicateNavigationSource(source.name));
            }
            if !model.types.contains_key(&source.entity_type) {
                return Err(EdmError::UnknownEntityType {
                    source_name: source.name,
                    type_name: source.entity_type,
                });
            }
            model.sources.insert(source.name.clone(), Arc::new(source));
        }

        for source in model.sources.values() {
            for (path, target) in &source.bindings {
                if !model.sources.contains_key(target) {
                    return Err(EdmError::InvalidBinding {
                        source_name: source.name.clone(),
                        path: path.clone(),
                        target: target.clone(),
                    });
                }
            }
        }

        debug!(
            types = model.types.len(),
            sources = model.sources.len(),
            "model built"
        );
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::NavigationSourceKind;
    use crate::types::{EdmPrimitiveKind, EdmTypeRef};

    fn int32() -> EdmTypeRef {
        EdmTypeRef::Primitive(EdmPrimitiveKind::Int32)
    }

    fn sample() -> InMemoryModel {
        InMemoryModel::builder()
            .add_type(
                EdmStructuredType::entity("NS.Person")
                    .with_key("Id")
                    .with_property(EdmProperty::new("Id", int32()))
                    .with_navigation(EdmNavigationProperty::single("BestFriend", "NS.Person")),
            )
            .add_type(
                EdmStructuredType::entity("NS.Customer")
                    .with_base("NS.Person")
                    .with_navigation(EdmNavigationProperty::collection("Orders", "NS.Order"))
                    .with_navigation(
                        EdmNavigationProperty::collection("Notes", "NS.Order").contained(),
                    ),
            )
            .add_type(EdmStructuredType::entity("NS.Order").with_key("OrderId"))
            .add_source(
                EdmNavigationSource::entity_set("Customers", "NS.Customer")
                    .with_binding("Orders", "Orders"),
            )
            .add_source(EdmNavigationSource::entity_set("Orders", "NS.Order"))
            .build()
            .unwrap()
    }

    #[test]
    fn inherited_members_are_visible() {
        let model = sample();
        let customer = model.find_type("NS.Customer").unwrap();
        assert!(model.find_property(&customer, "Id").is_some());
        assert!(model.find_navigation_property(&customer, "BestFriend").is_some());
        assert_eq!(model.key_properties(&customer), vec!["Id".to_string()]);
        let navs: Vec<String> = model
            .navigation_properties(&customer)
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(navs, vec!["BestFriend", "Orders", "Notes"]);
    }

    #[test]
    fn navigation_targets_follow_bindings_and_containment() {
        let model = sample();
        let customers = model.find_navigation_source("Customers").unwrap();
        let customer = model.find_type("NS.Customer").unwrap();

        let orders = model.find_navigation_property(&customer, "Orders").unwrap();
        let target = model.find_navigation_target(&customers, &orders);
        assert_eq!(target.name, "Orders");
        assert_eq!(target.kind, NavigationSourceKind::EntitySet);

        let notes = model.find_navigation_property(&customer, "Notes").unwrap();
        let target = model.find_navigation_target(&customers, &notes);
        assert_eq!(target.kind, NavigationSourceKind::ContainedEntitySet);
        assert_eq!(target.entity_type, "NS.Order");

        let friend = model.find_navigation_property(&customer, "BestFriend").unwrap();
        let target = model.find_navigation_target(&customers, &friend);
        assert_eq!(target.kind, NavigationSourceKind::UnknownEntitySet);
    }

    #[test]
    fn assignability_walks_base_chain() {
        let model = sample();
        assert!(model.is_assignable("NS.Person", "NS.Customer"));
        assert!(model.is_assignable("NS.Customer", "NS.Customer"));
        assert!(!model.is_assignable("NS.Customer", "NS.Person"));
        assert!(!model.is_assignable("NS.Order", "NS.Customer"));
    }

    #[test]
    fn build_rejects_unknown_base() {
        let err = InMemoryModel::builder()
            .add_type(EdmStructuredType::entity("NS.A").with_base("NS.Missing"))
            .build()
            .unwrap_err();
        assert!(matches!(err, EdmError::UnknownBaseType { .. }));
    }

    #[test]
    fn build_rejects_cycles_and_duplicates() {
        let err = InMemoryModel::builder()
            .add_type(EdmStructuredType::entity("NS.A").with_base("NS.B"))
            .add_type(EdmStructuredType::entity("NS.B").with_base("NS.A"))
            .build()
            .unwrap_err();
        assert!(matches!(err, EdmError::InheritanceCycle(_)));

        let err = InMemoryModel::builder()
            .add_type(EdmStructuredType::entity("NS.A"))
            .add_type(EdmStructuredType::complex("NS.A"))
            .build()
            .unwrap_err();
        assert_eq!(err, EdmError::DuplicateType("NS.A".into()));
    }

    #[test]
    fn build_rejects_bad_binding() {
        let err = InMemoryModel::builder()
            .add_type(EdmStructuredType::entity("NS.A"))
            .add_source(EdmNavigationSource::entity_set("As", "NS.A").with_binding("X", "Nope"))
            .build()
            .unwrap_err();
        assert!(matches!(err, EdmError::InvalidBinding { .. }));
    }

    #[test]
    fn core_model_is_not_a_user_model() {
        let core = CoreModel;
        assert!(!core.is_user_model());
        assert!(core.find_type("NS.A").is_none());
        assert!(core.types().is_empty());
    }
}
