use odl_edm::{EdmNavigationSource, EdmStructuredType, NavigationSourceKind};

use crate::item::ResourceSerializationInfo;

/// Answers the questions a serializer asks about the resources of one
/// scope: which navigation source they come from, how it is addressed, and
/// which type is expected.
///
/// Built lazily on first use and cached on the scope. Serialization info
/// wins over the model when both are present.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceTypeContext {
    pub navigation_source_name: Option<String>,
    pub navigation_source_entity_type_name: Option<String>,
    pub navigation_source_kind: Option<NavigationSourceKind>,
    pub expected_resource_type_name: Option<String>,
    pub is_from_collection: bool,
}

impl ResourceTypeContext {
    pub fn create(
        serialization_info: Option<&ResourceSerializationInfo>,
        navigation_source: Option<&EdmNavigationSource>,
        expected_type: Option<&EdmStructuredType>,
        is_from_collection: bool,
    ) -> Self {
        if let Some(info) = serialization_info {
            return Self {
                navigation_source_name: Some(info.navigation_source_name.clone()),
                navigation_source_entity_type_name: Some(
                    info.navigation_source_entity_type_name.clone(),
                ),
                navigation_source_kind: Some(info.navigation_source_kind),
                expected_resource_type_name: info
                    .expected_type_name
                    .clone()
                    .or_else(|| Some(info.navigation_source_entity_type_name.clone())),
                is_from_collection: info.is_from_collection,
            };
        }
        Self {
            navigation_source_name: navigation_source.map(|s| s.name.clone()),
            navigation_source_entity_type_name: navigation_source.map(|s| s.entity_type.clone()),
            navigation_source_kind: navigation_source.map(|s| s.kind),
            expected_resource_type_name: expected_type
                .map(|t| t.full_name.clone())
                .or_else(|| navigation_source.map(|s| s.entity_type.clone())),
            is_from_collection,
        }
    }

    pub fn is_singleton(&self) -> bool {
        self.navigation_source_kind == Some(NavigationSourceKind::Singleton)
    }

    /// Unknown sets have no URL of their own.
    pub fn is_addressable(&self) -> bool {
        matches!(
            self.navigation_source_kind,
            Some(NavigationSourceKind::EntitySet | NavigationSourceKind::Singleton)
        )
    }

    /// Type cast segment for a context URL: the actual type when it differs
    /// from the navigation source's element type.
    pub fn type_cast_for(&self, actual_type_name: Option<&str>) -> Option<String> {
        match (actual_type_name, &self.navigation_source_entity_type_name) {
            (Some(actual), Some(declared)) if actual != declared => Some(actual.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_info_wins_over_model() {
        let source = EdmNavigationSource::entity_set("People", "NS.Person");
        let info = ResourceSerializationInfo::singleton("Me", "NS.Person");
        let ctx = ResourceTypeContext::create(Some(&info), Some(&source), None, true);
        assert_eq!(ctx.navigation_source_name.as_deref(), Some("Me"));
        assert!(ctx.is_singleton());
        assert!(!ctx.is_from_collection);
    }

    #[test]
    fn model_context_and_type_cast() {
        let source = EdmNavigationSource::entity_set("People", "NS.Person");
        let ctx = ResourceTypeContext::create(None, Some(&source), None, true);
        assert_eq!(ctx.expected_resource_type_name.as_deref(), Some("NS.Person"));
        assert!(ctx.is_addressable());
        assert_eq!(ctx.type_cast_for(Some("NS.Person")), None);
        assert_eq!(ctx.type_cast_for(Some("NS.Vip")).as_deref(), Some("NS.Vip"));
    }

    #[test]
    fn nothing_known() {
        let ctx = ResourceTypeContext::create(None, None, None, false);
        assert!(ctx.navigation_source_name.is_none());
        assert!(!ctx.is_addressable());
    }
}
