use std::collections::HashSet;
use std::fmt;

use odl_edm::{EdmModel, EdmNavigationProperty, EdmStructuredType, NavigationSourceKind};
use tracing::trace;

use crate::item::{ODataNestedResourceInfo, ODataResource};
use crate::path::{key_values, ODataPath};
use crate::selection::SelectedPropertiesNode;
use crate::type_context::ResourceTypeContext;

/// Per-resource source of conventional URLs and of the navigation links a
/// projection promises but the payload may not contain.
///
/// The cores call [`mark_navigation_link_processed`] for every link they
/// see and drain [`next_unprocessed_navigation_link`] once the resource's
/// own content is exhausted.
///
/// [`mark_navigation_link_processed`]: ResourceMetadataBuilder::mark_navigation_link_processed
/// [`next_unprocessed_navigation_link`]: ResourceMetadataBuilder::next_unprocessed_navigation_link
pub trait ResourceMetadataBuilder: Send + fmt::Debug {
    fn id(&self) -> Option<String>;

    fn edit_link(&self) -> Option<String>;

    fn read_link(&self) -> Option<String> {
        self.edit_link()
    }

    fn navigation_link(&self, name: &str) -> Option<String>;

    fn association_link(&self, name: &str) -> Option<String> {
        self.navigation_link(name).map(|link| format!("{link}/$ref"))
    }

    fn mark_navigation_link_processed(&mut self, name: &str);

    /// Next projected navigation property not yet seen, marked processed
    /// on return.
    fn next_unprocessed_navigation_link(&mut self) -> Option<ODataNestedResourceInfo>;
}

// ---------------------------------------------------------------------------
// NoOpMetadataBuilder
// ---------------------------------------------------------------------------

/// Used when there is no model, navigation source or service root.
#[derive(Debug, Default)]
pub struct NoOpMetadataBuilder;

impl ResourceMetadataBuilder for NoOpMetadataBuilder {
    fn id(&self) -> Option<String> {
        None
    }

    fn edit_link(&self) -> Option<String> {
        None
    }

    fn navigation_link(&self, _name: &str) -> Option<String> {
        None
    }

    fn mark_navigation_link_processed(&mut self, _name: &str) {}

    fn next_unprocessed_navigation_link(&mut self) -> Option<ODataNestedResourceInfo> {
        None
    }
}

// ---------------------------------------------------------------------------
// ConventionalMetadataBuilder
// ---------------------------------------------------------------------------

/// Computes URLs by OData URL conventions from the service root and the
/// resource's canonical path (`People(1)`, `People(1)/Orders(7)`, `Me`).
#[derive(Debug)]
pub struct ConventionalMetadataBuilder {
    service_root: String,
    path: ODataPath,
    key_as_segment: bool,
    explicit_id: Option<String>,
    explicit_edit_link: Option<String>,
    explicit_read_link: Option<String>,
    navigation_properties: Vec<EdmNavigationProperty>,
    processed: HashSet<String>,
    cursor: usize,
}

impl ConventionalMetadataBuilder {
    pub fn new(
        service_root: impl Into<String>,
        path: ODataPath,
        key_as_segment: bool,
        navigation_properties: Vec<EdmNavigationProperty>,
    ) -> Self {
        Self {
            service_root: service_root.into(),
            path,
            key_as_segment,
            explicit_id: None,
            explicit_edit_link: None,
            explicit_read_link: None,
            navigation_properties,
            processed: HashSet::new(),
            cursor: 0,
        }
    }

    /// Links carried by the resource itself win over conventions.
    pub fn with_explicit_links(mut self, resource: &ODataResource) -> Self {
        self.explicit_id = resource.id.clone();
        self.explicit_edit_link = resource.edit_link.clone();
        self.explicit_read_link = resource.read_link.clone();
        self
    }

    fn canonical_url(&self) -> String {
        format!("{}{}", self.service_root, self.path.to_relative_url(self.key_as_segment))
    }
}

impl ResourceMetadataBuilder for ConventionalMetadataBuilder {
    fn id(&self) -> Option<String> {
        Some(self.explicit_id.clone().unwrap_or_else(|| self.canonical_url()))
    }

    fn edit_link(&self) -> Option<String> {
        Some(
            self.explicit_edit_link
                .clone()
                .unwrap_or_else(|| self.canonical_url()),
        )
    }

    fn read_link(&self) -> Option<String> {
        self.explicit_read_link.clone().or_else(|| self.edit_link())
    }

    fn navigation_link(&self, name: &str) -> Option<String> {
        self.edit_link().map(|base| format!("{base}/{name}"))
    }

    fn mark_navigation_link_processed(&mut self, name: &str) {
        self.processed.insert(name.to_string());
    }

    fn next_unprocessed_navigation_link(&mut self) -> Option<ODataNestedResourceInfo> {
        while self.cursor < self.navigation_properties.len() {
            let nav = self.navigation_properties[self.cursor].clone();
            self.cursor += 1;
            if self.processed.insert(nav.name.clone()) {
                trace!(navigation = %nav.name, "unprocessed projected navigation link");
                return Some(ODataNestedResourceInfo {
                    url: self.navigation_link(&nav.name),
                    association_link_url: self.association_link(&nav.name),
                    is_collection: Some(nav.is_collection),
                    name: nav.name,
                });
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Inputs for [`create_metadata_builder`].
pub struct MetadataBuilderInput<'a> {
    pub service_root: Option<&'a str>,
    pub resource: &'a ODataResource,
    pub resource_type: Option<&'a EdmStructuredType>,
    /// Path of the collection or singleton holding the resource.
    pub source_path: &'a ODataPath,
    pub type_context: &'a ResourceTypeContext,
    pub selected: &'a SelectedPropertiesNode,
    pub key_as_segment: bool,
}

/// Canonical path of `resource`: the source path plus its key predicate.
/// Singletons have no key. `None` when the source is not addressable or a
/// key property is missing.
pub fn resource_path(
    model: &dyn EdmModel,
    resource: &ODataResource,
    resource_type: Option<&EdmStructuredType>,
    source_path: &ODataPath,
    kind: Option<NavigationSourceKind>,
) -> Option<ODataPath> {
    if source_path.is_empty() {
        return None;
    }
    match kind? {
        NavigationSourceKind::Singleton => Some(source_path.clone()),
        NavigationSourceKind::UnknownEntitySet => None,
        NavigationSourceKind::EntitySet | NavigationSourceKind::ContainedEntitySet => {
            if source_path.ends_with_key() {
                return Some(source_path.clone());
            }
            let names = model.key_properties(resource_type?);
            let key = key_values(&names, |name| resource.property(name).map(|p| p.value.clone()))?;
            Some(source_path.clone().with_key(key))
        }
    }
}

/// Conventional builder when the model, the navigation source and the
/// service root are all known, otherwise a no-op one.
pub fn create_metadata_builder(
    model: &dyn EdmModel,
    input: MetadataBuilderInput<'_>,
) -> Box<dyn ResourceMetadataBuilder> {
    let (Some(root), Some(ty)) = (input.service_root, input.resource_type) else {
        return Box::new(NoOpMetadataBuilder);
    };
    if !model.is_user_model() {
        return Box::new(NoOpMetadataBuilder);
    }
    let Some(path) = resource_path(
        model,
        input.resource,
        Some(ty),
        input.source_path,
        input.type_context.navigation_source_kind,
    ) else {
        return Box::new(NoOpMetadataBuilder);
    };
    let all = model.navigation_properties(ty);
    let projected = input
        .selected
        .selected_navigation_properties(&all)
        .into_iter()
        .cloned()
        .collect();
    Box::new(
        ConventionalMetadataBuilder::new(root, path, input.key_as_segment, projected)
            .with_explicit_links(input.resource),
    )
}
