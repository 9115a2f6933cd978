use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use odl_edm::{EdmNavigationProperty, EdmNavigationSource, EdmStructuredType};

use crate::duplicate::DuplicatePropertyNamesChecker;
use crate::item::{ODataItem, ODataResourceSet};
use crate::metadata::ResourceMetadataBuilder;
use crate::path::ODataPath;
use crate::selection::SelectedPropertiesNode;
use crate::type_context::ResourceTypeContext;

// ---------------------------------------------------------------------------
// WrittenMetadataProperties
// ---------------------------------------------------------------------------

/// Single-shot metadata properties of a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MetadataProperty {
    EditLink = 1,
    ReadLink = 1 << 1,
    MediaEditLink = 1 << 2,
    MediaReadLink = 1 << 3,
    MediaContentType = 1 << 4,
    MediaETag = 1 << 5,
}

/// Bitmask of metadata properties already written for one resource.
///
/// Writing one twice is a defect in the serializer, so marking an already
/// set bit panics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WrittenMetadataProperties(u8);

impl WrittenMetadataProperties {
    pub fn is_written(&self, property: MetadataProperty) -> bool {
        self.0 & property as u8 != 0
    }

    pub fn mark(&mut self, property: MetadataProperty) {
        assert!(
            !self.is_written(property),
            "metadata property {property:?} written twice for the same resource"
        );
        self.0 |= property as u8;
    }

    pub fn mark_edit_link_written(&mut self) {
        self.mark(MetadataProperty::EditLink);
    }

    pub fn mark_read_link_written(&mut self) {
        self.mark(MetadataProperty::ReadLink);
    }
}

// ---------------------------------------------------------------------------
// InstanceAnnotationWriteTracker
// ---------------------------------------------------------------------------

/// Names of instance annotations already written for one item, so that
/// annotations visited both at start and at end are emitted once.
#[derive(Clone, Debug, Default)]
pub struct InstanceAnnotationWriteTracker {
    written: HashSet<String>,
}

impl InstanceAnnotationWriteTracker {
    pub fn is_written(&self, name: &str) -> bool {
        self.written.contains(name)
    }

    /// Returns `true` the first time `name` is marked.
    pub fn mark_written(&mut self, name: &str) -> bool {
        self.written.insert(name.to_string())
    }
}

// ---------------------------------------------------------------------------
// Scope data
// ---------------------------------------------------------------------------

/// Bookkeeping for a resource scope.
#[derive(Debug, Default)]
pub struct ResourceScopeData {
    pub duplicate_checker: DuplicatePropertyNamesChecker,
    pub written_metadata: WrittenMetadataProperties,
    pub annotation_tracker: InstanceAnnotationWriteTracker,
    pub type_context: Option<ResourceTypeContext>,
    pub metadata_builder: Option<Box<dyn ResourceMetadataBuilder>>,
    /// Reader: the payload has ended but projected links are still being
    /// synthesised.
    pub processing_missing_projected_navigation_links: bool,
}

impl ResourceScopeData {
    pub fn new(duplicate_checker: DuplicatePropertyNamesChecker) -> Self {
        Self {
            duplicate_checker,
            ..Self::default()
        }
    }
}

/// Bookkeeping for a resource set scope.
#[derive(Debug, Default)]
pub struct ResourceSetScopeData {
    /// Resources written or read so far.
    pub resource_count: usize,
    pub annotation_tracker: InstanceAnnotationWriteTracker,
    pub type_context: Option<ResourceTypeContext>,
}

/// Bookkeeping for a navigation link scope.
#[derive(Debug, Default)]
pub struct NavigationLinkScopeData {
    /// Declared navigation property, when the model knows it.
    pub navigation_property: Option<EdmNavigationProperty>,
    /// Cardinality from the model, else from the link itself.
    pub is_collection: Option<bool>,
    /// Items (resources, sets, reference links) written into the content.
    pub content_count: usize,
    /// Writer: a resource or resource set went into the content.
    pub expanded_written: bool,
    /// Writer: a resource set went into the content.
    pub resource_set_written: bool,
    /// Reader: the link's value is inline in the payload.
    pub expanded: bool,
    /// Reader: reference link URLs still to be reported.
    pub pending_reference_links: Vec<String>,
    /// Reader: the expanded resource set, seeded with the `Name@odata.count`
    /// and `Name@odata.nextLink` annotations that preceded its value.
    pub expanded_resource_set: Option<ODataResourceSet>,
    /// Reader: produced from metadata, not from the payload.
    pub synthesized: bool,
}

/// Variant part of a scope.
#[derive(Debug, Default)]
pub enum ScopeData {
    #[default]
    None,
    Resource(ResourceScopeData),
    ResourceSet(ResourceSetScopeData),
    NavigationLink(NavigationLinkScopeData),
}

impl ScopeData {
    pub fn as_resource(&self) -> Option<&ResourceScopeData> {
        match self {
            Self::Resource(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_resource_mut(&mut self) -> Option<&mut ResourceScopeData> {
        match self {
            Self::Resource(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_resource_set_mut(&mut self) -> Option<&mut ResourceSetScopeData> {
        match self {
            Self::ResourceSet(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_navigation_link(&self) -> Option<&NavigationLinkScopeData> {
        match self {
            Self::NavigationLink(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_navigation_link_mut(&mut self) -> Option<&mut NavigationLinkScopeData> {
        match self {
            Self::NavigationLink(d) => Some(d),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// One nesting level of a payload being written or read.
///
/// `S` is the state enumeration of the owning state machine.
#[derive(Debug)]
pub struct Scope<S> {
    pub state: S,
    pub item: Option<ODataItem>,
    pub navigation_source: Option<Arc<EdmNavigationSource>>,
    pub resource_type: Option<Arc<EdmStructuredType>>,
    pub selected_properties: SelectedPropertiesNode,
    /// Writer only: the subtree is walked but never serialized.
    pub skip_writing: bool,
    pub odata_path: ODataPath,
    pub data: ScopeData,
}

impl<S> Scope<S> {
    pub fn new(state: S) -> Self {
        Self {
            state,
            item: None,
            navigation_source: None,
            resource_type: None,
            selected_properties: SelectedPropertiesNode::EntireSubtree,
            skip_writing: false,
            odata_path: ODataPath::new(),
            data: ScopeData::None,
        }
    }

    pub fn with_item(mut self, item: Option<ODataItem>) -> Self {
        self.item = item;
        self
    }

    pub fn with_data(mut self, data: ScopeData) -> Self {
        self.data = data;
        self
    }

    pub fn resource_type_name(&self) -> Option<&str> {
        self.resource_type.as_deref().map(|t| t.full_name.as_str())
    }
}

// ---------------------------------------------------------------------------
// ScopeStack
// ---------------------------------------------------------------------------

/// Stack of scopes addressed by index.
///
/// Never empty: the bottom scope is the root (Start, later Completed).
/// Parent and grandparent are plain lookups and never mutate the stack.
#[derive(Debug)]
pub struct ScopeStack<S> {
    scopes: Vec<Scope<S>>,
}

impl<S: Copy + fmt::Debug> ScopeStack<S> {
    pub fn new(root: Scope<S>) -> Self {
        Self { scopes: vec![root] }
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn push(&mut self, scope: Scope<S>) {
        self.scopes.push(scope);
    }

    /// Pop the current scope. The root is never popped; use
    /// [`ScopeStack::replace_root`] to change it.
    pub fn pop(&mut self) -> Option<Scope<S>> {
        if self.scopes.len() > 1 {
            self.scopes.pop()
        } else {
            None
        }
    }

    pub fn current(&self) -> &Scope<S> {
        &self.scopes[self.scopes.len() - 1]
    }

    pub fn current_mut(&mut self) -> &mut Scope<S> {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    pub fn parent(&self) -> Option<&Scope<S>> {
        self.from_top(1)
    }

    pub fn parent_mut(&mut self) -> Option<&mut Scope<S>> {
        let len = self.scopes.len();
        if len >= 2 {
            Some(&mut self.scopes[len - 2])
        } else {
            None
        }
    }

    pub fn grandparent(&self) -> Option<&Scope<S>> {
        self.from_top(2)
    }

    /// Scope `n` levels below the top (`0` is the current scope).
    pub fn from_top(&self, n: usize) -> Option<&Scope<S>> {
        let len = self.scopes.len();
        if n < len {
            Some(&self.scopes[len - 1 - n])
        } else {
            None
        }
    }

    pub fn root(&self) -> &Scope<S> {
        &self.scopes[0]
    }

    /// Replace the root; only legal when it is the only scope left.
    pub fn replace_root(&mut self, scope: Scope<S>) {
        debug_assert_eq!(self.scopes.len(), 1, "root replaced with scopes still open");
        self.scopes[0] = scope;
    }

    /// Swap the current scope for another, returning the old one.
    pub fn replace_current(&mut self, scope: Scope<S>) -> Scope<S> {
        std::mem::replace(self.current_mut(), scope)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scope<S>> {
        self.scopes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum TestState {
        Start,
        Outer,
        Inner,
        Leaf,
    }

    #[test]
    fn parent_and_grandparent_by_index() {
        let mut stack = ScopeStack::new(Scope::new(TestState::Start));
        assert!(stack.parent().is_none());
        stack.push(Scope::new(TestState::Outer));
        stack.push(Scope::new(TestState::Inner));
        stack.push(Scope::new(TestState::Leaf));
        assert_eq!(stack.current().state, TestState::Leaf);
        assert_eq!(stack.parent().unwrap().state, TestState::Inner);
        assert_eq!(stack.grandparent().unwrap().state, TestState::Outer);
        assert_eq!(stack.len(), 4);
    }

    #[test]
    fn root_is_never_popped() {
        let mut stack = ScopeStack::new(Scope::new(TestState::Start));
        stack.push(Scope::new(TestState::Outer));
        assert_eq!(stack.pop().unwrap().state, TestState::Outer);
        assert!(stack.pop().is_none());
        assert_eq!(stack.current().state, TestState::Start);
        stack.replace_root(Scope::new(TestState::Leaf));
        assert_eq!(stack.root().state, TestState::Leaf);
    }

    #[test]
    fn replace_current_keeps_depth() {
        let mut stack = ScopeStack::new(Scope::new(TestState::Start));
        stack.push(Scope::new(TestState::Outer));
        let old = stack.replace_current(Scope::new(TestState::Inner));
        assert_eq!(old.state, TestState::Outer);
        assert_eq!(stack.current().state, TestState::Inner);
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn edit_link_marked_once() {
        let mut written = WrittenMetadataProperties::default();
        written.mark_edit_link_written();
        assert!(written.is_written(MetadataProperty::EditLink));
        assert!(!written.is_written(MetadataProperty::ReadLink));
    }

    #[test]
    #[should_panic(expected = "written twice")]
    fn edit_link_marked_twice_panics() {
        let mut scope = ResourceScopeData::default();
        scope.written_metadata.mark_edit_link_written();
        scope.written_metadata.mark_edit_link_written();
    }

    #[test]
    fn annotation_tracker_reports_first_write() {
        let mut tracker = InstanceAnnotationWriteTracker::default();
        assert!(tracker.mark_written("Custom.Note"));
        assert!(!tracker.mark_written("Custom.Note"));
        assert!(tracker.is_written("Custom.Note"));
    }
}
