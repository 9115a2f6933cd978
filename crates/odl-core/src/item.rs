use std::fmt;

use odl_edm::NavigationSourceKind;
use serde::{Deserialize, Serialize};

use crate::annotations::{REASON_CHANGED, REASON_DELETED};
use crate::value::{ODataInstanceAnnotation, ODataProperty, ODataValue};

// ---------------------------------------------------------------------------
// Serialization info
// ---------------------------------------------------------------------------

/// Navigation source description supplied by the caller when no model is
/// available (or to override the model). Takes precedence over the model
/// when building type contexts and context URLs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSerializationInfo {
    pub navigation_source_name: String,
    pub navigation_source_entity_type_name: String,
    pub navigation_source_kind: NavigationSourceKind,
    /// Expected type when it differs from the navigation source's type.
    pub expected_type_name: Option<String>,
    pub is_from_collection: bool,
}

impl ResourceSerializationInfo {
    pub fn entity_set(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            navigation_source_name: name.into(),
            navigation_source_entity_type_name: entity_type.into(),
            navigation_source_kind: NavigationSourceKind::EntitySet,
            expected_type_name: None,
            is_from_collection: true,
        }
    }

    pub fn singleton(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            navigation_source_kind: NavigationSourceKind::Singleton,
            is_from_collection: false,
            ..Self::entity_set(name, entity_type)
        }
    }
}

// ---------------------------------------------------------------------------
// Resources and resource sets
// ---------------------------------------------------------------------------

/// Media resource metadata of a media-link entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ODataStreamReferenceValue {
    pub edit_link: Option<String>,
    pub read_link: Option<String>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
}

/// One entity or complex instance.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ODataResource {
    pub type_name: Option<String>,
    pub id: Option<String>,
    pub etag: Option<String>,
    pub edit_link: Option<String>,
    pub read_link: Option<String>,
    pub media_resource: Option<ODataStreamReferenceValue>,
    pub properties: Vec<ODataProperty>,
    pub instance_annotations: Vec<ODataInstanceAnnotation>,
    pub serialization_info: Option<ResourceSerializationInfo>,
}

impl ODataResource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn typed(type_name: impl Into<String>) -> Self {
        Self {
            type_name: Some(type_name.into()),
            ..Self::default()
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<ODataValue>) -> Self {
        self.properties.push(ODataProperty::new(name, value));
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_serialization_info(mut self, info: ResourceSerializationInfo) -> Self {
        self.serialization_info = Some(info);
        self
    }

    pub fn with_annotation(mut self, annotation: ODataInstanceAnnotation) -> Self {
        self.instance_annotations.push(annotation);
        self
    }

    pub fn property(&self, name: &str) -> Option<&ODataProperty> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// An ordered collection of resources.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ODataResourceSet {
    pub type_name: Option<String>,
    pub id: Option<String>,
    pub count: Option<i64>,
    pub next_page_link: Option<String>,
    pub delta_link: Option<String>,
    pub instance_annotations: Vec<ODataInstanceAnnotation>,
    pub serialization_info: Option<ResourceSerializationInfo>,
}

impl ODataResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_count(mut self, count: i64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_next_page_link(mut self, link: impl Into<String>) -> Self {
        self.next_page_link = Some(link.into());
        self
    }

    pub fn with_serialization_info(mut self, info: ResourceSerializationInfo) -> Self {
        self.serialization_info = Some(info);
        self
    }
}

// ---------------------------------------------------------------------------
// Navigation links
// ---------------------------------------------------------------------------

/// A named relationship from a resource: deferred (URL only) or expanded
/// (followed by resource or resource set content).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ODataNestedResourceInfo {
    pub name: String,
    /// Caller-declared cardinality; checked against the model when both
    /// are known.
    pub is_collection: Option<bool>,
    pub url: Option<String>,
    pub association_link_url: Option<String>,
}

impl ODataNestedResourceInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            is_collection: Some(true),
            ..Self::new(name)
        }
    }

    pub fn single(name: impl Into<String>) -> Self {
        Self {
            is_collection: Some(false),
            ..Self::new(name)
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// A reference to an existing entity, written inside a navigation link of a
/// request payload (`Nav@odata.bind`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ODataEntityReferenceLink {
    pub url: String,
}

impl ODataEntityReferenceLink {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

// ---------------------------------------------------------------------------
// Delta items
// ---------------------------------------------------------------------------

/// Top-level container of a delta payload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ODataDeltaResourceSet {
    pub count: Option<i64>,
    pub next_page_link: Option<String>,
    pub delta_link: Option<String>,
    pub instance_annotations: Vec<ODataInstanceAnnotation>,
    pub serialization_info: Option<ResourceSerializationInfo>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeltaDeletedEntryReason {
    Deleted,
    Changed,
}

impl DeltaDeletedEntryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deleted => REASON_DELETED,
            Self::Changed => REASON_CHANGED,
        }
    }
}

/// An entity removed from the delta scope.
#[derive(Clone, Debug, PartialEq)]
pub struct ODataDeltaDeletedEntry {
    pub id: String,
    pub reason: DeltaDeletedEntryReason,
    pub serialization_info: Option<ResourceSerializationInfo>,
}

impl ODataDeltaDeletedEntry {
    pub fn new(id: impl Into<String>, reason: DeltaDeletedEntryReason) -> Self {
        Self {
            id: id.into(),
            reason,
            serialization_info: None,
        }
    }
}

/// An added (or, as [`ODataDeltaDeletedLink`], removed) relationship.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ODataDeltaLink {
    pub source: String,
    pub target: String,
    pub relationship: String,
    pub serialization_info: Option<ResourceSerializationInfo>,
}

impl ODataDeltaLink {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relationship: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            relationship: relationship.into(),
            serialization_info: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ODataDeltaDeletedLink {
    pub source: String,
    pub target: String,
    pub relationship: String,
    pub serialization_info: Option<ResourceSerializationInfo>,
}

impl ODataDeltaDeletedLink {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relationship: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            relationship: relationship.into(),
            serialization_info: None,
        }
    }
}

/// Inline error object reported while a payload is partially written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ODataInStreamError {
    pub code: String,
    pub message: String,
    pub target: Option<String>,
}

impl ODataInStreamError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            target: None,
        }
    }
}

// ---------------------------------------------------------------------------
// ODataItem
// ---------------------------------------------------------------------------

/// The payload object owned by a scope.
#[derive(Clone, Debug, PartialEq)]
pub enum ODataItem {
    Resource(ODataResource),
    ResourceSet(ODataResourceSet),
    NestedResourceInfo(ODataNestedResourceInfo),
    EntityReferenceLink(ODataEntityReferenceLink),
    DeltaResourceSet(ODataDeltaResourceSet),
    DeltaDeletedEntry(ODataDeltaDeletedEntry),
    DeltaLink(ODataDeltaLink),
    DeltaDeletedLink(ODataDeltaDeletedLink),
}

impl ODataItem {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Resource(_) => "Resource",
            Self::ResourceSet(_) => "ResourceSet",
            Self::NestedResourceInfo(_) => "NestedResourceInfo",
            Self::EntityReferenceLink(_) => "EntityReferenceLink",
            Self::DeltaResourceSet(_) => "DeltaResourceSet",
            Self::DeltaDeletedEntry(_) => "DeltaDeletedEntry",
            Self::DeltaLink(_) => "DeltaLink",
            Self::DeltaDeletedLink(_) => "DeltaDeletedLink",
        }
    }

    pub fn as_resource(&self) -> Option<&ODataResource> {
        match self {
            Self::Resource(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_resource_mut(&mut self) -> Option<&mut ODataResource> {
        match self {
            Self::Resource(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_resource_set(&self) -> Option<&ODataResourceSet> {
        match self {
            Self::ResourceSet(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_resource_set_mut(&mut self) -> Option<&mut ODataResourceSet> {
        match self {
            Self::ResourceSet(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_nested_resource_info(&self) -> Option<&ODataNestedResourceInfo> {
        match self {
            Self::NestedResourceInfo(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_entity_reference_link(&self) -> Option<&ODataEntityReferenceLink> {
        match self {
            Self::EntityReferenceLink(l) => Some(l),
            _ => None,
        }
    }
}

impl fmt::Display for ODataItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NestedResourceInfo(n) => write!(f, "NestedResourceInfo({})", n.name),
            other => f.write_str(other.kind_name()),
        }
    }
}

impl From<ODataResource> for ODataItem {
    fn from(r: ODataResource) -> Self {
        Self::Resource(r)
    }
}

impl From<ODataResourceSet> for ODataItem {
    fn from(s: ODataResourceSet) -> Self {
        Self::ResourceSet(s)
    }
}

impl From<ODataNestedResourceInfo> for ODataItem {
    fn from(n: ODataNestedResourceInfo) -> Self {
        Self::NestedResourceInfo(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_builder_and_lookup() {
        let r = ODataResource::typed("NS.Person")
            .with_property("Id", 1)
            .with_property("Name", "Alice");
        assert_eq!(r.type_name.as_deref(), Some("NS.Person"));
        assert_eq!(r.property("Name").unwrap().value.as_str(), Some("Alice"));
        assert!(r.property("Missing").is_none());
    }

    #[test]
    fn item_accessors() {
        let item: ODataItem = ODataNestedResourceInfo::collection("Orders").into();
        assert_eq!(item.to_string(), "NestedResourceInfo(Orders)");
        assert!(item.as_resource().is_none());
        assert_eq!(item.as_nested_resource_info().unwrap().is_collection, Some(true));
    }

    #[test]
    fn deleted_reason_wire_values() {
        assert_eq!(DeltaDeletedEntryReason::Deleted.as_str(), "deleted");
        assert_eq!(DeltaDeletedEntryReason::Changed.as_str(), "changed");
    }
}
