use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::annotations::{ODATA_COUNT, ODATA_DELTA_LINK, ODATA_NEXT_LINK};
use crate::error::{ODataError, ODataResult};

/// How a navigation link shows up in a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NavigationLinkUse {
    /// URL only (`Name@odata.navigationLink`).
    Deferred,
    /// Inline content (`"Name": {...}` or `"Name": [...]`).
    Expanded,
    /// Entity reference links (`Name@odata.bind`).
    Bind,
}

#[derive(Clone, Copy, Debug, Default)]
struct LinkRecord {
    expanded: bool,
    bind: bool,
}

#[derive(Clone, Debug, Default)]
struct Entry {
    property_seen: bool,
    link: Option<LinkRecord>,
    annotations: BTreeMap<String, Value>,
}

/// Per-resource record of member names.
///
/// Rejects a property or link that appears twice, except for a collection
/// navigation property in a request, which may carry both entity reference
/// links and expanded content. Also collects property annotations so the
/// reader can attach them to the property they describe, whichever side of
/// the property they arrive on.
#[derive(Clone, Debug, Default)]
pub struct DuplicatePropertyNamesChecker {
    enabled: bool,
    entries: HashMap<String, Entry>,
}

impl DuplicatePropertyNamesChecker {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record a structural property.
    pub fn check_property(&mut self, name: &str) -> ODataResult<()> {
        let enabled = self.enabled;
        let entry = self.entries.entry(name.to_string()).or_default();
        if enabled && (entry.property_seen || entry.link.is_some()) {
            return Err(ODataError::DuplicatePropertyName(name.to_string()));
        }
        entry.property_seen = true;
        Ok(())
    }

    /// Record a navigation link.
    pub fn check_navigation_link(
        &mut self,
        name: &str,
        usage: NavigationLinkUse,
        is_collection: Option<bool>,
    ) -> ODataResult<()> {
        let enabled = self.enabled;
        let entry = self.entries.entry(name.to_string()).or_default();
        let duplicate = || ODataError::DuplicatePropertyName(name.to_string());
        if entry.property_seen {
            return if enabled { Err(duplicate()) } else { Ok(()) };
        }
        let record = match entry.link {
            None => LinkRecord::default(),
            Some(previous) => {
                let mixes = is_collection == Some(true)
                    && match usage {
                        NavigationLinkUse::Expanded => previous.bind && !previous.expanded,
                        NavigationLinkUse::Bind => previous.expanded && !previous.bind,
                        NavigationLinkUse::Deferred => false,
                    };
                if enabled && !mixes {
                    return Err(duplicate());
                }
                previous
            }
        };
        entry.link = Some(LinkRecord {
            expanded: record.expanded || usage == NavigationLinkUse::Expanded,
            bind: record.bind || usage == NavigationLinkUse::Bind,
        });
        Ok(())
    }

    /// Record `property@annotation`. Only paging annotations of an
    /// expanded set may follow the value they describe.
    pub fn add_property_annotation(
        &mut self,
        property: &str,
        annotation: &str,
        value: Value,
    ) -> ODataResult<()> {
        let entry = self.entries.entry(property.to_string()).or_default();
        let seen = entry.property_seen || entry.link.map(|l| l.expanded).unwrap_or(false);
        if seen && !follows_value(annotation) {
            return Err(ODataError::PropertyAnnotationAfterProperty {
                property: property.to_string(),
                annotation: annotation.to_string(),
            });
        }
        if entry.annotations.contains_key(annotation) {
            return Err(ODataError::DuplicateAnnotation {
                property: property.to_string(),
                annotation: annotation.to_string(),
            });
        }
        entry.annotations.insert(annotation.to_string(), value);
        Ok(())
    }

    pub fn annotation(&self, property: &str, annotation: &str) -> Option<&Value> {
        self.entries.get(property)?.annotations.get(annotation)
    }

    /// Remove and return the annotations collected for `property`.
    pub fn take_annotations(&mut self, property: &str) -> BTreeMap<String, Value> {
        self.entries
            .get_mut(property)
            .map(|e| std::mem::take(&mut e.annotations))
            .unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .get(name)
            .map(|e| e.property_seen || e.link.is_some())
            .unwrap_or(false)
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

fn follows_value(annotation: &str) -> bool {
    matches!(annotation, ODATA_NEXT_LINK | ODATA_DELTA_LINK | ODATA_COUNT)
}
