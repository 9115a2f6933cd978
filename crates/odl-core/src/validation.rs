use std::sync::Arc;

use odl_edm::{EdmModel, EdmNavigationProperty, EdmProperty, EdmStructuredType};

use crate::annotations::{ODATA_DELTA_LINK, ODATA_NEXT_LINK};
use crate::duplicate::DuplicatePropertyNamesChecker;
use crate::error::{ODataError, ODataResult};
use crate::item::{ODataEntityReferenceLink, ODataNestedResourceInfo, ODataResourceSet};

/// Resolve the type of a resource from its explicit type name and the type
/// the context expects. Model checks only apply to user models.
pub fn resolve_resource_type(
    model: &dyn EdmModel,
    expected: Option<&Arc<EdmStructuredType>>,
    type_name: Option<&str>,
) -> ODataResult<Option<Arc<EdmStructuredType>>> {
    let Some(name) = type_name.map(|n| n.trim_start_matches('#')) else {
        return Ok(expected.cloned());
    };
    if !model.is_user_model() {
        return Ok(None);
    }
    let actual = model
        .find_type(name)
        .ok_or_else(|| ODataError::UnknownType(name.to_string()))?;
    if let Some(expected) = expected {
        if !model.is_assignable(&expected.full_name, &actual.full_name) {
            return Err(ODataError::ResourceTypeMismatch {
                expected: expected.full_name.clone(),
                actual: actual.full_name.clone(),
            });
        }
    }
    Ok(Some(actual))
}

// ---------------------------------------------------------------------------
// WriterValidator
// ---------------------------------------------------------------------------

/// Pluggable checks the writer core runs at fixed points. Every method has
/// the standard behaviour as its default, so variants override only what
/// they relax or tighten.
pub trait WriterValidator: Send + Sync {
    /// Control information written before `value`.
    fn validate_resource_set_at_start(
        &self,
        set: &ODataResourceSet,
        is_response: bool,
    ) -> ODataResult<()> {
        if !is_response && set.count.is_some() {
            return Err(ODataError::CountInRequest);
        }
        Ok(())
    }

    /// Control information written after `value`.
    fn validate_resource_set_at_end(
        &self,
        set: &ODataResourceSet,
        is_response: bool,
    ) -> ODataResult<()> {
        if !is_response {
            if set.next_page_link.is_some() {
                return Err(ODataError::ResponseOnlyAnnotation(ODATA_NEXT_LINK));
            }
            if set.delta_link.is_some() {
                return Err(ODataError::ResponseOnlyAnnotation(ODATA_DELTA_LINK));
            }
        }
        Ok(())
    }

    /// Returns the declared navigation property, or `None` when nothing is
    /// known about it.
    fn validate_navigation_link(
        &self,
        model: &dyn EdmModel,
        parent_type: Option<&EdmStructuredType>,
        link: &ODataNestedResourceInfo,
    ) -> ODataResult<Option<EdmNavigationProperty>> {
        if link.name.is_empty() {
            return Err(ODataError::NavigationLinkWithoutName);
        }
        let Some(ty) = parent_type.filter(|_| model.is_user_model()) else {
            return Ok(None);
        };
        let nav = model.find_navigation_property(ty, &link.name).ok_or_else(|| {
            ODataError::UnknownNavigationProperty {
                type_name: ty.full_name.clone(),
                property: link.name.clone(),
            }
        })?;
        if let Some(declared) = link.is_collection {
            if declared != nav.is_collection {
                return Err(ODataError::NavigationLinkCardinalityMismatch {
                    name: link.name.clone(),
                    declared,
                    model: nav.is_collection,
                });
            }
        }
        Ok(Some(nav))
    }

    fn validate_entity_reference_link(
        &self,
        link: &ODataEntityReferenceLink,
        is_response: bool,
    ) -> ODataResult<()> {
        if is_response {
            return Err(ODataError::EntityReferenceLinkInResponse);
        }
        if link.url.trim().is_empty() {
            return Err(ODataError::EmptyEntityReferenceLink);
        }
        Ok(())
    }

    fn validate_null_property(&self, declared: Option<&EdmProperty>, name: &str) -> ODataResult<()> {
        match declared {
            Some(p) if !p.nullable => Err(ODataError::NullValueForNonNullableProperty(name.to_string())),
            _ => Ok(()),
        }
    }

    /// Undeclared properties are only legal on open types.
    fn validate_open_property(
        &self,
        model: &dyn EdmModel,
        owner: &EdmStructuredType,
        name: &str,
    ) -> ODataResult<()> {
        if model.is_user_model() && !owner.is_open {
            return Err(ODataError::OpenPropertyNotAllowed {
                type_name: owner.full_name.clone(),
                property: name.to_string(),
            });
        }
        Ok(())
    }

    fn validate_resource_type(
        &self,
        model: &dyn EdmModel,
        expected: Option<&Arc<EdmStructuredType>>,
        type_name: Option<&str>,
    ) -> ODataResult<Option<Arc<EdmStructuredType>>> {
        resolve_resource_type(model, expected, type_name)
    }

    /// Checker for one resource; duplicates are always rejected on write.
    fn duplicate_checker(&self) -> DuplicatePropertyNamesChecker {
        DuplicatePropertyNamesChecker::new(true)
    }
}

/// Standard writer checks.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultWriterValidator;

impl WriterValidator for DefaultWriterValidator {}

// ---------------------------------------------------------------------------
// ReaderValidator
// ---------------------------------------------------------------------------

/// Pluggable checks the reader core runs after each type name and before
/// property content is consumed.
pub trait ReaderValidator: Send + Sync {
    fn validate_resource_type(
        &self,
        model: &dyn EdmModel,
        expected: Option<&Arc<EdmStructuredType>>,
        type_name: Option<&str>,
    ) -> ODataResult<Option<Arc<EdmStructuredType>>> {
        resolve_resource_type(model, expected, type_name)
    }

    /// Check a navigation link found in the payload. `payload_collection` is
    /// the cardinality implied by the JSON value, when there is one.
    fn validate_navigation_link(
        &self,
        model: &dyn EdmModel,
        parent_type: Option<&EdmStructuredType>,
        name: &str,
        payload_collection: Option<bool>,
    ) -> ODataResult<Option<EdmNavigationProperty>> {
        let nav = parent_type
            .filter(|_| model.is_user_model())
            .and_then(|ty| model.find_navigation_property(ty, name));
        if let (Some(nav), Some(found)) = (&nav, payload_collection) {
            if nav.is_collection != found {
                return Err(ODataError::NavigationLinkContentMismatch {
                    name: name.to_string(),
                    expected: describe(nav.is_collection),
                    found: describe(found),
                });
            }
        }
        Ok(nav)
    }

    /// Returns the declared property, `None` for accepted open content.
    fn validate_property(
        &self,
        model: &dyn EdmModel,
        owner: Option<&EdmStructuredType>,
        name: &str,
        accept_undeclared: bool,
    ) -> ODataResult<Option<EdmProperty>> {
        let Some(owner) = owner.filter(|_| model.is_user_model()) else {
            return Ok(None);
        };
        match model.find_property(owner, name) {
            Some(p) => Ok(Some(p)),
            None if owner.is_open || accept_undeclared => Ok(None),
            None => Err(ODataError::OpenPropertyNotAllowed {
                type_name: owner.full_name.clone(),
                property: name.to_string(),
            }),
        }
    }

    fn validate_null_value(&self, declared: Option<&EdmProperty>, name: &str) -> ODataResult<()> {
        match declared {
            Some(p) if !p.nullable => Err(ODataError::NullValueForNonNullableProperty(name.to_string())),
            _ => Ok(()),
        }
    }
}

/// Standard reader checks.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultReaderValidator;

impl ReaderValidator for DefaultReaderValidator {}

fn describe(is_collection: bool) -> &'static str {
    if is_collection {
        "a resource set"
    } else {
        "a single resource"
    }
}
