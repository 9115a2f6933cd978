use std::collections::BTreeMap;

use odl_core::annotations::{
    classify_member, is_odata_annotation, MemberName, ERROR_PROPERTY, ODATA_ASSOCIATION_LINK,
    ODATA_BIND, ODATA_CONTEXT, ODATA_COUNT, ODATA_DELTA_LINK, ODATA_EDIT_LINK, ODATA_ETAG,
    ODATA_ID, ODATA_MEDIA_CONTENT_TYPE, ODATA_MEDIA_EDIT_LINK, ODATA_MEDIA_ETAG,
    ODATA_MEDIA_READ_LINK, ODATA_NAVIGATION_LINK, ODATA_NEXT_LINK, ODATA_READ_LINK, ODATA_TYPE,
};
use odl_core::{
    DuplicatePropertyNamesChecker, NavigationLinkUse, ODataError, ODataInstanceAnnotation,
    ODataNestedResourceInfo, ODataProperty, ODataResource, ODataResourceSet, ODataResult,
    ODataValue, ReaderSettings, ReaderValidator,
};
use odl_edm::{EdmModel, EdmNavigationProperty, EdmStructuredType, EdmTypeRef};
use odl_json::{JsonNodeType, JsonReader};
use serde_json::Value;
use tracing::warn;

/// A navigation link met while reading resource content.
///
/// When `expanded` the JSON reader is left on the first node of the link's
/// value; otherwise on the member after the link's annotations.
#[derive(Debug)]
pub struct NavigationLinkFound {
    pub info: ODataNestedResourceInfo,
    pub navigation_property: Option<EdmNavigationProperty>,
    pub expanded: bool,
    /// `Name@odata.bind` URLs (requests only).
    pub reference_links: Vec<String>,
    /// Annotations of an expanded set that came before its value.
    pub resource_set: Option<ODataResourceSet>,
}

/// Reads the members of resource and resource set objects.
///
/// Resource content is consumed up to the next navigation link or the
/// closing brace, whichever comes first; structural properties and
/// annotations are added to the resource as they are read.
pub struct ResourceDeserializer<'a> {
    json: &'a mut JsonReader,
    model: &'a dyn EdmModel,
    validator: &'a dyn ReaderValidator,
    settings: &'a ReaderSettings,
}

impl<'a> ResourceDeserializer<'a> {
    pub fn new(
        json: &'a mut JsonReader,
        model: &'a dyn EdmModel,
        validator: &'a dyn ReaderValidator,
        settings: &'a ReaderSettings,
    ) -> Self {
        Self {
            json,
            model,
            validator,
            settings,
        }
    }

    // ---- Resources ----

    /// Leading `@…` members of a resource.
    ///
    /// Pre: on the first member of the object or on EndObject.
    /// Post: on the first member that is not an instance annotation.
    pub async fn read_resource_annotations(&mut self, resource: &mut ODataResource) -> ODataResult<()> {
        while let Some(annotation) = self.peek_instance_annotation() {
            self.json.read_property_name().await?;
            self.apply_resource_annotation(resource, &annotation).await?;
        }
        Ok(())
    }

    /// Properties and annotations up to the next navigation link. Only
    /// custom instance annotations may follow the first property.
    ///
    /// Pre: on a member of the resource object or on its EndObject.
    /// Post: on the EndObject when `None` is returned, else as described on
    /// [`NavigationLinkFound`].
    pub async fn read_resource_content(
        &mut self,
        resource: &mut ODataResource,
        resource_type: Option<&EdmStructuredType>,
        checker: &mut DuplicatePropertyNamesChecker,
    ) -> ODataResult<Option<NavigationLinkFound>> {
        loop {
            let member = match self.json.node_type() {
                JsonNodeType::EndObject => return Ok(None),
                JsonNodeType::Property => self.json.property_name().map(classify_owned),
                other => {
                    return Err(unexpected(
                        "reading resource content",
                        "a property or the end of the resource",
                        other,
                    ))
                }
            };
            match member {
                Some(Member::Instance(annotation)) if is_odata_annotation(&annotation) => {
                    return Err(ODataError::ResourceAnnotationAfterProperty(annotation));
                }
                Some(Member::Instance(annotation)) => {
                    self.json.read_property_name().await?;
                    self.apply_resource_annotation(resource, &annotation).await?;
                }
                Some(Member::PropertyAnnotation(property)) => {
                    self.read_property_annotations(&property, checker).await?;
                    if self.json.property_name() == Some(property.as_str()) {
                        continue;
                    }
                    let found = self.annotation_only_member(&property, resource_type, checker)?;
                    return Ok(Some(found));
                }
                Some(Member::Property(name)) => {
                    self.json.read_property_name().await?;
                    if let Some(found) =
                        self.read_property_value(&name, resource, resource_type, checker).await?
                    {
                        return Ok(Some(found));
                    }
                }
                None => return Err(unexpected("reading resource content", "a property", JsonNodeType::Property)),
            }
        }
    }

    fn peek_instance_annotation(&self) -> Option<String> {
        match self.json.property_name().map(classify_member) {
            Some(MemberName::InstanceAnnotation(annotation)) => Some(annotation),
            _ => None,
        }
    }

    /// Pre: on the annotation value. Post: on the node after it.
    async fn apply_resource_annotation(
        &mut self,
        resource: &mut ODataResource,
        annotation: &str,
    ) -> ODataResult<()> {
        let value = self.json.read_value().await?;
        match annotation {
            ODATA_TYPE => {
                resource.type_name = Some(string_value(annotation, value)?.trim_start_matches('#').to_string())
            }
            ODATA_ID => resource.id = Some(string_value(annotation, value)?),
            ODATA_ETAG => resource.etag = Some(string_value(annotation, value)?),
            ODATA_EDIT_LINK => resource.edit_link = Some(string_value(annotation, value)?),
            ODATA_READ_LINK => resource.read_link = Some(string_value(annotation, value)?),
            ODATA_MEDIA_EDIT_LINK
            | ODATA_MEDIA_READ_LINK
            | ODATA_MEDIA_CONTENT_TYPE
            | ODATA_MEDIA_ETAG => {
                let text = string_value(annotation, value)?;
                let media = resource.media_resource.get_or_insert_with(Default::default);
                match annotation {
                    ODATA_MEDIA_EDIT_LINK => media.edit_link = Some(text),
                    ODATA_MEDIA_READ_LINK => media.read_link = Some(text),
                    ODATA_MEDIA_CONTENT_TYPE => media.content_type = Some(text),
                    _ => media.etag = Some(text),
                }
            }
            ODATA_CONTEXT => {}
            other if is_odata_annotation(other) => {
                warn!(annotation = other, "ignoring unknown odata annotation on resource");
            }
            other => resource
                .instance_annotations
                .push(ODataInstanceAnnotation::new(other, ODataValue::from_json(other, value, None)?)),
        }
        Ok(())
    }

    /// Consecutive `property@…` members, collected in the checker.
    async fn read_property_annotations(
        &mut self,
        property: &str,
        checker: &mut DuplicatePropertyNamesChecker,
    ) -> ODataResult<()> {
        loop {
            let annotation = match self.json.property_name().map(classify_member) {
                Some(MemberName::PropertyAnnotation {
                    property: owner,
                    annotation,
                }) if owner == property => annotation,
                _ => return Ok(()),
            };
            self.json.read_property_name().await?;
            let value = self.json.read_value().await?;
            checker.add_property_annotation(property, &annotation, value)?;
        }
    }

    /// A property that has annotations but no value: a deferred link in a
    /// response, entity reference links in a request.
    fn annotation_only_member(
        &mut self,
        property: &str,
        resource_type: Option<&EdmStructuredType>,
        checker: &mut DuplicatePropertyNamesChecker,
    ) -> ODataResult<NavigationLinkFound> {
        let annotations = checker.take_annotations(property);
        let navigation =
            self.validator
                .validate_navigation_link(self.model, resource_type, property, None)?;
        if navigation.is_none() && !annotations.keys().any(|a| is_link_annotation(a)) {
            let annotation = annotations.keys().next().cloned().unwrap_or_default();
            return Err(ODataError::InvalidPropertyAnnotation {
                property: property.to_string(),
                annotation,
            });
        }
        let reference_links = self.reference_links(property, &annotations)?;
        let is_collection = navigation.as_ref().map(|n| n.is_collection);
        let usage = if reference_links.is_empty() {
            NavigationLinkUse::Deferred
        } else {
            NavigationLinkUse::Bind
        };
        checker.check_navigation_link(property, usage, is_collection)?;
        Ok(NavigationLinkFound {
            info: link_info(property, &annotations, is_collection),
            navigation_property: navigation,
            expanded: false,
            reference_links,
            resource_set: None,
        })
    }

    /// Pre: on the first node of the value of `name`.
    async fn read_property_value(
        &mut self,
        name: &str,
        resource: &mut ODataResource,
        resource_type: Option<&EdmStructuredType>,
        checker: &mut DuplicatePropertyNamesChecker,
    ) -> ODataResult<Option<NavigationLinkFound>> {
        let annotations = checker.take_annotations(name);
        let declared_navigation = resource_type
            .filter(|_| self.model.is_user_model())
            .and_then(|ty| self.model.find_navigation_property(ty, name));
        if declared_navigation.is_some() || annotations.keys().any(|a| is_link_annotation(a)) {
            return self
                .expanded_link(name, annotations, resource_type, checker)
                .map(Some);
        }

        let value = self.json.read_value().await?;
        let declared_structural = resource_type
            .filter(|_| self.model.is_user_model())
            .and_then(|ty| self.model.find_property(ty, name));
        if name == ERROR_PROPERTY && declared_structural.is_none() {
            if let Some(error) = in_stream_error(&value) {
                return Err(error);
            }
        }
        self.add_structural_property(name, value, annotations, resource, resource_type, checker)?;
        Ok(None)
    }

    fn expanded_link(
        &mut self,
        name: &str,
        annotations: BTreeMap<String, Value>,
        resource_type: Option<&EdmStructuredType>,
        checker: &mut DuplicatePropertyNamesChecker,
    ) -> ODataResult<NavigationLinkFound> {
        let payload_collection = match self.json.node_type() {
            JsonNodeType::StartArray => true,
            JsonNodeType::StartObject => false,
            JsonNodeType::PrimitiveValue if self.json.value() == Some(&Value::Null) => false,
            other => {
                return Err(unexpected(
                    "reading navigation link content",
                    "an object, an array or null",
                    other,
                ))
            }
        };
        let navigation = self.validator.validate_navigation_link(
            self.model,
            resource_type,
            name,
            Some(payload_collection),
        )?;
        let reference_links = self.reference_links(name, &annotations)?;
        if !reference_links.is_empty() {
            checker.check_navigation_link(name, NavigationLinkUse::Bind, Some(payload_collection))?;
        }
        checker.check_navigation_link(name, NavigationLinkUse::Expanded, Some(payload_collection))?;

        let resource_set = payload_collection.then(|| ODataResourceSet {
            count: annotations.get(ODATA_COUNT).and_then(count_value),
            next_page_link: annotations
                .get(ODATA_NEXT_LINK)
                .and_then(Value::as_str)
                .map(str::to_string),
            ..ODataResourceSet::default()
        });
        Ok(NavigationLinkFound {
            info: link_info(name, &annotations, Some(payload_collection)),
            navigation_property: navigation,
            expanded: true,
            reference_links,
            resource_set,
        })
    }

    fn reference_links(
        &self,
        property: &str,
        annotations: &BTreeMap<String, Value>,
    ) -> ODataResult<Vec<String>> {
        let Some(bind) = annotations.get(ODATA_BIND) else {
            return Ok(Vec::new());
        };
        let invalid = || ODataError::InvalidPropertyAnnotation {
            property: property.to_string(),
            annotation: ODATA_BIND.to_string(),
        };
        if self.settings.is_response {
            return Err(invalid());
        }
        match bind {
            Value::String(url) => Ok(vec![url.clone()]),
            Value::Array(urls) => urls
                .iter()
                .map(|u| u.as_str().map(str::to_string).ok_or_else(invalid))
                .collect(),
            _ => Err(invalid()),
        }
    }

    fn add_structural_property(
        &mut self,
        name: &str,
        value: Value,
        annotations: BTreeMap<String, Value>,
        resource: &mut ODataResource,
        resource_type: Option<&EdmStructuredType>,
        checker: &mut DuplicatePropertyNamesChecker,
    ) -> ODataResult<()> {
        checker.check_property(name)?;
        let declared = self.validator.validate_property(
            self.model,
            resource_type,
            name,
            self.settings.read_untyped_open_values,
        )?;
        if value.is_null() {
            self.validator.validate_null_value(declared.as_ref(), name)?;
        }

        let annotated_type = match annotations.get(ODATA_TYPE) {
            Some(Value::String(type_name)) => Some(qualified_type_name(type_name)),
            Some(_) => {
                return Err(ODataError::InvalidPropertyAnnotation {
                    property: name.to_string(),
                    annotation: ODATA_TYPE.to_string(),
                })
            }
            None => None,
        };
        let type_ref = match (&declared, &annotated_type) {
            (Some(p), _) => Some(p.type_ref.clone()),
            (None, Some(type_name)) => Some(EdmTypeRef::parse(type_name)?),
            (None, None) => None,
        };
        let mut value = ODataValue::from_json(name, value, type_ref.as_ref())?;
        if let (ODataValue::Collection(collection), Some(type_name)) = (&mut value, annotated_type) {
            collection.type_name = Some(type_name);
        }

        let mut property = ODataProperty::new(name, value);
        for (annotation, annotation_value) in annotations {
            if annotation == ODATA_TYPE {
                continue;
            }
            if is_odata_annotation(&annotation) {
                warn!(property = name, annotation = %annotation, "ignoring unknown odata property annotation");
                continue;
            }
            let annotation_value = ODataValue::from_json(&annotation, annotation_value, None)?;
            property
                .instance_annotations
                .push(ODataInstanceAnnotation::new(annotation, annotation_value));
        }
        resource.properties.push(property);
        Ok(())
    }

    // ---- Resource sets ----

    /// `@…` members of a top-level resource set.
    ///
    /// Pre: on a member of the set object. Post: on the first member that
    /// is not an instance annotation (`value`, or EndObject after it).
    pub async fn read_resource_set_annotations(&mut self, set: &mut ODataResourceSet) -> ODataResult<()> {
        while let Some(annotation) = self.peek_instance_annotation() {
            self.json.read_property_name().await?;
            let value = self.json.read_value().await?;
            apply_resource_set_annotation(set, &annotation, value)?;
        }
        Ok(())
    }

    /// `Name@odata.nextLink` and friends that follow an expanded set.
    ///
    /// Pre: on the member after the set's EndArray. Post: on the first
    /// member that does not annotate `link`.
    pub async fn read_expanded_set_trailing_annotations(
        &mut self,
        link: &str,
        set: &mut ODataResourceSet,
    ) -> ODataResult<()> {
        loop {
            let annotation = match self.json.property_name().map(classify_member) {
                Some(MemberName::PropertyAnnotation {
                    property,
                    annotation,
                }) if property == link
                    && matches!(annotation.as_str(), ODATA_NEXT_LINK | ODATA_DELTA_LINK | ODATA_COUNT) =>
                {
                    annotation
                }
                _ => return Ok(()),
            };
            self.json.read_property_name().await?;
            let value = self.json.read_value().await?;
            apply_resource_set_annotation(set, &annotation, value)?;
        }
    }

    /// Pre: on a member of an object that may be an in-stream error.
    /// Post: unchanged unless an error was read.
    pub async fn check_for_in_stream_error(&mut self) -> ODataResult<()> {
        if self.json.property_name() != Some(ERROR_PROPERTY) {
            return Ok(());
        }
        self.json.read_property_name().await?;
        let value = self.json.read_value().await?;
        Err(in_stream_error(&value).unwrap_or(ODataError::InStreamError {
            code: String::new(),
            message: value.to_string(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

enum Member {
    Instance(String),
    PropertyAnnotation(String),
    Property(String),
}

fn classify_owned(name: &str) -> Member {
    match classify_member(name) {
        MemberName::InstanceAnnotation(annotation) => Member::Instance(annotation),
        MemberName::PropertyAnnotation { property, .. } => {
            Member::PropertyAnnotation(property.to_string())
        }
        MemberName::Property(property) => Member::Property(property.to_string()),
    }
}

fn apply_resource_set_annotation(
    set: &mut ODataResourceSet,
    annotation: &str,
    value: Value,
) -> ODataResult<()> {
    match annotation {
        ODATA_COUNT => {
            set.count = Some(count_value(&value).ok_or_else(|| ODataError::InvalidValue {
                name: annotation.to_string(),
                reason: "expected an integer".into(),
            })?)
        }
        ODATA_NEXT_LINK => set.next_page_link = Some(string_value(annotation, value)?),
        ODATA_DELTA_LINK => set.delta_link = Some(string_value(annotation, value)?),
        ODATA_ID => set.id = Some(string_value(annotation, value)?),
        ODATA_CONTEXT => {}
        other if is_odata_annotation(other) => {
            warn!(annotation = other, "ignoring unknown odata annotation on resource set");
        }
        other => set
            .instance_annotations
            .push(ODataInstanceAnnotation::new(other, ODataValue::from_json(other, value, None)?)),
    }
    Ok(())
}

fn is_link_annotation(annotation: &str) -> bool {
    matches!(
        annotation,
        ODATA_NAVIGATION_LINK | ODATA_ASSOCIATION_LINK | ODATA_BIND | ODATA_COUNT | ODATA_NEXT_LINK
    )
}

fn link_info(
    name: &str,
    annotations: &BTreeMap<String, Value>,
    is_collection: Option<bool>,
) -> ODataNestedResourceInfo {
    let text = |key: &str| annotations.get(key).and_then(Value::as_str).map(str::to_string);
    ODataNestedResourceInfo {
        name: name.to_string(),
        is_collection,
        url: text(ODATA_NAVIGATION_LINK),
        association_link_url: text(ODATA_ASSOCIATION_LINK),
    }
}

/// `#Int64` and `Collection(Int64)` name primitives without the `Edm.`
/// namespace.
fn qualified_type_name(name: &str) -> String {
    let name = name.trim_start_matches('#');
    match name
        .strip_prefix("Collection(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        Some(inner) => format!("Collection({})", qualified_type_name(inner)),
        None if name.contains('.') => name.to_string(),
        None => format!("Edm.{name}"),
    }
}

fn count_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn string_value(name: &str, value: Value) -> ODataResult<String> {
    match value {
        Value::String(s) => Ok(s),
        _ => Err(ODataError::InvalidValue {
            name: name.to_string(),
            reason: "expected a string".into(),
        }),
    }
}

/// `{"code":…,"message":…}` as an error; `None` for any other value.
fn in_stream_error(value: &Value) -> Option<ODataError> {
    let body = value.as_object()?;
    if !body.contains_key("code") && !body.contains_key("message") {
        return None;
    }
    let text = |key: &str| match body.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    Some(ODataError::InStreamError {
        code: text("code"),
        message: text("message"),
    })
}

pub(crate) fn unexpected(context: &'static str, expected: &'static str, found: JsonNodeType) -> ODataError {
    ODataError::UnexpectedNode {
        context,
        expected,
        found: found.to_string(),
    }
}
