use std::sync::Arc;

use odl_core::annotations::{instance_annotation, ODATA_CONTEXT, VALUE_PROPERTY};
use odl_core::listener::notify;
use odl_core::metadata::resource_path;
use odl_core::{
    create_metadata_builder, ContextUrlKind, ContextUrlParser, DefaultReaderValidator,
    DuplicatePropertyNamesChecker, ExecutionMode, Listener, ListenerEvent, MetadataBuilderInput,
    NavigationLinkScopeData, ODataEntityReferenceLink, ODataError, ODataItem,
    ODataNestedResourceInfo, ODataPath, ODataResource, ODataResourceSet, ODataResult,
    ParsedContextUrl, ReaderSettings, ReaderValidator, ResourceScopeData, ResourceSetScopeData,
    ResourceTypeContext, Scope, ScopeData, ScopeStack, SelectedPropertiesNode,
};
use odl_edm::{EdmModel, EdmNavigationSource, EdmStructuredType, NavigationSourceKind};
use odl_json::{JsonError, JsonNodeType, JsonReader};
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, trace};

use crate::deserializer::{unexpected, NavigationLinkFound, ResourceDeserializer};
use crate::state::ReaderState;

/// What a reader expects at the top level of the payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReaderTarget {
    pub reading_resource_set: bool,
    /// Entity set or singleton the payload belongs to; checked against the
    /// context URL.
    pub navigation_source: Option<String>,
    /// Expected resource type; defaults to the source's element type.
    pub resource_type: Option<String>,
}

impl ReaderTarget {
    pub fn resource_set(navigation_source: impl Into<String>) -> Self {
        Self {
            reading_resource_set: true,
            navigation_source: Some(navigation_source.into()),
            resource_type: None,
        }
    }

    pub fn resource(navigation_source: impl Into<String>) -> Self {
        Self {
            reading_resource_set: false,
            navigation_source: Some(navigation_source.into()),
            resource_type: None,
        }
    }

    /// No navigation source: the context URL, if any, supplies it.
    pub fn untyped_resource_set() -> Self {
        Self {
            reading_resource_set: true,
            ..Self::default()
        }
    }

    pub fn untyped_resource() -> Self {
        Self::default()
    }

    pub fn with_resource_type(mut self, type_name: impl Into<String>) -> Self {
        self.resource_type = Some(type_name.into());
        self
    }
}

/// Pull-based reader state machine.
///
/// Each call to [`read`](Self::read) advances to the next state and exposes
/// the item of that state; it returns `false` once the payload has been
/// fully read. Every `read_at_*` method documents the JSON node it starts on
/// and the node it leaves the tokenizer on.
///
/// Any error moves the reader into the absorbing `Error` state. The
/// execution mode is fixed at construction. Both entry points run the same
/// transition logic, pulling JSON tokens on demand; the sync one drives it
/// over a blocking source, where it never waits.
pub struct ODataReaderCore {
    json: JsonReader,
    settings: ReaderSettings,
    model: Arc<dyn EdmModel>,
    validator: Box<dyn ReaderValidator>,
    mode: ExecutionMode,
    reading_resource_set: bool,
    scopes: ScopeStack<ReaderState>,
    /// Open resource scopes, null resources included.
    resource_depth: usize,
    /// Link found by the last content read of the current resource.
    pending_link: Option<NavigationLinkFound>,
    context_url: Option<ParsedContextUrl>,
    /// From the settings, else from the context URL.
    service_root: Option<String>,
    listener: Option<Listener>,
}

impl ODataReaderCore {
    pub fn new(
        json: JsonReader,
        settings: ReaderSettings,
        model: Arc<dyn EdmModel>,
        target: ReaderTarget,
        mode: ExecutionMode,
    ) -> ODataResult<Self> {
        settings.validate()?;
        let navigation_source = match target.navigation_source.as_deref() {
            Some(name) if model.is_user_model() => Some(
                model
                    .find_navigation_source(name)
                    .ok_or_else(|| ODataError::UnknownNavigationSource(name.to_string()))?,
            ),
            _ => None,
        };
        let type_name = target
            .resource_type
            .clone()
            .or_else(|| navigation_source.as_ref().map(|s| s.entity_type.clone()));
        let resource_type = match type_name.as_deref() {
            Some(name) if model.is_user_model() => Some(
                model
                    .find_type(name)
                    .ok_or_else(|| ODataError::UnknownType(name.to_string()))?,
            ),
            _ => None,
        };

        let mut root = Scope::new(ReaderState::Start);
        root.odata_path = navigation_source
            .as_deref()
            .map(source_root_path)
            .unwrap_or_default();
        root.navigation_source = navigation_source;
        root.resource_type = resource_type;

        Ok(Self {
            json,
            service_root: settings.service_root.clone(),
            settings,
            model,
            validator: Box::new(DefaultReaderValidator),
            mode,
            reading_resource_set: target.reading_resource_set,
            scopes: ScopeStack::new(root),
            resource_depth: 0,
            pending_link: None,
            context_url: None,
            listener: None,
        })
    }

    pub fn with_validator(mut self, validator: Box<dyn ReaderValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_listener(mut self, listener: Listener) -> Self {
        self.listener = Some(listener);
        self
    }

    // ---- Introspection ----

    pub fn state(&self) -> ReaderState {
        self.scopes.current().state
    }

    /// Item of the current state. At `Completed` this is the top-level
    /// resource or resource set.
    pub fn item(&self) -> Option<&ODataItem> {
        self.scopes.current().item.as_ref()
    }

    /// Number of open resources.
    pub fn depth(&self) -> usize {
        self.resource_depth
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn settings(&self) -> &ReaderSettings {
        &self.settings
    }

    /// Context URL of the payload, once the start has been read.
    pub fn context_url(&self) -> Option<&ParsedContextUrl> {
        self.context_url.as_ref()
    }

    // ---- Entry points ----

    /// Advance to the next item. Returns `false` when the payload has been
    /// read completely.
    pub fn read(&mut self) -> ODataResult<bool> {
        self.verify_sync()?;
        let result = self
            .read_impl()
            .now_or_never()
            .unwrap_or(Err(ODataError::Json(JsonError::WouldBlock)));
        self.intercept(result)
    }

    pub async fn read_async(&mut self) -> ODataResult<bool> {
        self.verify_async()?;
        let result = self.read_impl().await;
        self.intercept(result)
    }

    // ---- Mode and failure handling ----

    fn verify_sync(&self) -> ODataResult<()> {
        match self.mode {
            ExecutionMode::Synchronous => Ok(()),
            ExecutionMode::Asynchronous => Err(ODataError::SyncCallOnAsyncInstance),
        }
    }

    fn verify_async(&self) -> ODataResult<()> {
        match self.mode {
            ExecutionMode::Asynchronous => Ok(()),
            ExecutionMode::Synchronous => Err(ODataError::AsyncCallOnSyncInstance),
        }
    }

    /// On failure move to `Error` and return the error unchanged.
    fn intercept<T>(&mut self, result: ODataResult<T>) -> ODataResult<T> {
        if let Err(e) = &result {
            self.enter_error_state(e);
        }
        result
    }

    fn enter_error_state(&mut self, error: &ODataError) {
        let from = self.state();
        if from == ReaderState::Error {
            return;
        }
        let item = self.scopes.current().item.clone();
        self.scopes
            .push(Scope::new(ReaderState::Error).with_item(item));
        debug!(from = %from, error = %error, "reader entered error state");
        notify(
            &mut self.listener,
            ListenerEvent::Exception {
                message: error.to_string(),
            },
        );
    }

    async fn read_impl(&mut self) -> ODataResult<bool> {
        match self.state() {
            ReaderState::Start => self.read_at_start().await?,
            ReaderState::ResourceSetStart => self.read_at_resource_set_start().await?,
            ReaderState::ResourceSetEnd => self.read_at_resource_set_end().await?,
            ReaderState::ResourceStart => self.read_at_resource_start().await?,
            ReaderState::ResourceEnd => self.read_at_resource_end().await?,
            ReaderState::NavigationLinkStart => self.read_at_navigation_link_start().await?,
            ReaderState::NavigationLinkEnd => self.read_at_navigation_link_end().await?,
            ReaderState::EntityReferenceLink => self.read_at_entity_reference_link().await?,
            ReaderState::Completed => {
                return Err(ODataError::InvalidTransitionFromCompleted { to: "Read".into() })
            }
            ReaderState::Error => {
                return Err(ODataError::InvalidTransitionFromError { to: "Read".into() })
            }
        }
        Ok(self.state() != ReaderState::Completed)
    }

    // ---- Start ----

    /// Pre: nothing read. Post: as for `ResourceSetStart` or
    /// `ResourceStart`.
    async fn read_at_start(&mut self) -> ODataResult<()> {
        let node = self.json.read().await?;
        if node != JsonNodeType::StartObject {
            return Err(unexpected("reading the start of the payload", "an object", node));
        }
        self.json.read_start_object().await?;
        self.deserializer().check_for_in_stream_error().await?;
        self.read_context_url().await?;
        if self.reading_resource_set {
            self.start_top_level_resource_set().await
        } else {
            self.increase_resource_depth()?;
            self.start_opened_resource().await
        }
    }

    /// Pre: on the first member of the payload object. Post: past
    /// `@odata.context` when it was the first member.
    async fn read_context_url(&mut self) -> ODataResult<()> {
        let url = if self.json.property_name() == Some(instance_annotation(ODATA_CONTEXT).as_str()) {
            self.json.read_property_name().await?;
            match self.json.read_value().await? {
                Value::String(url) => Some(url),
                other => {
                    return Err(ODataError::InvalidValue {
                        name: ODATA_CONTEXT.to_string(),
                        reason: format!("expected a string, found {other}"),
                    })
                }
            }
        } else {
            None
        };
        let user_model = self.model.is_user_model();
        let Some(url) = url else {
            if self.settings.is_response && user_model {
                return Err(ODataError::ContextUrlMissing);
            }
            return Ok(());
        };

        let kind = if self.reading_resource_set {
            ContextUrlKind::ResourceSet
        } else {
            ContextUrlKind::Resource
        };
        let parsed = ContextUrlParser::with_model(self.model.as_ref()).parse_expecting(&url, kind)?;
        if user_model {
            self.apply_context_url(&parsed)?;
        }
        self.scopes.current_mut().selected_properties =
            SelectedPropertiesNode::parse(parsed.select.as_deref());
        if self.service_root.is_none() {
            self.service_root = Some(parsed.service_root().to_string());
        }
        debug!(context_url = %url, "context url read");
        self.context_url = Some(parsed);
        Ok(())
    }

    /// Check the context URL against the caller's navigation source and
    /// adopt its source and type cast.
    fn apply_context_url(&mut self, parsed: &ParsedContextUrl) -> ODataResult<()> {
        let model = self.model.as_ref();
        let root = self.scopes.current_mut();
        let expected = root.navigation_source.as_ref().map(|s| s.name.clone());
        match (expected, &parsed.navigation_source) {
            (Some(expected), Some(found)) if &expected != found => {
                return Err(ODataError::ContextUrlMismatch {
                    expected,
                    found: found.clone(),
                })
            }
            (None, Some(found)) => {
                let source = model
                    .find_navigation_source(found)
                    .ok_or_else(|| ODataError::UnknownNavigationSource(found.clone()))?;
                if root.resource_type.is_none() {
                    root.resource_type = Some(
                        model
                            .find_type(&source.entity_type)
                            .ok_or_else(|| ODataError::UnknownType(source.entity_type.clone()))?,
                    );
                }
                root.odata_path = source_root_path(&source);
                root.navigation_source = Some(source);
            }
            _ => {}
        }
        if let Some(cast) = parsed.type_cast.as_deref() {
            root.resource_type =
                self.validator
                    .validate_resource_type(model, root.resource_type.as_ref(), Some(cast))?;
        }
        Ok(())
    }

    /// Pre: on the first member after `@odata.context`. Post: on the first
    /// node inside the `value` array.
    async fn start_top_level_resource_set(&mut self) -> ODataResult<()> {
        let mut set = ODataResourceSet::new();
        self.deserializer().read_resource_set_annotations(&mut set).await?;
        match self.json.property_name() {
            Some(VALUE_PROPERTY) => {
                self.json.read_property_name().await?;
            }
            Some(other) => {
                return Err(ODataError::UnexpectedNode {
                    context: "reading a resource set",
                    expected: "the value property",
                    found: format!("property {other}"),
                })
            }
            None => {
                return Err(unexpected(
                    "reading a resource set",
                    "the value property",
                    self.json.node_type(),
                ))
            }
        }
        self.json.read_start_array().await?;
        self.push_resource_set(set);
        Ok(())
    }

    // ---- Resource sets ----

    /// Pre: on the first node inside the set's array. Post: as for
    /// `ResourceStart`, or on the node after the array and its trailing
    /// annotations.
    async fn read_at_resource_set_start(&mut self) -> ODataResult<()> {
        match self.json.node_type() {
            JsonNodeType::StartObject => self.start_resource().await,
            JsonNodeType::EndArray => self.end_resource_set().await,
            other => Err(unexpected(
                "reading a resource set",
                "a resource or the end of the set",
                other,
            )),
        }
    }

    /// Pre: on the set's EndArray. Post: on the node after the set's
    /// trailing annotations.
    async fn end_resource_set(&mut self) -> ODataResult<()> {
        self.json.read_end_array().await?;
        let top_level = self.scopes.parent().map(|p| p.state) == Some(ReaderState::Start);
        let link = self
            .scopes
            .parent()
            .and_then(|p| p.item.as_ref())
            .and_then(ODataItem::as_nested_resource_info)
            .map(|l| l.name.clone());

        let Self {
            json,
            model,
            validator,
            settings,
            scopes,
            ..
        } = self;
        if let Some(set) = scopes.current_mut().item.as_mut().and_then(ODataItem::as_resource_set_mut) {
            let mut deserializer =
                ResourceDeserializer::new(json, model.as_ref(), validator.as_ref(), settings);
            match &link {
                _ if top_level => deserializer.read_resource_set_annotations(set).await?,
                Some(link) => deserializer.read_expanded_set_trailing_annotations(link, set).await?,
                None => {}
            }
        }
        self.replace_state(ReaderState::ResourceSetEnd);
        Ok(())
    }

    /// Pre: after the set and its trailing annotations. Post: at the end of
    /// input for a top-level set, else on the next member of the resource
    /// holding the link.
    async fn read_at_resource_set_end(&mut self) -> ODataResult<()> {
        let top_level = self.scopes.parent().map(|p| p.state) == Some(ReaderState::Start);
        let left = self.pop_scope();
        if top_level {
            self.json.read_end_object().await?;
            return self.complete(left.and_then(|s| s.item));
        }
        self.replace_state(ReaderState::NavigationLinkEnd);
        Ok(())
    }

    fn push_resource_set(&mut self, set: ODataResourceSet) {
        let current = self.scopes.current();
        let navigation_source = current.navigation_source.clone();
        let resource_type = current.resource_type.clone();
        let data = ResourceSetScopeData {
            type_context: Some(ResourceTypeContext::create(
                set.serialization_info.as_ref(),
                navigation_source.as_deref(),
                resource_type.as_deref(),
                true,
            )),
            ..ResourceSetScopeData::default()
        };
        self.push_scope(
            ReaderState::ResourceSetStart,
            Some(ODataItem::ResourceSet(set)),
            navigation_source,
            resource_type,
            ScopeData::ResourceSet(data),
        );
    }

    // ---- Resources ----

    /// Pre: on the StartObject of a resource or the `null` of an expanded
    /// null resource. Post: inside the object as for `ResourceStart`, or
    /// unchanged for null.
    async fn start_resource(&mut self) -> ODataResult<()> {
        self.increase_resource_depth()?;
        if self.json.node_type() == JsonNodeType::PrimitiveValue
            && self.json.value() == Some(&Value::Null)
        {
            let current = self.scopes.current();
            let navigation_source = current.navigation_source.clone();
            let resource_type = current.resource_type.clone();
            self.push_scope(
                ReaderState::ResourceStart,
                None,
                navigation_source,
                resource_type,
                ScopeData::Resource(ResourceScopeData::default()),
            );
            return Ok(());
        }
        self.json.read_start_object().await?;
        self.start_opened_resource().await
    }

    /// Pre: on the first member of the resource object. Post: on the value
    /// of the first navigation link, on the member after it, or on the
    /// resource's EndObject.
    async fn start_opened_resource(&mut self) -> ODataResult<()> {
        let mut resource = ODataResource::new();
        self.deserializer().read_resource_annotations(&mut resource).await?;

        let current = self.scopes.current();
        let navigation_source = current.navigation_source.clone();
        let expected = current.resource_type.clone();
        let from_collection = match current.state {
            ReaderState::ResourceSetStart => true,
            _ => current
                .data
                .as_navigation_link()
                .and_then(|d| d.is_collection)
                .unwrap_or(false),
        };
        let resource_type = self.validator.validate_resource_type(
            self.model.as_ref(),
            expected.as_ref(),
            resource.type_name.as_deref(),
        )?;
        let type_context = ResourceTypeContext::create(
            resource.serialization_info.as_ref(),
            navigation_source.as_deref(),
            expected.as_deref(),
            from_collection,
        );
        if let Some(set) = self.scopes.current_mut().data.as_resource_set_mut() {
            set.resource_count += 1;
        }
        let data = ResourceScopeData {
            type_context: Some(type_context),
            ..ResourceScopeData::new(DuplicatePropertyNamesChecker::new(
                self.settings.validate_duplicate_properties,
            ))
        };
        self.push_scope(
            ReaderState::ResourceStart,
            Some(ODataItem::Resource(resource)),
            navigation_source,
            resource_type,
            ScopeData::Resource(data),
        );
        self.read_current_resource_content().await
    }

    /// Read properties of the current resource up to its next navigation
    /// link, leaving the link in `pending_link`.
    async fn read_current_resource_content(&mut self) -> ODataResult<()> {
        let Self {
            json,
            model,
            validator,
            settings,
            scopes,
            pending_link,
            ..
        } = self;
        let Scope {
            item,
            data,
            resource_type,
            ..
        } = scopes.current_mut();
        let (Some(ODataItem::Resource(resource)), ScopeData::Resource(data)) = (item.as_mut(), data)
        else {
            return Ok(());
        };
        *pending_link = ResourceDeserializer::new(json, model.as_ref(), validator.as_ref(), settings)
            .read_resource_content(resource, resource_type.as_deref(), &mut data.duplicate_checker)
            .await?;
        Ok(())
    }

    /// Pre: on the value of a navigation link, on the member after a
    /// deferred link, on the resource's EndObject, or on the `null` of a
    /// null resource. Post: unchanged, or as for `NavigationLinkStart`.
    async fn read_at_resource_start(&mut self) -> ODataResult<()> {
        if self.scopes.current().item.is_none() {
            self.replace_state(ReaderState::ResourceEnd);
            return Ok(());
        }
        match self.pending_link.take() {
            Some(found) => self.start_navigation_link(found),
            None => self.finish_resource_content(),
        }
    }

    /// Pre: on the resource's EndObject. Post: unchanged.
    fn finish_resource_content(&mut self) -> ODataResult<()> {
        if self.settings.is_response {
            self.attach_metadata_builder();
        }
        self.continue_missing_projected_navigation_links()
    }

    /// Builder for the resource just read; the navigation links the payload
    /// carried count as processed.
    fn attach_metadata_builder(&mut self) {
        let scope = self.scopes.current();
        let (Some(resource), Some(data)) = (
            scope.item.as_ref().and_then(ODataItem::as_resource),
            scope.data.as_resource(),
        ) else {
            return;
        };
        let Some(type_context) = data.type_context.as_ref() else {
            return;
        };
        let source_path = addressable_source_path(&scope.odata_path, type_context);
        let mut builder = create_metadata_builder(
            self.model.as_ref(),
            MetadataBuilderInput {
                service_root: self.service_root.as_deref(),
                resource,
                resource_type: scope.resource_type.as_deref(),
                source_path: &source_path,
                type_context,
                selected: &scope.selected_properties,
                key_as_segment: self.settings.key_as_segment,
            },
        );
        if let Some(ty) = scope.resource_type.as_deref() {
            for navigation in self.model.navigation_properties(ty) {
                if data.duplicate_checker.contains(&navigation.name) {
                    builder.mark_navigation_link_processed(&navigation.name);
                }
            }
        }
        let id = builder.id();
        let edit_link = builder.edit_link();

        let scope = self.scopes.current_mut();
        if let Some(resource) = scope.item.as_mut().and_then(ODataItem::as_resource_mut) {
            if resource.id.is_none() {
                resource.id = id;
            }
            if resource.edit_link.is_none() {
                resource.edit_link = edit_link;
            }
        }
        if let Some(data) = scope.data.as_resource_mut() {
            data.metadata_builder = Some(builder);
        }
    }

    /// Next projected navigation link the payload left out, or the end of
    /// the resource.
    fn continue_missing_projected_navigation_links(&mut self) -> ODataResult<()> {
        let next = self
            .scopes
            .current_mut()
            .data
            .as_resource_mut()
            .and_then(|data| {
                data.processing_missing_projected_navigation_links = true;
                data.metadata_builder.as_mut()?.next_unprocessed_navigation_link()
            });
        match next {
            Some(link) => self.start_missing_projected_navigation_link(link),
            None => {
                self.replace_state(ReaderState::ResourceEnd);
                Ok(())
            }
        }
    }

    /// Report a link absent from the payload as a deferred
    /// NavigationLinkStart/NavigationLinkEnd pair.
    fn start_missing_projected_navigation_link(
        &mut self,
        info: ODataNestedResourceInfo,
    ) -> ODataResult<()> {
        trace!(navigation = %info.name, url = ?info.url, "synthesizing missing projected navigation link");
        let navigation_property = self
            .scopes
            .current()
            .resource_type
            .as_deref()
            .and_then(|ty| self.model.find_navigation_property(ty, &info.name));
        self.start_navigation_link(NavigationLinkFound {
            info,
            navigation_property,
            expanded: false,
            reference_links: Vec::new(),
            resource_set: None,
        })?;
        if let Some(data) = self.scopes.current_mut().data.as_navigation_link_mut() {
            data.synthesized = true;
        }
        Ok(())
    }

    /// Pre: after the resource's EndObject is reached (or on the `null`).
    /// Post: at the end of input, on the next member of the parent
    /// resource, or as for the next resource of the set.
    async fn read_at_resource_end(&mut self) -> ODataResult<()> {
        let is_null = self.scopes.current().item.is_none();
        let parent_state = self.scopes.parent().map(|p| p.state);
        let left = self.pop_scope();
        self.resource_depth = self.resource_depth.saturating_sub(1);
        if is_null {
            self.json.read_primitive_value().await?;
        } else {
            self.json.read_end_object().await?;
        }
        match parent_state {
            Some(ReaderState::Start) => self.complete(left.and_then(|s| s.item)),
            Some(ReaderState::NavigationLinkStart) => {
                self.replace_state(ReaderState::NavigationLinkEnd);
                Ok(())
            }
            Some(ReaderState::ResourceSetStart) => match self.json.node_type() {
                JsonNodeType::StartObject => self.start_resource().await,
                JsonNodeType::EndArray => self.end_resource_set().await,
                other => Err(unexpected(
                    "reading a resource set",
                    "a resource or the end of the set",
                    other,
                )),
            },
            _ => Ok(()),
        }
    }

    // ---- Navigation links ----

    fn start_navigation_link(&mut self, found: NavigationLinkFound) -> ODataResult<()> {
        let NavigationLinkFound {
            info,
            navigation_property,
            expanded,
            reference_links,
            resource_set,
        } = found;
        let parent = self.scopes.current();
        let target_type = navigation_property
            .as_ref()
            .and_then(|n| self.model.find_type(&n.target_type));
        let target = match (parent.navigation_source.as_deref(), navigation_property.as_ref()) {
            (Some(source), Some(nav)) => Some(self.model.find_navigation_target(source, nav)),
            _ => None,
        };
        let path = if self.settings.is_response {
            Some(navigation_path(
                self.model.as_ref(),
                parent,
                &info.name,
                target.as_deref(),
            ))
        } else {
            None
        };
        let is_collection = navigation_property
            .as_ref()
            .map(|n| n.is_collection)
            .or(info.is_collection);
        let data = NavigationLinkScopeData {
            navigation_property,
            is_collection,
            expanded,
            pending_reference_links: reference_links,
            expanded_resource_set: resource_set,
            ..NavigationLinkScopeData::default()
        };
        self.push_scope(
            ReaderState::NavigationLinkStart,
            Some(ODataItem::NestedResourceInfo(info)),
            target,
            target_type,
            ScopeData::NavigationLink(data),
        );
        if let Some(path) = path {
            self.scopes.current_mut().odata_path = path;
        }
        Ok(())
    }

    /// Pre: on the link's value when expanded, else on the member after
    /// the link. Post: as for `EntityReferenceLink`, `ResourceSetStart` or
    /// `ResourceStart`, or unchanged.
    async fn read_at_navigation_link_start(&mut self) -> ODataResult<()> {
        let Some(data) = self.scopes.current_mut().data.as_navigation_link_mut() else {
            self.replace_state(ReaderState::NavigationLinkEnd);
            return Ok(());
        };
        if !data.pending_reference_links.is_empty() {
            let url = data.pending_reference_links.remove(0);
            self.push_scope(
                ReaderState::EntityReferenceLink,
                Some(ODataItem::EntityReferenceLink(ODataEntityReferenceLink::new(url))),
                None,
                None,
                ScopeData::None,
            );
            return Ok(());
        }
        if data.expanded {
            data.expanded = false;
            let set = data.expanded_resource_set.take();
            if self.json.node_type() == JsonNodeType::StartArray {
                self.json.read_start_array().await?;
                self.push_resource_set(set.unwrap_or_default());
                return Ok(());
            }
            return self.start_resource().await;
        }
        self.replace_state(ReaderState::NavigationLinkEnd);
        Ok(())
    }

    /// Pre and post: as for `NavigationLinkStart`.
    async fn read_at_entity_reference_link(&mut self) -> ODataResult<()> {
        self.pop_scope();
        self.read_at_navigation_link_start().await
    }

    /// Pre: on the member after the link's value. Post: as for the next
    /// `NavigationLinkStart`, or on the resource's EndObject.
    async fn read_at_navigation_link_end(&mut self) -> ODataResult<()> {
        self.pop_scope();
        let processing = self
            .scopes
            .current()
            .data
            .as_resource()
            .map(|d| d.processing_missing_projected_navigation_links)
            .unwrap_or(false);
        if processing {
            return self.continue_missing_projected_navigation_links();
        }
        self.read_current_resource_content().await?;
        match self.pending_link.take() {
            Some(found) => self.start_navigation_link(found),
            None => self.finish_resource_content(),
        }
    }

    // ---- Scopes ----

    fn deserializer(&mut self) -> ResourceDeserializer<'_> {
        ResourceDeserializer::new(
            &mut self.json,
            self.model.as_ref(),
            self.validator.as_ref(),
            &self.settings,
        )
    }

    fn increase_resource_depth(&mut self) -> ODataResult<()> {
        self.resource_depth += 1;
        if self.resource_depth > self.settings.max_nesting_depth {
            return Err(ODataError::MaxNestingDepthExceeded(
                self.settings.max_nesting_depth,
            ));
        }
        Ok(())
    }

    /// Push a scope inheriting projection and path from the current one; a
    /// navigation link narrows the projection to its own subtree.
    fn push_scope(
        &mut self,
        state: ReaderState,
        item: Option<ODataItem>,
        navigation_source: Option<Arc<EdmNavigationSource>>,
        resource_type: Option<Arc<EdmStructuredType>>,
        data: ScopeData,
    ) {
        let current = self.scopes.current();
        let from = current.state;
        let selected = match &item {
            Some(ODataItem::NestedResourceInfo(link)) => current.selected_properties.child(&link.name),
            _ => current.selected_properties.clone(),
        };
        let mut scope = Scope::new(state).with_item(item).with_data(data);
        scope.navigation_source = navigation_source;
        scope.resource_type = resource_type;
        scope.selected_properties = selected;
        scope.odata_path = current.odata_path.clone();
        debug!(from = %from, to = %state, "reader transition");
        self.scopes.push(scope);
    }

    fn pop_scope(&mut self) -> Option<Scope<ReaderState>> {
        let left = self.scopes.pop()?;
        debug!(from = %left.state, to = %self.state(), "reader transition");
        Some(left)
    }

    fn replace_state(&mut self, to: ReaderState) {
        let scope = self.scopes.current_mut();
        let from = scope.state;
        scope.state = to;
        debug!(from = %from, to = %to, "reader transition");
    }

    /// Pre: after the top-level item. Post: at the end of input.
    fn complete(&mut self, item: Option<ODataItem>) -> ODataResult<()> {
        let node = self.json.node_type();
        if node != JsonNodeType::EndOfInput {
            return Err(unexpected("reading the end of the payload", "the end of input", node));
        }
        self.scopes
            .replace_root(Scope::new(ReaderState::Completed).with_item(item));
        debug!("payload completed");
        notify(&mut self.listener, ListenerEvent::Completed);
        Ok(())
    }
}

/// Path of a top-level entity set or singleton.
fn source_root_path(source: &EdmNavigationSource) -> ODataPath {
    match source.kind {
        NavigationSourceKind::Singleton => ODataPath::singleton(source.name.as_str()),
        NavigationSourceKind::EntitySet => ODataPath::entity_set(source.name.as_str()),
        _ => ODataPath::new(),
    }
}

/// `path`, or the root path of the type context's source when `path` is
/// empty and the source is addressable.
fn addressable_source_path(path: &ODataPath, type_context: &ResourceTypeContext) -> ODataPath {
    if !path.is_empty() || !type_context.is_addressable() {
        return path.clone();
    }
    match &type_context.navigation_source_name {
        Some(name) if type_context.is_singleton() => ODataPath::singleton(name.as_str()),
        Some(name) => ODataPath::entity_set(name.as_str()),
        None => path.clone(),
    }
}

/// Path of the content of link `name` on the resource in `parent`.
/// Contained targets hang off the resource's canonical path.
fn navigation_path(
    model: &dyn EdmModel,
    parent: &Scope<ReaderState>,
    name: &str,
    target: Option<&EdmNavigationSource>,
) -> ODataPath {
    let Some(target) = target else {
        return ODataPath::new();
    };
    if target.kind != NavigationSourceKind::ContainedEntitySet {
        return source_root_path(target);
    }
    let kind = parent
        .data
        .as_resource()
        .and_then(|d| d.type_context.as_ref())
        .and_then(|c| c.navigation_source_kind);
    let mut path = parent
        .item
        .as_ref()
        .and_then(ODataItem::as_resource)
        .and_then(|resource| {
            resource_path(
                model,
                resource,
                parent.resource_type.as_deref(),
                &parent.odata_path,
                kind,
            )
        })
        .unwrap_or_else(|| parent.odata_path.clone());
    if let (Some(actual), Some(source)) =
        (parent.resource_type.as_deref(), parent.navigation_source.as_deref())
    {
        if actual.full_name != source.entity_type
            && actual.declared_navigation_property(name).is_some()
        {
            path = path.with_type_cast(actual.full_name.as_str());
        }
    }
    path.with_navigation(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use odl_edm::{
        CoreModel, EdmNavigationProperty, EdmPrimitiveKind, EdmProperty, EdmTypeRef,
        InMemoryModel,
    };
    use odl_core::ODataValue;
    use std::io::Read;
    use std::sync::Mutex;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn model() -> Arc<dyn EdmModel> {
        let person = EdmStructuredType::entity("NS.Person")
            .with_key("Id")
            .with_property(
                EdmProperty::new("Id", EdmTypeRef::Primitive(EdmPrimitiveKind::Int32))
                    .non_nullable(),
            )
            .with_property(EdmProperty::new(
                "Name",
                EdmTypeRef::Primitive(EdmPrimitiveKind::String),
            ))
            .with_navigation(EdmNavigationProperty::collection("Friends", "NS.Person"))
            .with_navigation(EdmNavigationProperty::single("Manager", "NS.Person"));
        Arc::new(
            InMemoryModel::builder()
                .add_type(person)
                .add_source(
                    EdmNavigationSource::entity_set("People", "NS.Person")
                        .with_binding("Friends", "People")
                        .with_binding("Manager", "People"),
                )
                .build()
                .unwrap(),
        )
    }

    fn reader(text: &str, settings: ReaderSettings, target: ReaderTarget) -> ODataReaderCore {
        ODataReaderCore::new(
            JsonReader::from_str(text),
            settings,
            model(),
            target,
            ExecutionMode::Synchronous,
        )
        .unwrap()
    }

    /// Read to the end, recording each state with the name of its item.
    fn trace_states(r: &mut ODataReaderCore) -> Vec<String> {
        let mut seen = Vec::new();
        while r.read().unwrap() {
            let label = match r.item() {
                Some(ODataItem::NestedResourceInfo(l)) => format!("{}:{}", r.state(), l.name),
                Some(ODataItem::EntityReferenceLink(l)) => format!("{}:{}", r.state(), l.url),
                Some(ODataItem::Resource(res)) => match res.property("Id") {
                    Some(p) => format!("{}:{}", r.state(), p.value.to_json()),
                    None => r.state().to_string(),
                },
                None if r.state() == ReaderState::ResourceStart => "ResourceStart:null".into(),
                _ => r.state().to_string(),
            };
            seen.push(label);
        }
        seen
    }

    const SET: &str = concat!(
        r#"{"@odata.context":"http://host/svc/$metadata#People(Id,Name)","@odata.count":2,"#,
        r#""value":[{"Id":1,"Name":"Alice"},{"Id":2,"Name":"Bob"}],"#,
        r#""@odata.nextLink":"http://host/svc/People?$skip=2"}"#
    );

    #[test]
    fn resource_set_states() {
        init_tracing();
        let mut r = reader(SET, ReaderSettings::response(), ReaderTarget::resource_set("People"));
        assert_eq!(
            trace_states(&mut r),
            [
                "ResourceSetStart",
                "ResourceStart:1",
                "ResourceEnd:1",
                "ResourceStart:2",
                "ResourceEnd:2",
                "ResourceSetEnd",
            ]
        );
        assert_eq!(r.state(), ReaderState::Completed);
        let set = r.item().and_then(ODataItem::as_resource_set).unwrap();
        assert_eq!(set.count, Some(2));
        assert_eq!(set.next_page_link.as_deref(), Some("http://host/svc/People?$skip=2"));
        assert_eq!(r.context_url().unwrap().select.as_deref(), Some("Id,Name"));
        assert_eq!(r.depth(), 0);
    }

    #[test]
    fn missing_projected_links_are_synthesized() {
        let text = r#"{"@odata.context":"http://host/svc/$metadata#People/$entity","Id":1}"#;
        let mut r = reader(text, ReaderSettings::response(), ReaderTarget::resource("People"));
        let mut urls = Vec::new();
        let mut states = Vec::new();
        while r.read().unwrap() {
            states.push(r.state());
            if r.state() == ReaderState::NavigationLinkStart {
                let link = r.item().and_then(ODataItem::as_nested_resource_info).unwrap();
                urls.push((link.name.clone(), link.url.clone().unwrap()));
            }
        }
        assert_eq!(
            urls,
            [
                ("Friends".to_string(), "http://host/svc/People(1)/Friends".to_string()),
                ("Manager".to_string(), "http://host/svc/People(1)/Manager".to_string()),
            ]
        );
        assert_eq!(states.last(), Some(&ReaderState::ResourceEnd));
        let resource = r.item().and_then(ODataItem::as_resource).unwrap();
        assert_eq!(resource.id.as_deref(), Some("http://host/svc/People(1)"));
    }

    #[test]
    fn projection_without_links_synthesizes_nothing() {
        let text = r#"{"@odata.context":"http://host/svc/$metadata#People(Id)/$entity","Id":1}"#;
        let mut r = reader(text, ReaderSettings::response(), ReaderTarget::resource("People"));
        assert_eq!(trace_states(&mut r), ["ResourceStart:1", "ResourceEnd:1"]);
    }

    #[test]
    fn links_in_the_payload_are_not_synthesized_again() {
        let text = concat!(
            r#"{"@odata.context":"http://host/svc/$metadata#People(Id,Name,Manager(Id),Friends(Id))/$entity","#,
            r#""Id":1,"Manager":{"Id":2},"Name":"Al"}"#
        );
        let mut r = reader(text, ReaderSettings::response(), ReaderTarget::resource("People"));
        assert_eq!(
            trace_states(&mut r),
            [
                "ResourceStart:1",
                "NavigationLinkStart:Manager",
                "ResourceStart:2",
                "ResourceEnd:2",
                "NavigationLinkEnd:Manager",
                "NavigationLinkStart:Friends",
                "NavigationLinkEnd:Friends",
                "ResourceEnd:1",
            ]
        );
        let resource = r.item().and_then(ODataItem::as_resource).unwrap();
        assert_eq!(resource.property("Name").unwrap().value, ODataValue::from("Al"));
    }

    #[test]
    fn expanded_content() {
        let text = concat!(
            r#"{"@odata.context":"http://host/svc/$metadata#People(Id,Manager(Id),Friends(Id))/$entity","#,
            r#""Id":1,"Manager":null,"Friends@odata.count":1,"Friends":[{"Id":3}],"#,
            r#""Friends@odata.nextLink":"next"}"#
        );
        let mut r = reader(text, ReaderSettings::response(), ReaderTarget::resource("People"));
        let mut states = Vec::new();
        while r.read().unwrap() {
            states.push(match r.item() {
                Some(ODataItem::NestedResourceInfo(l)) => format!("{}:{}", r.state(), l.name),
                Some(ODataItem::ResourceSet(s)) => {
                    format!("{}:{:?}:{:?}", r.state(), s.count, s.next_page_link)
                }
                Some(ODataItem::Resource(res)) => {
                    format!("{}:{}", r.state(), res.property("Id").unwrap().value.to_json())
                }
                _ => format!("{}:null", r.state()),
            });
        }
        assert_eq!(
            states,
            [
                "ResourceStart:1",
                "NavigationLinkStart:Manager",
                "ResourceStart:null",
                "ResourceEnd:null",
                "NavigationLinkEnd:Manager",
                "NavigationLinkStart:Friends",
                "ResourceSetStart:Some(1):None",
                "ResourceStart:3",
                "ResourceEnd:3",
                r#"ResourceSetEnd:Some(1):Some("next")"#,
                "NavigationLinkEnd:Friends",
                "ResourceEnd:1",
            ]
        );
    }

    #[test]
    fn request_binds_become_entity_reference_links() {
        let text = r#"{"Id":1,"Friends@odata.bind":["People(2)","People(3)"],"Manager@odata.bind":"People(4)"}"#;
        let mut r = reader(text, ReaderSettings::request(), ReaderTarget::resource("People"));
        assert_eq!(
            trace_states(&mut r),
            [
                "ResourceStart:1",
                "NavigationLinkStart:Friends",
                "EntityReferenceLink:People(2)",
                "EntityReferenceLink:People(3)",
                "NavigationLinkEnd:Friends",
                "NavigationLinkStart:Manager",
                "EntityReferenceLink:People(4)",
                "NavigationLinkEnd:Manager",
                "ResourceEnd:1",
            ]
        );
    }

    #[test]
    fn duplicate_property_moves_to_error() {
        let text = r#"{"@odata.context":"http://host/svc/$metadata#People/$entity","Id":1,"Id":2}"#;
        let mut r = reader(text, ReaderSettings::response(), ReaderTarget::resource("People"));
        assert!(matches!(r.read(), Err(ODataError::DuplicatePropertyName(n)) if n == "Id"));
        assert_eq!(r.state(), ReaderState::Error);
        assert!(matches!(
            r.read(),
            Err(ODataError::InvalidTransitionFromError { .. })
        ));
    }

    #[test]
    fn context_url_rules() {
        let mut r = reader(r#"{"Id":1}"#, ReaderSettings::response(), ReaderTarget::resource("People"));
        assert!(matches!(r.read(), Err(ODataError::ContextUrlMissing)));

        let text = r#"{"@odata.context":"http://host/svc/$metadata#Others/$entity","Id":1}"#;
        let mut r = reader(text, ReaderSettings::response(), ReaderTarget::resource("People"));
        assert!(matches!(r.read(), Err(ODataError::ContextUrlMismatch { .. })));

        let text = r#"{"@odata.context":"http://host/svc/$metadata#People","value":[]}"#;
        let mut r = reader(text, ReaderSettings::response(), ReaderTarget::resource("People"));
        assert!(matches!(r.read(), Err(ODataError::ContextUrlMismatch { .. })));

        let mut r = ODataReaderCore::new(
            JsonReader::from_str(r#"{"Id":1}"#),
            ReaderSettings::response(),
            Arc::new(CoreModel),
            ReaderTarget::untyped_resource(),
            ExecutionMode::Synchronous,
        )
        .unwrap();
        assert!(r.read().unwrap());
        assert!(r.context_url().is_none());
    }

    #[test]
    fn in_stream_error_is_reported() {
        let text = r#"{"@odata.context":"http://host/svc/$metadata#People","value":[{"Id":1},{"error":{"code":"500","message":"boom"}}]}"#;
        let mut r = reader(text, ReaderSettings::response(), ReaderTarget::resource_set("People"));
        let error = loop {
            match r.read() {
                Ok(true) => continue,
                Ok(false) => panic!("payload should not complete"),
                Err(e) => break e,
            }
        };
        assert!(matches!(error, ODataError::InStreamError { code, message } if code == "500" && message == "boom"));
        assert_eq!(r.state(), ReaderState::Error);

        let mut r = reader(
            r#"{"error":{"code":"404","message":"gone"}}"#,
            ReaderSettings::response(),
            ReaderTarget::resource("People"),
        );
        assert!(matches!(r.read(), Err(ODataError::InStreamError { code, .. }) if code == "404"));
    }

    #[test]
    fn nesting_depth_limit() {
        let text = r#"{"Id":1,"Manager":{"Id":2,"Manager":{"Id":3}}}"#;
        let settings = ReaderSettings {
            max_nesting_depth: 2,
            ..ReaderSettings::request()
        };
        let mut r = reader(text, settings, ReaderTarget::resource("People"));
        let error = loop {
            match r.read() {
                Ok(_) => continue,
                Err(e) => break e,
            }
        };
        assert!(matches!(error, ODataError::MaxNestingDepthExceeded(2)));

        let settings = ReaderSettings {
            max_nesting_depth: 3,
            ..ReaderSettings::request()
        };
        let mut r = reader(text, settings, ReaderTarget::resource("People"));
        while r.read().unwrap() {}
        assert_eq!(r.state(), ReaderState::Completed);
    }

    #[test]
    fn completed_reader_rejects_further_reads() {
        let mut r = reader(SET, ReaderSettings::response(), ReaderTarget::resource_set("People"));
        while r.read().unwrap() {}
        assert!(matches!(
            r.read(),
            Err(ODataError::InvalidTransitionFromCompleted { to }) if to == "Read"
        ));
        assert_eq!(r.state(), ReaderState::Error);
    }

    #[test]
    fn listener_sees_completion_and_errors() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let mut r = reader(SET, ReaderSettings::response(), ReaderTarget::resource_set("People"))
            .with_listener(Box::new(move |e| sink.lock().unwrap().push(e)));
        while r.read().unwrap() {}
        let _ = r.read();
        let events = events.lock().unwrap();
        assert_eq!(events[0], ListenerEvent::Completed);
        assert!(matches!(&events[1], ListenerEvent::Exception { .. }));
    }

    #[test]
    fn trailing_content_is_rejected() {
        let text = r#"{"@odata.context":"http://host/svc/$metadata#People","value":[],"extra":1}"#;
        let mut r = reader(text, ReaderSettings::response(), ReaderTarget::resource_set("People"));
        let outcome = loop {
            match r.read() {
                Ok(true) => continue,
                other => break other,
            }
        };
        assert!(matches!(outcome, Err(ODataError::Json(_)) | Err(ODataError::UnexpectedNode { .. })));
        assert_eq!(r.state(), ReaderState::Error);
    }

    #[test]
    fn type_annotations_are_resolved_against_the_model() {
        let text = r##"{"@odata.context":"http://host/svc/$metadata#People/$entity","@odata.type":"#NS.Nope","Id":1}"##;
        let mut r = reader(text, ReaderSettings::response(), ReaderTarget::resource("People"));
        assert!(matches!(r.read(), Err(ODataError::UnknownType(t)) if t == "NS.Nope"));
        assert_eq!(r.state(), ReaderState::Error);

        let text = r##"{"@odata.context":"http://host/svc/$metadata#People/$entity","Id":1,"@odata.type":"#NS.Nope","@odata.id":"x"}"##;
        let mut r = reader(text, ReaderSettings::response(), ReaderTarget::resource("People"));
        assert!(matches!(
            r.read(),
            Err(ODataError::ResourceAnnotationAfterProperty(a)) if a == "odata.type"
        ));
    }

    /// Yields its bytes, then fails every later read.
    struct FailsAfter(std::io::Cursor<Vec<u8>>);

    impl Read for FailsAfter {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.0.read(buf)? {
                0 => Err(std::io::Error::other("connection reset")),
                n => Ok(n),
            }
        }
    }

    #[test]
    fn items_are_reported_before_the_input_ends() {
        let prefix = concat!(
            r#"{"@odata.context":"http://host/svc/$metadata#People(Id,Name)","#,
            r#""value":[{"Id":1,"Name":"Alice"},"#
        );
        let mut r = ODataReaderCore::new(
            JsonReader::from_reader(FailsAfter(std::io::Cursor::new(prefix.as_bytes().to_vec()))),
            ReaderSettings::response(),
            model(),
            ReaderTarget::resource_set("People"),
            ExecutionMode::Synchronous,
        )
        .unwrap();
        let mut seen = Vec::new();
        let error = loop {
            match r.read() {
                Ok(_) => seen.push(r.state()),
                Err(e) => break e,
            }
        };
        assert_eq!(
            seen,
            [
                ReaderState::ResourceSetStart,
                ReaderState::ResourceStart,
                ReaderState::ResourceEnd
            ]
        );
        assert!(matches!(error, ODataError::Json(odl_json::JsonError::Io(_))));
    }

    #[tokio::test]
    async fn async_reads_do_not_wait_for_the_whole_payload() {
        use tokio::io::AsyncWriteExt;
        let (mut client, server) = tokio::io::duplex(256);
        let mut r = ODataReaderCore::new(
            JsonReader::from_async_reader(server),
            ReaderSettings::response(),
            model(),
            ReaderTarget::resource_set("People"),
            ExecutionMode::Asynchronous,
        )
        .unwrap();
        let (head, tail) = SET.split_at(SET.find("{\"Id\":2").unwrap());
        client.write_all(head.as_bytes()).await.unwrap();

        let first = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            let mut states = Vec::new();
            for _ in 0..3 {
                r.read_async().await.unwrap();
                states.push(r.state());
            }
            states
        })
        .await
        .unwrap();
        assert_eq!(
            first,
            [
                ReaderState::ResourceSetStart,
                ReaderState::ResourceStart,
                ReaderState::ResourceEnd
            ]
        );

        client.write_all(tail.as_bytes()).await.unwrap();
        drop(client);
        while r.read_async().await.unwrap() {}
        let set = r.item().and_then(ODataItem::as_resource_set).unwrap();
        assert_eq!(set.next_page_link.as_deref(), Some("http://host/svc/People?$skip=2"));
    }

    #[tokio::test]
    async fn cross_mode_calls_leave_state_untouched() {
        let mut r = reader(SET, ReaderSettings::response(), ReaderTarget::resource_set("People"));
        assert!(matches!(
            r.read_async().await,
            Err(ODataError::AsyncCallOnSyncInstance)
        ));
        assert_eq!(r.state(), ReaderState::Start);

        let mut r = ODataReaderCore::new(
            JsonReader::from_async_reader(std::io::Cursor::new(SET.as_bytes().to_vec())),
            ReaderSettings::response(),
            model(),
            ReaderTarget::resource_set("People"),
            ExecutionMode::Asynchronous,
        )
        .unwrap();
        assert!(matches!(r.read(), Err(ODataError::SyncCallOnAsyncInstance)));
        assert_eq!(r.state(), ReaderState::Start);
    }

    #[tokio::test]
    async fn async_reads_match_sync_reads() {
        let mut sync = reader(SET, ReaderSettings::response(), ReaderTarget::resource_set("People"));
        let mut expected = Vec::new();
        while sync.read().unwrap() {
            expected.push((sync.state(), sync.item().cloned()));
        }

        let mut r = ODataReaderCore::new(
            JsonReader::from_async_reader(std::io::Cursor::new(SET.as_bytes().to_vec())),
            ReaderSettings::response(),
            model(),
            ReaderTarget::resource_set("People"),
            ExecutionMode::Asynchronous,
        )
        .unwrap();
        let mut actual = Vec::new();
        while r.read_async().await.unwrap() {
            actual.push((r.state(), r.item().cloned()));
        }
        assert_eq!(actual, expected);
        assert_eq!(r.item(), sync.item());
    }
}
