use std::sync::Arc;

use odl_core::listener::notify;
use odl_core::metadata::resource_path;
use odl_core::{
    create_metadata_builder, ContextUrlInfo, ContextUrlKind, DefaultWriterValidator,
    DuplicatePropertyNamesChecker, ExecutionMode, Listener, ListenerEvent, MetadataBuilderInput,
    MetadataLevel, NavigationLinkScopeData, NavigationLinkUse, ODataEntityReferenceLink,
    ODataError, ODataInStreamError, ODataItem, ODataNestedResourceInfo, ODataPath, ODataResource,
    ODataResourceSet, ODataResult, ResourceScopeData, ResourceSetScopeData, ResourceTypeContext,
    Scope, ScopeData, ScopeStack, SelectedPropertiesNode, WriterSettings, WriterValidator,
};
use odl_edm::{EdmModel, EdmNavigationSource, EdmStructuredType, NavigationSourceKind};
use odl_json::JsonWriter;
use tracing::{debug, trace};

use crate::format::{FormatWriter, ParentKind, ResourceContext, ResourceSetContext};
use crate::json_format::JsonFormatWriter;
use crate::state::WriterState;

/// What a writer is created to produce at the top level.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriterTarget {
    pub writing_resource_set: bool,
    /// Entity set or singleton the payload belongs to.
    pub navigation_source: Option<String>,
    /// Expected resource type; defaults to the source's element type.
    pub resource_type: Option<String>,
}

impl WriterTarget {
    pub fn resource_set(navigation_source: impl Into<String>) -> Self {
        Self {
            writing_resource_set: true,
            navigation_source: Some(navigation_source.into()),
            resource_type: None,
        }
    }

    pub fn resource(navigation_source: impl Into<String>) -> Self {
        Self {
            writing_resource_set: false,
            navigation_source: Some(navigation_source.into()),
            resource_type: None,
        }
    }

    /// No navigation source: types and URLs come from the payload items
    /// and their serialization info.
    pub fn untyped_resource_set() -> Self {
        Self {
            writing_resource_set: true,
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

/// Content about to be written into a navigation link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LinkContent {
    Resource,
    ResourceSet,
    EntityReferenceLink,
}

/// Push-based writer state machine.
///
/// Validates every call against the current scope, keeps the scope stack,
/// and forwards the surviving calls to a [`FormatWriter`]. Any error moves
/// the writer into the absorbing `Error` state; the instance must then be
/// discarded.
///
/// The execution mode is fixed at construction. Sync and async entry points
/// run the same transition logic; the async ones additionally await a flush
/// once the output buffer passes `buffer_size`. Completing the payload
/// flushes the sink in either mode.
pub struct ODataWriterCore<F> {
    format: F,
    settings: WriterSettings,
    model: Arc<dyn EdmModel>,
    validator: Box<dyn WriterValidator>,
    mode: ExecutionMode,
    writing_resource_set: bool,
    scopes: ScopeStack<WriterState>,
    /// Open resource scopes.
    resource_depth: usize,
    /// Off when an enclosing writer owns the top-level resource: its
    /// unwritten projected links are not replayed and completion leaves
    /// the sink to the enclosing writer.
    owns_top_level: bool,
    listener: Option<Listener>,
}

impl<F: FormatWriter> ODataWriterCore<F> {
    pub fn new(
        format: F,
        settings: WriterSettings,
        model: Arc<dyn EdmModel>,
        target: WriterTarget,
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
        let odata_path = match navigation_source.as_deref() {
            Some(source) => source_root_path(source),
            None => ODataPath::new(),
        };

        let mut root = Scope::new(WriterState::Start);
        root.navigation_source = navigation_source;
        root.resource_type = resource_type;
        root.selected_properties = SelectedPropertiesNode::parse(settings.select_clause.as_deref());
        root.odata_path = odata_path;

        Ok(Self {
            format,
            settings,
            model,
            validator: Box::new(DefaultWriterValidator),
            mode,
            writing_resource_set: target.writing_resource_set,
            scopes: ScopeStack::new(root),
            resource_depth: 0,
            owns_top_level: true,
            listener: None,
        })
    }

    pub fn with_validator(mut self, validator: Box<dyn WriterValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_listener(mut self, listener: Listener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub(crate) fn for_embedded_content(mut self) -> Self {
        self.owns_top_level = false;
        self
    }

    // ---- Introspection ----

    pub fn state(&self) -> WriterState {
        self.scopes.current().state
    }

    pub fn current_item(&self) -> Option<&ODataItem> {
        self.scopes.current().item.as_ref()
    }

    /// The item of the current scope; instance annotations added here
    /// before `write_end` are written when the item ends.
    pub fn current_item_mut(&mut self) -> Option<&mut ODataItem> {
        self.scopes.current_mut().item.as_mut()
    }

    /// Number of open resources.
    pub fn depth(&self) -> usize {
        self.resource_depth
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn settings(&self) -> &WriterSettings {
        &self.settings
    }

    pub fn format(&self) -> &F {
        &self.format
    }

    pub fn into_format(self) -> F {
        self.format
    }

    pub(crate) fn format_mut(&mut self) -> &mut F {
        &mut self.format
    }

    // ---- Synchronous API ----

    pub fn write_start_resource_set(&mut self, set: ODataResourceSet) -> ODataResult<()> {
        self.verify_sync()?;
        self.intercept(|w| w.start_resource_set(set))
    }

    pub fn write_start_resource(&mut self, resource: ODataResource) -> ODataResult<()> {
        self.verify_sync()?;
        self.intercept(|w| w.start_resource(Some(resource)))
    }

    /// Null value of a single-valued expanded navigation link.
    pub fn write_start_null_resource(&mut self) -> ODataResult<()> {
        self.verify_sync()?;
        self.intercept(|w| w.start_resource(None))
    }

    pub fn write_start_navigation_link(&mut self, link: ODataNestedResourceInfo) -> ODataResult<()> {
        self.verify_sync()?;
        self.intercept(|w| w.start_navigation_link(link))
    }

    pub fn write_end(&mut self) -> ODataResult<()> {
        self.verify_sync()?;
        self.intercept(|w| w.end())
    }

    pub fn write_entity_reference_link(&mut self, link: ODataEntityReferenceLink) -> ODataResult<()> {
        self.verify_sync()?;
        self.intercept(|w| w.entity_reference_link(link))
    }

    /// Abort the payload with an inline error object. Idempotent once the
    /// writer is in `Error`.
    pub fn write_in_stream_error(&mut self, error: ODataInStreamError) -> ODataResult<()> {
        self.verify_sync()?;
        self.intercept(|w| w.in_stream_error(error))
    }

    pub fn flush(&mut self) -> ODataResult<()> {
        self.verify_sync()?;
        self.intercept(|w| w.format.flush())
    }

    // ---- Asynchronous API ----

    pub async fn write_start_resource_set_async(&mut self, set: ODataResourceSet) -> ODataResult<()> {
        self.verify_async()?;
        self.intercept(|w| w.start_resource_set(set))?;
        self.flush_when_buffer_full().await
    }

    pub async fn write_start_resource_async(&mut self, resource: ODataResource) -> ODataResult<()> {
        self.verify_async()?;
        self.intercept(|w| w.start_resource(Some(resource)))?;
        self.flush_when_buffer_full().await
    }

    pub async fn write_start_null_resource_async(&mut self) -> ODataResult<()> {
        self.verify_async()?;
        self.intercept(|w| w.start_resource(None))?;
        self.flush_when_buffer_full().await
    }

    pub async fn write_start_navigation_link_async(
        &mut self,
        link: ODataNestedResourceInfo,
    ) -> ODataResult<()> {
        self.verify_async()?;
        self.intercept(|w| w.start_navigation_link(link))?;
        self.flush_when_buffer_full().await
    }

    /// Ending the top-level item flushes whatever is still held.
    pub async fn write_end_async(&mut self) -> ODataResult<()> {
        self.verify_async()?;
        self.intercept(|w| w.end())?;
        if self.state() == WriterState::Completed {
            return self.flush_async_intercepted().await;
        }
        self.flush_when_buffer_full().await
    }

    pub async fn write_entity_reference_link_async(
        &mut self,
        link: ODataEntityReferenceLink,
    ) -> ODataResult<()> {
        self.verify_async()?;
        self.intercept(|w| w.entity_reference_link(link))?;
        self.flush_when_buffer_full().await
    }

    pub async fn write_in_stream_error_async(&mut self, error: ODataInStreamError) -> ODataResult<()> {
        self.verify_async()?;
        self.intercept(|w| w.in_stream_error(error))?;
        self.flush_when_buffer_full().await
    }

    pub async fn flush_async(&mut self) -> ODataResult<()> {
        self.verify_async()?;
        self.flush_async_intercepted().await
    }

    async fn flush_when_buffer_full(&mut self) -> ODataResult<()> {
        if self.format.buffered_len() < self.settings.buffer_size {
            return Ok(());
        }
        self.flush_async_intercepted().await
    }

    async fn flush_async_intercepted(&mut self) -> ODataResult<()> {
        let result = self.format.flush_async().await;
        if let Err(e) = &result {
            self.enter_error_state(e);
        }
        result
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

    /// Run `action`; on failure move to `Error` and return the error
    /// unchanged.
    pub(crate) fn intercept<T>(
        &mut self,
        action: impl FnOnce(&mut Self) -> ODataResult<T>,
    ) -> ODataResult<T> {
        let result = action(self);
        if let Err(e) = &result {
            self.enter_error_state(e);
        }
        result
    }

    fn enter_error_state(&mut self, error: &ODataError) {
        let from = self.state();
        if from == WriterState::Error {
            return;
        }
        let item = self.scopes.current().item.clone();
        let mut scope = Scope::new(WriterState::Error).with_item(item);
        scope.skip_writing = true;
        self.scopes.push(scope);
        debug!(from = %from, error = %error, "writer entered error state");
        notify(
            &mut self.listener,
            ListenerEvent::Exception {
                message: error.to_string(),
            },
        );
    }

    fn validate_transition(&self, to: WriterState) -> ODataResult<()> {
        let from = self.state();
        let legal = match (from, to) {
            (_, WriterState::Error) => true,
            (WriterState::Error, _) => {
                return Err(ODataError::InvalidTransitionFromError { to: to.to_string() })
            }
            (WriterState::Completed, _) => {
                return Err(ODataError::InvalidTransitionFromCompleted { to: to.to_string() })
            }
            (WriterState::Start, WriterState::ResourceSet) => self.writing_resource_set,
            (WriterState::Start, WriterState::Resource) => !self.writing_resource_set,
            (WriterState::Resource, WriterState::NavigationLink) => self.current_item().is_some(),
            (WriterState::ResourceSet, WriterState::Resource) => true,
            (
                WriterState::NavigationLinkWithContent,
                WriterState::Resource | WriterState::ResourceSet,
            ) => true,
            _ => false,
        };
        if legal {
            Ok(())
        } else {
            Err(ODataError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            })
        }
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

    // ---- Scopes ----

    /// Push a scope inheriting projection, path and the skip flag from the
    /// current one. Entering a navigation link that is not projected starts
    /// a skipped subtree.
    fn push_scope(
        &mut self,
        state: WriterState,
        item: Option<ODataItem>,
        navigation_source: Option<Arc<EdmNavigationSource>>,
        resource_type: Option<Arc<EdmStructuredType>>,
        data: ScopeData,
    ) {
        let current = self.scopes.current();
        let from = current.state;
        let mut skip_writing = current.skip_writing;
        let mut selected = current.selected_properties.clone();
        if let Some(ODataItem::NestedResourceInfo(link)) = &item {
            selected = current.selected_properties.child(&link.name);
            if !skip_writing && selected.is_empty() {
                trace!(navigation = %link.name, "navigation link not projected, skipping subtree");
                skip_writing = true;
            }
        }
        let mut scope = Scope::new(state).with_item(item).with_data(data);
        scope.navigation_source = navigation_source;
        scope.resource_type = resource_type;
        scope.selected_properties = selected;
        scope.skip_writing = skip_writing;
        scope.odata_path = current.odata_path.clone();
        debug!(from = %from, to = %state, "writer transition");
        self.scopes.push(scope);
    }

    fn leave_scope(&mut self) -> ODataResult<()> {
        let Some(left) = self.scopes.pop() else {
            return Ok(());
        };
        debug!(from = %left.state, to = %self.state(), "writer transition");
        if self.scopes.len() == 1 && self.state() == WriterState::Start {
            if !left.skip_writing {
                self.format.end_payload()?;
            }
            if self.owns_top_level && self.mode == ExecutionMode::Synchronous {
                self.format.flush()?;
            }
            self.scopes
                .replace_root(Scope::new(WriterState::Completed).with_item(left.item));
            debug!("payload completed");
            notify(&mut self.listener, ListenerEvent::Completed);
        }
        Ok(())
    }

    /// Position of the current scope relative to its parent.
    fn parent_kind(&self) -> ParentKind {
        match self.scopes.parent().map(|s| s.state) {
            Some(WriterState::ResourceSet) => ParentKind::ResourceSet,
            Some(WriterState::NavigationLinkWithContent) => ParentKind::NavigationLink,
            _ => ParentKind::TopLevel,
        }
    }

    fn writes_full_metadata(&self) -> bool {
        self.settings.is_response && self.settings.metadata_level == MetadataLevel::Full
    }

    // ---- Resource sets ----

    fn start_resource_set(&mut self, set: ODataResourceSet) -> ODataResult<()> {
        self.check_for_navigation_link_with_content(LinkContent::ResourceSet)?;
        self.validate_transition(WriterState::ResourceSet)?;
        self.validator
            .validate_resource_set_at_start(&set, self.settings.is_response)?;

        let current = self.scopes.current();
        let navigation_source = current.navigation_source.clone();
        let resource_type = current.resource_type.clone();
        let type_context = ResourceTypeContext::create(
            set.serialization_info.as_ref(),
            navigation_source.as_deref(),
            resource_type.as_deref(),
            true,
        );
        let data = ResourceSetScopeData {
            type_context: Some(type_context),
            ..ResourceSetScopeData::default()
        };
        self.push_scope(
            WriterState::ResourceSet,
            Some(ODataItem::ResourceSet(set)),
            navigation_source,
            resource_type,
            ScopeData::ResourceSet(data),
        );
        if self.scopes.current().skip_writing {
            return Ok(());
        }

        let parent = self.parent_kind();
        let context_url = if parent == ParentKind::TopLevel {
            self.format.start_payload()?;
            self.context_url(true)
        } else {
            None
        };
        let Self { scopes, format, .. } = self;
        let Scope { item, data, .. } = scopes.current_mut();
        let (Some(set), ScopeData::ResourceSet(data)) =
            (item.as_ref().and_then(ODataItem::as_resource_set), data)
        else {
            return Ok(());
        };
        let mut ctx = ResourceSetContext {
            parent,
            context_url,
            annotations: &mut data.annotation_tracker,
        };
        format.start_resource_set(set, &mut ctx)
    }

    fn end_resource_set(&mut self) -> ODataResult<()> {
        let parent = self.parent_kind();
        let is_response = self.settings.is_response;
        let Self {
            scopes,
            format,
            validator,
            ..
        } = self;
        let Scope {
            item,
            data,
            skip_writing,
            ..
        } = scopes.current_mut();
        let (Some(set), ScopeData::ResourceSet(data)) =
            (item.as_ref().and_then(ODataItem::as_resource_set), data)
        else {
            return Ok(());
        };
        validator.validate_resource_set_at_end(set, is_response)?;
        if *skip_writing {
            return Ok(());
        }
        let mut ctx = ResourceSetContext {
            parent,
            context_url: None,
            annotations: &mut data.annotation_tracker,
        };
        format.end_resource_set(set, &mut ctx)
    }

    // ---- Resources ----

    fn start_resource(&mut self, resource: Option<ODataResource>) -> ODataResult<()> {
        self.check_for_navigation_link_with_content(LinkContent::Resource)?;
        self.validate_transition(WriterState::Resource)?;

        let current = self.scopes.current();
        let expected = current.resource_type.clone();
        let navigation_source = current.navigation_source.clone();
        let resource_type = match &resource {
            Some(r) => self.validator.validate_resource_type(
                self.model.as_ref(),
                expected.as_ref(),
                r.type_name.as_deref(),
            )?,
            None => expected.clone(),
        };
        self.increase_resource_depth()?;
        let checker = match &resource {
            Some(r) => self.validate_properties(r, resource_type.as_deref())?,
            None => self.validator.duplicate_checker(),
        };
        if let Some(set) = self.scopes.current_mut().data.as_resource_set_mut() {
            set.resource_count += 1;
        }

        self.push_scope(
            WriterState::Resource,
            resource.map(ODataItem::Resource),
            navigation_source,
            resource_type,
            ScopeData::Resource(ResourceScopeData::new(checker)),
        );
        self.prepare_resource(expected.as_deref());
        if self.scopes.current().skip_writing {
            return Ok(());
        }
        self.write_resource_start()
    }

    /// Duplicate names, open properties and nullability, before anything
    /// of the resource is written.
    fn validate_properties(
        &self,
        resource: &ODataResource,
        resource_type: Option<&EdmStructuredType>,
    ) -> ODataResult<DuplicatePropertyNamesChecker> {
        let mut checker = self.validator.duplicate_checker();
        for property in &resource.properties {
            checker.check_property(&property.name)?;
            let declared = resource_type.and_then(|ty| self.model.find_property(ty, &property.name));
            if let (None, Some(ty)) = (&declared, resource_type) {
                self.validator
                    .validate_open_property(self.model.as_ref(), ty, &property.name)?;
            }
            if property.value.is_null() {
                self.validator
                    .validate_null_property(declared.as_ref(), &property.name)?;
            }
        }
        Ok(checker)
    }

    /// Type context, canonical path and metadata builder of the resource
    /// just pushed.
    fn prepare_resource(&mut self, expected: Option<&EdmStructuredType>) {
        let from_collection = match self.scopes.parent() {
            Some(parent) if parent.state == WriterState::ResourceSet => true,
            Some(parent) => parent
                .data
                .as_navigation_link()
                .and_then(|d| d.is_collection)
                .unwrap_or(false),
            None => false,
        };
        let scope = self.scopes.current();
        let Some(resource) = scope.item.as_ref().and_then(ODataItem::as_resource) else {
            return;
        };
        let type_context = ResourceTypeContext::create(
            resource.serialization_info.as_ref(),
            scope.navigation_source.as_deref(),
            expected,
            from_collection,
        );
        let mut source_path = scope.odata_path.clone();
        if source_path.is_empty() && type_context.is_addressable() {
            if let Some(name) = &type_context.navigation_source_name {
                source_path = if type_context.is_singleton() {
                    ODataPath::singleton(name.as_str())
                } else {
                    ODataPath::entity_set(name.as_str())
                };
            }
        }
        let path = match type_context.navigation_source_kind {
            Some(NavigationSourceKind::ContainedEntitySet) if !from_collection => {
                Some(source_path.clone())
            }
            kind => resource_path(
                self.model.as_ref(),
                resource,
                scope.resource_type.as_deref(),
                &source_path,
                kind,
            ),
        };
        let builder = create_metadata_builder(
            self.model.as_ref(),
            MetadataBuilderInput {
                service_root: self.settings.service_root.as_deref(),
                resource,
                resource_type: scope.resource_type.as_deref(),
                source_path: &source_path,
                type_context: &type_context,
                selected: &scope.selected_properties,
                key_as_segment: self.settings.key_as_segment,
            },
        );

        let scope = self.scopes.current_mut();
        scope.odata_path = path.unwrap_or(source_path);
        if let Some(data) = scope.data.as_resource_mut() {
            data.type_context = Some(type_context);
            data.metadata_builder = Some(builder);
        }
    }

    fn write_resource_start(&mut self) -> ODataResult<()> {
        let parent = self.parent_kind();
        if parent == ParentKind::TopLevel {
            self.format.start_payload()?;
        }
        let level = self.settings.metadata_level;
        let full = self.writes_full_metadata();
        let context_url = if parent == ParentKind::TopLevel {
            self.context_url(false)
        } else {
            None
        };

        let scope = self.scopes.current();
        let resource = scope.item.as_ref().and_then(ODataItem::as_resource);
        let data = scope.data.as_resource();
        let builder = data.and_then(|d| d.metadata_builder.as_deref());
        let expected = data
            .and_then(|d| d.type_context.as_ref())
            .and_then(|c| c.expected_resource_type_name.clone());
        let actual = resource
            .and_then(|r| r.type_name.as_deref())
            .map(|n| n.trim_start_matches('#').to_string())
            .or_else(|| scope.resource_type_name().map(str::to_string));
        let type_name = type_name_to_write(level, actual, expected.as_deref());
        let (mut id, mut edit_link, read_link) = match resource {
            Some(r) if level != MetadataLevel::None => {
                (r.id.clone(), r.edit_link.clone(), r.read_link.clone())
            }
            _ => (None, None, None),
        };
        if full {
            if let Some(builder) = builder {
                id = id.or_else(|| builder.id());
                edit_link = edit_link.or_else(|| builder.edit_link());
            }
        }

        let Self { scopes, format, .. } = self;
        let Scope {
            item,
            data,
            resource_type,
            ..
        } = scopes.current_mut();
        let resource = item.as_ref().and_then(ODataItem::as_resource);
        let ScopeData::Resource(data) = data else {
            return Ok(());
        };
        let mut ctx = ResourceContext {
            parent,
            context_url,
            type_name,
            id,
            edit_link,
            read_link,
            resource_type: resource_type.as_deref(),
            written_metadata: &mut data.written_metadata,
            annotations: &mut data.annotation_tracker,
        };
        format.start_resource(resource, &mut ctx)
    }

    /// Projected navigation links the caller never wrote are emitted after
    /// the resource's own content and before it closes.
    fn end_resource(&mut self) -> ODataResult<()> {
        self.resource_depth = self.resource_depth.saturating_sub(1);
        if self.scopes.current().skip_writing {
            return Ok(());
        }
        let parent = self.parent_kind();
        let replay = self.writes_full_metadata()
            && (self.owns_top_level || parent != ParentKind::TopLevel);
        let Self { scopes, format, .. } = self;
        let Scope {
            item,
            data,
            resource_type,
            ..
        } = scopes.current_mut();
        let ScopeData::Resource(data) = data else {
            return Ok(());
        };
        if replay && item.is_some() {
            if let Some(builder) = data.metadata_builder.as_mut() {
                while let Some(link) = builder.next_unprocessed_navigation_link() {
                    format.write_deferred_navigation_link(&link)?;
                }
            }
        }
        let mut ctx = ResourceContext {
            parent,
            context_url: None,
            type_name: None,
            id: None,
            edit_link: None,
            read_link: None,
            resource_type: resource_type.as_deref(),
            written_metadata: &mut data.written_metadata,
            annotations: &mut data.annotation_tracker,
        };
        format.end_resource(item.as_ref().and_then(ODataItem::as_resource), &mut ctx)
    }

    fn context_url(&self, for_set: bool) -> Option<String> {
        if !self.settings.is_response || self.settings.metadata_level == MetadataLevel::None {
            return None;
        }
        let metadata = self.settings.metadata_document_uri()?;
        let scope = self.scopes.current();
        let (type_context, actual) = match &scope.data {
            ScopeData::ResourceSet(d) => (d.type_context.as_ref()?, None),
            ScopeData::Resource(d) => (d.type_context.as_ref()?, scope.resource_type_name()),
            _ => return None,
        };
        let path = match scope.odata_path.segments().first() {
            Some(_) if for_set => scope.odata_path.to_relative_url(self.settings.key_as_segment),
            _ => type_context.navigation_source_name.clone()?,
        };
        let kind = if for_set || type_context.is_singleton() {
            ContextUrlKind::ResourceSet
        } else {
            ContextUrlKind::Resource
        };
        let info = ContextUrlInfo::new(path, kind)
            .with_type_cast(type_context.type_cast_for(actual))
            .with_select(self.settings.select_clause.clone());
        Some(info.build(&metadata))
    }

    // ---- Navigation links ----

    fn start_navigation_link(&mut self, link: ODataNestedResourceInfo) -> ODataResult<()> {
        self.validate_transition(WriterState::NavigationLink)?;
        let current = self.scopes.current();
        let navigation = self.validator.validate_navigation_link(
            self.model.as_ref(),
            current.resource_type.as_deref(),
            &link,
        )?;
        let is_collection = navigation
            .as_ref()
            .map(|n| n.is_collection)
            .or(link.is_collection);
        let target_type = navigation
            .as_ref()
            .and_then(|n| self.model.find_type(&n.target_type));
        if let Some(builder) = self
            .scopes
            .current_mut()
            .data
            .as_resource_mut()
            .and_then(|d| d.metadata_builder.as_mut())
        {
            builder.mark_navigation_link_processed(&link.name);
        }
        let data = NavigationLinkScopeData {
            navigation_property: navigation,
            is_collection,
            ..NavigationLinkScopeData::default()
        };
        self.push_scope(
            WriterState::NavigationLink,
            Some(ODataItem::NestedResourceInfo(link)),
            None,
            target_type,
            ScopeData::NavigationLink(data),
        );
        Ok(())
    }

    /// Called before a resource, resource set or entity reference link is
    /// written. Inside a navigation link it checks the content against the
    /// link's cardinality, and on the first content resolves the target
    /// navigation source and path and promotes the scope to
    /// `NavigationLinkWithContent`.
    fn check_for_navigation_link_with_content(&mut self, content: LinkContent) -> ODataResult<()> {
        let state = self.state();
        if !state.is_navigation_link() {
            return Ok(());
        }
        let is_response = self.settings.is_response;
        let scope = self.scopes.current();
        let Some(link) = scope.item.as_ref().and_then(ODataItem::as_nested_resource_info) else {
            return Ok(());
        };
        let name = link.name.clone();
        let declared = scope.data.as_navigation_link().and_then(|d| d.is_collection);
        match (content, declared) {
            (LinkContent::ResourceSet, Some(false)) => {
                return Err(ODataError::NavigationLinkContentMismatch {
                    name,
                    expected: "a single resource",
                    found: "a resource set",
                })
            }
            (LinkContent::Resource, Some(true)) if is_response => {
                return Err(ODataError::NavigationLinkContentMismatch {
                    name,
                    expected: "a resource set",
                    found: "a single resource",
                })
            }
            _ => {}
        }

        if state == WriterState::NavigationLinkWithContent {
            let Some(data) = self.scopes.current_mut().data.as_navigation_link_mut() else {
                return Ok(());
            };
            let collection = data.is_collection == Some(true);
            if data.content_count > 0 && (is_response || !collection) {
                return Err(ODataError::MultipleItemsInNavigationLinkContent(name));
            }
            match content {
                LinkContent::EntityReferenceLink if data.expanded_written => {
                    return Err(ODataError::EntityReferenceLinkAfterExpandedContent(name))
                }
                LinkContent::Resource if data.resource_set_written => {
                    return Err(ODataError::MultipleItemsInNavigationLinkContent(name))
                }
                LinkContent::ResourceSet if data.expanded_written => {
                    return Err(ODataError::MultipleItemsInNavigationLinkContent(name))
                }
                _ => {}
            }
            data.content_count += 1;
            record_link_content(data, content);
            return Ok(());
        }

        let is_collection = declared.unwrap_or(content == LinkContent::ResourceSet);
        let usage = match content {
            LinkContent::EntityReferenceLink => NavigationLinkUse::Bind,
            _ => NavigationLinkUse::Expanded,
        };
        let navigation = scope
            .data
            .as_navigation_link()
            .and_then(|d| d.navigation_property.clone());
        let Some(parent) = self.scopes.parent() else {
            return Ok(());
        };
        let target = match (parent.navigation_source.as_deref(), navigation.as_ref()) {
            (Some(source), Some(nav)) => Some(self.model.find_navigation_target(source, nav)),
            _ => None,
        };
        let path = if is_response {
            Some(navigation_path(parent, &name, target.as_deref()))
        } else {
            None
        };

        if let Some(data) = self.scopes.parent_mut().and_then(|p| p.data.as_resource_mut()) {
            data.duplicate_checker
                .check_navigation_link(&name, usage, Some(is_collection))?;
        }

        let scope = self.scopes.current_mut();
        scope.state = WriterState::NavigationLinkWithContent;
        scope.navigation_source = target;
        if let Some(path) = path {
            scope.odata_path = path;
        }
        if let Some(data) = scope.data.as_navigation_link_mut() {
            data.is_collection = Some(is_collection);
            data.content_count = 1;
            record_link_content(data, content);
        }
        debug!(
            from = %WriterState::NavigationLink,
            to = %WriterState::NavigationLinkWithContent,
            navigation = %name,
            "writer transition"
        );
        if scope.skip_writing {
            return Ok(());
        }
        let Some(link) = scope.item.as_ref().and_then(ODataItem::as_nested_resource_info) else {
            return Ok(());
        };
        self.format.start_navigation_link_with_content(link, is_collection)
    }

    fn end_deferred_navigation_link(&mut self) -> ODataResult<()> {
        let full = self.writes_full_metadata();
        let scope = self.scopes.current();
        let Some(link) = scope.item.as_ref().and_then(ODataItem::as_nested_resource_info) else {
            return Ok(());
        };
        if !self.settings.is_response {
            return Err(ODataError::DeferredLinkInRequest(link.name.clone()));
        }
        let mut link = link.clone();
        let is_collection = scope.data.as_navigation_link().and_then(|d| d.is_collection);
        let skip = scope.skip_writing;

        let parent = self.scopes.parent_mut().and_then(|p| p.data.as_resource_mut());
        if let Some(data) = parent {
            data.duplicate_checker
                .check_navigation_link(&link.name, NavigationLinkUse::Deferred, is_collection)?;
            if full {
                if let Some(builder) = data.metadata_builder.as_deref() {
                    if link.url.is_none() {
                        link.url = builder.navigation_link(&link.name);
                    }
                    if link.association_link_url.is_none() {
                        link.association_link_url = builder.association_link(&link.name);
                    }
                }
            }
        }
        if skip {
            return Ok(());
        }
        self.format.write_deferred_navigation_link(&link)
    }

    fn end_navigation_link_with_content(&mut self) -> ODataResult<()> {
        let scope = self.scopes.current();
        if scope.skip_writing {
            return Ok(());
        }
        let is_collection = scope
            .data
            .as_navigation_link()
            .and_then(|d| d.is_collection)
            .unwrap_or(false);
        let Some(link) = scope.item.as_ref().and_then(ODataItem::as_nested_resource_info) else {
            return Ok(());
        };
        self.format.end_navigation_link_with_content(link, is_collection)
    }

    fn entity_reference_link(&mut self, link: ODataEntityReferenceLink) -> ODataResult<()> {
        const TARGET: &str = "EntityReferenceLink";
        match self.state() {
            WriterState::Error => {
                return Err(ODataError::InvalidTransitionFromError { to: TARGET.into() })
            }
            WriterState::Completed => {
                return Err(ODataError::InvalidTransitionFromCompleted { to: TARGET.into() })
            }
            state if !state.is_navigation_link() => {
                return Err(ODataError::InvalidTransition {
                    from: state.to_string(),
                    to: TARGET.into(),
                })
            }
            _ => {}
        }
        self.validator
            .validate_entity_reference_link(&link, self.settings.is_response)?;
        self.check_for_navigation_link_with_content(LinkContent::EntityReferenceLink)?;

        let Self { scopes, format, .. } = self;
        let scope = scopes.current();
        if scope.skip_writing {
            return Ok(());
        }
        let is_collection = scope
            .data
            .as_navigation_link()
            .and_then(|d| d.is_collection)
            .unwrap_or(false);
        let Some(parent) = scope.item.as_ref().and_then(ODataItem::as_nested_resource_info) else {
            return Ok(());
        };
        format.write_entity_reference_in_navigation_link_content(parent, is_collection, &link)
    }

    // ---- End and errors ----

    fn end(&mut self) -> ODataResult<()> {
        match self.state() {
            WriterState::Resource => self.end_resource()?,
            WriterState::ResourceSet => self.end_resource_set()?,
            WriterState::NavigationLink => self.end_deferred_navigation_link()?,
            WriterState::NavigationLinkWithContent => self.end_navigation_link_with_content()?,
            WriterState::Start => {
                return Err(ODataError::WriteEndInInvalidState(
                    WriterState::Start.to_string(),
                ))
            }
            WriterState::Completed => {
                return Err(ODataError::InvalidTransitionFromCompleted { to: "End".into() })
            }
            WriterState::Error => {
                return Err(ODataError::InvalidTransitionFromError { to: "End".into() })
            }
        }
        self.leave_scope()
    }

    fn in_stream_error(&mut self, error: ODataInStreamError) -> ODataResult<()> {
        match self.state() {
            WriterState::Error => return Ok(()),
            WriterState::Completed => {
                return Err(ODataError::InvalidTransitionFromCompleted {
                    to: WriterState::Error.to_string(),
                })
            }
            _ => {}
        }
        if !self.scopes.current().skip_writing {
            self.format.write_in_stream_error(&error)?;
        }
        self.enter_error_state(&ODataError::InStreamError {
            code: error.code,
            message: error.message,
        });
        Ok(())
    }
}

impl ODataWriterCore<JsonFormatWriter> {
    /// Writer producing OData JSON into `json`.
    pub fn for_json(
        json: JsonWriter,
        settings: WriterSettings,
        model: Arc<dyn EdmModel>,
        target: WriterTarget,
        mode: ExecutionMode,
    ) -> ODataResult<Self> {
        let format = JsonFormatWriter::new(json, settings.clone(), model.clone());
        Self::new(format, settings, model, target, mode)
    }

    /// Bytes still held in memory; the whole payload for in-memory sinks.
    pub fn into_output(self) -> Vec<u8> {
        self.format.into_json_writer().into_bytes()
    }
}

/// Request collection links take any number of entity reference links
/// followed by either one resource set or a run of resources.
fn record_link_content(data: &mut NavigationLinkScopeData, content: LinkContent) {
    match content {
        LinkContent::ResourceSet => {
            data.expanded_written = true;
            data.resource_set_written = true;
        }
        LinkContent::Resource => data.expanded_written = true,
        LinkContent::EntityReferenceLink => {}
    }
}

/// Path of a top-level entity set or singleton.
pub(crate) fn source_root_path(source: &EdmNavigationSource) -> ODataPath {
    match source.kind {
        NavigationSourceKind::Singleton => ODataPath::singleton(source.name.as_str()),
        NavigationSourceKind::EntitySet => ODataPath::entity_set(source.name.as_str()),
        _ => ODataPath::new(),
    }
}

/// Path of the content of navigation link `name` on the resource in
/// `parent`. Contained targets hang off the parent's canonical path, with a
/// type cast when the property is declared on a derived type.
fn navigation_path(
    parent: &Scope<WriterState>,
    name: &str,
    target: Option<&EdmNavigationSource>,
) -> ODataPath {
    let Some(target) = target else {
        return ODataPath::new();
    };
    match target.kind {
        NavigationSourceKind::ContainedEntitySet => {
            let mut path = parent.odata_path.clone();
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
        _ => source_root_path(target),
    }
}

/// `odata.type` is written in full metadata, and in minimal metadata when
/// the actual type differs from the expected one.
fn type_name_to_write(
    level: MetadataLevel,
    actual: Option<String>,
    expected: Option<&str>,
) -> Option<String> {
    let actual = actual?;
    match level {
        MetadataLevel::None => None,
        MetadataLevel::Full => Some(actual),
        MetadataLevel::Minimal if expected == Some(actual.as_str()) => None,
        MetadataLevel::Minimal => Some(actual),
    }
}
