use std::mem;
use std::sync::Arc;

use odl_core::annotations::{
    instance_annotation, DELTA_ID_PROPERTY, DELTA_REASON_PROPERTY, DELTA_RELATIONSHIP_PROPERTY,
    DELTA_SOURCE_PROPERTY, DELTA_TARGET_PROPERTY, ODATA_CONTEXT, ODATA_COUNT, ODATA_DELTA_LINK,
    ODATA_ETAG, ODATA_ID, ODATA_NEXT_LINK, ODATA_TYPE, VALUE_PROPERTY,
};
use odl_core::listener::notify;
use odl_core::validation::resolve_resource_type;
use odl_core::{
    create_metadata_builder, ContextUrlInfo, ContextUrlKind, DuplicatePropertyNamesChecker,
    ExecutionMode, InstanceAnnotationWriteTracker, Listener, ListenerEvent, MetadataBuilderInput,
    MetadataLevel, NavigationLinkUse, ODataDeltaDeletedEntry, ODataDeltaDeletedLink, ODataDeltaLink,
    ODataDeltaResourceSet, ODataError, ODataInstanceAnnotation, ODataItem,
    ODataNestedResourceInfo, ODataResource, ODataResourceSet, ODataResult, ResourceScopeData,
    ResourceTypeContext, Scope, ScopeData, ScopeStack, WriterSettings,
};
use odl_edm::{EdmModel, EdmNavigationSource, EdmStructuredType};
use odl_json::JsonWriter;
use serde_json::{json, Value};
use tracing::debug;

use crate::core::{source_root_path, ODataWriterCore, WriterTarget};
use crate::format::FormatWriter;
use crate::json_format::{write_navigation_link_annotations, JsonFormatWriter};
use crate::property::PropertySerializer;
use crate::state::DeltaWriterState;

// ---------------------------------------------------------------------------
// ExpandedNavigationPropertyWriter
// ---------------------------------------------------------------------------

/// Writes the expanded content of one navigation link of a delta entry by
/// driving an ordinary [`ODataWriterCore`].
///
/// The delta entry itself is already open in the JSON stream. Before the
/// first forwarded call the entry is replayed into the inner writer as its
/// top-level resource (the embedded format writes nothing for it), and it
/// is ended once the link that opened this writer is closed. Calls nested
/// below that link are counted so the closing call is recognised.
pub struct ExpandedNavigationPropertyWriter {
    inner: ODataWriterCore<JsonFormatWriter>,
    /// Delta entry still to be replayed.
    parent: Option<ODataResource>,
    level: usize,
}

impl ExpandedNavigationPropertyWriter {
    pub fn new(
        json: JsonWriter,
        settings: WriterSettings,
        model: Arc<dyn EdmModel>,
        target: WriterTarget,
        parent: ODataResource,
    ) -> ODataResult<Self> {
        let format = JsonFormatWriter::embedded(json, settings.clone(), model.clone());
        let inner = ODataWriterCore::new(format, settings, model, target, ExecutionMode::Synchronous)?
            .for_embedded_content();
        Ok(Self {
            inner,
            parent: Some(parent),
            level: 0,
        })
    }

    /// Open calls below the parent entry.
    pub fn level(&self) -> usize {
        self.level
    }

    fn enter(&mut self) -> ODataResult<()> {
        if let Some(parent) = self.parent.take() {
            self.inner.write_start_resource(parent)?;
        }
        self.level += 1;
        Ok(())
    }

    pub fn write_start_navigation_link(&mut self, link: ODataNestedResourceInfo) -> ODataResult<()> {
        self.enter()?;
        self.inner.write_start_navigation_link(link)
    }

    pub fn write_start_resource(&mut self, resource: ODataResource) -> ODataResult<()> {
        self.enter()?;
        self.inner.write_start_resource(resource)
    }

    pub fn write_start_null_resource(&mut self) -> ODataResult<()> {
        self.enter()?;
        self.inner.write_start_null_resource()
    }

    pub fn write_start_resource_set(&mut self, set: ODataResourceSet) -> ODataResult<()> {
        self.enter()?;
        self.inner.write_start_resource_set(set)
    }

    /// Returns `true` once the outermost link is closed and the replayed
    /// entry has been ended; the writer is then finished.
    pub fn write_end(&mut self) -> ODataResult<bool> {
        self.inner.write_end()?;
        self.level = self.level.saturating_sub(1);
        if self.level > 0 {
            return Ok(false);
        }
        self.inner.write_end()?;
        Ok(true)
    }

    pub fn buffered_len(&self) -> usize {
        self.inner.format().buffered_len()
    }

    pub fn flush(&mut self) -> ODataResult<()> {
        self.inner.format_mut().flush()
    }

    pub async fn flush_async(&mut self) -> ODataResult<()> {
        self.inner.format_mut().flush_async().await
    }

    pub fn into_json_writer(self) -> JsonWriter {
        self.inner.into_format().into_json_writer()
    }
}

// ---------------------------------------------------------------------------
// ODataDeltaWriter
// ---------------------------------------------------------------------------

/// Writer for delta responses.
///
/// The payload is one delta resource set holding a mixed sequence of
/// entries, deleted entries, links and deleted links, each carrying its own
/// `@odata.context`. Deleted entries and both link kinds are written in a
/// single call. Expanded navigation content of an entry is delegated to an
/// [`ExpandedNavigationPropertyWriter`] sharing the same JSON stream.
pub struct ODataDeltaWriter {
    json: JsonWriter,
    settings: WriterSettings,
    model: Arc<dyn EdmModel>,
    mode: ExecutionMode,
    scopes: ScopeStack<DeltaWriterState>,
    /// Holds the JSON stream while an entry's navigation link is open.
    expanded: Option<ExpandedNavigationPropertyWriter>,
    listener: Option<Listener>,
}

impl ODataDeltaWriter {
    /// `navigation_source` is the entity set the delta is computed for.
    pub fn new(
        json: JsonWriter,
        settings: WriterSettings,
        model: Arc<dyn EdmModel>,
        navigation_source: Option<&str>,
        mode: ExecutionMode,
    ) -> ODataResult<Self> {
        settings.validate()?;
        if !settings.is_response {
            return Err(ODataError::DeltaPayloadInRequest);
        }
        let source = match navigation_source {
            Some(name) if model.is_user_model() => Some(
                model
                    .find_navigation_source(name)
                    .ok_or_else(|| ODataError::UnknownNavigationSource(name.to_string()))?,
            ),
            Some(name) => Some(Arc::new(EdmNavigationSource::entity_set(name, ""))),
            None => None,
        };
        let resource_type = source
            .as_ref()
            .and_then(|s| model.find_type(&s.entity_type));

        let mut root = Scope::new(DeltaWriterState::Start);
        root.odata_path = source.as_deref().map(source_root_path).unwrap_or_default();
        root.navigation_source = source;
        root.resource_type = resource_type;

        Ok(Self {
            json,
            settings,
            model,
            mode,
            scopes: ScopeStack::new(root),
            expanded: None,
            listener: None,
        })
    }

    pub fn with_listener(mut self, listener: Listener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn state(&self) -> DeltaWriterState {
        self.scopes.current().state
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Item of the current scope; kept when the writer enters `Error`.
    pub fn current_item(&self) -> Option<&ODataItem> {
        self.scopes.current().item.as_ref()
    }

    /// Bytes held in memory; the whole payload for in-memory sinks.
    pub fn into_output(self) -> Vec<u8> {
        match self.expanded {
            Some(expanded) => expanded.into_json_writer().into_bytes(),
            None => self.json.into_bytes(),
        }
    }

    // ---- Synchronous API ----

    pub fn write_start_delta_resource_set(&mut self, set: ODataDeltaResourceSet) -> ODataResult<()> {
        self.verify_sync()?;
        self.intercept(|w| w.start_delta_resource_set(set))
    }

    /// A changed or added entry; inside an expanded navigation link, a
    /// nested resource.
    pub fn write_start_delta_resource(&mut self, resource: ODataResource) -> ODataResult<()> {
        self.verify_sync()?;
        self.intercept(|w| w.start_delta_resource(resource))
    }

    pub fn write_delta_deleted_entry(&mut self, entry: ODataDeltaDeletedEntry) -> ODataResult<()> {
        self.verify_sync()?;
        self.intercept(|w| w.deleted_entry(entry))
    }

    pub fn write_delta_link(&mut self, link: ODataDeltaLink) -> ODataResult<()> {
        self.verify_sync()?;
        self.intercept(|w| w.delta_link(link))
    }

    pub fn write_delta_deleted_link(&mut self, link: ODataDeltaDeletedLink) -> ODataResult<()> {
        self.verify_sync()?;
        self.intercept(|w| w.delta_deleted_link(link))
    }

    pub fn write_start_navigation_link(&mut self, link: ODataNestedResourceInfo) -> ODataResult<()> {
        self.verify_sync()?;
        self.intercept(|w| w.start_navigation_link(link))
    }

    /// Expanded resource set inside a navigation link.
    pub fn write_start_resource_set(&mut self, set: ODataResourceSet) -> ODataResult<()> {
        self.verify_sync()?;
        self.intercept(|w| w.start_expanded_resource_set(set))
    }

    pub fn write_end(&mut self) -> ODataResult<()> {
        self.verify_sync()?;
        self.intercept(|w| w.end())
    }

    pub fn flush(&mut self) -> ODataResult<()> {
        self.verify_sync()?;
        self.intercept(|w| match w.expanded.as_mut() {
            Some(expanded) => expanded.flush(),
            None => Ok(w.json.flush()?),
        })
    }

    // ---- Asynchronous API ----

    pub async fn write_start_delta_resource_set_async(
        &mut self,
        set: ODataDeltaResourceSet,
    ) -> ODataResult<()> {
        self.verify_async()?;
        self.intercept(|w| w.start_delta_resource_set(set))?;
        self.flush_when_buffer_full().await
    }

    pub async fn write_start_delta_resource_async(&mut self, resource: ODataResource) -> ODataResult<()> {
        self.verify_async()?;
        self.intercept(|w| w.start_delta_resource(resource))?;
        self.flush_when_buffer_full().await
    }

    pub async fn write_delta_deleted_entry_async(
        &mut self,
        entry: ODataDeltaDeletedEntry,
    ) -> ODataResult<()> {
        self.verify_async()?;
        self.intercept(|w| w.deleted_entry(entry))?;
        self.flush_when_buffer_full().await
    }

    pub async fn write_delta_link_async(&mut self, link: ODataDeltaLink) -> ODataResult<()> {
        self.verify_async()?;
        self.intercept(|w| w.delta_link(link))?;
        self.flush_when_buffer_full().await
    }

    pub async fn write_delta_deleted_link_async(&mut self, link: ODataDeltaDeletedLink) -> ODataResult<()> {
        self.verify_async()?;
        self.intercept(|w| w.delta_deleted_link(link))?;
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

    pub async fn write_start_resource_set_async(&mut self, set: ODataResourceSet) -> ODataResult<()> {
        self.verify_async()?;
        self.intercept(|w| w.start_expanded_resource_set(set))?;
        self.flush_when_buffer_full().await
    }

    pub async fn write_end_async(&mut self) -> ODataResult<()> {
        self.verify_async()?;
        self.intercept(|w| w.end())?;
        if self.state() == DeltaWriterState::Completed {
            return self.flush_output_async().await;
        }
        self.flush_when_buffer_full().await
    }

    pub async fn flush_async(&mut self) -> ODataResult<()> {
        self.verify_async()?;
        self.flush_output_async().await
    }

    fn buffered_len(&self) -> usize {
        match &self.expanded {
            Some(expanded) => expanded.buffered_len(),
            None => self.json.buffered_len(),
        }
    }

    async fn flush_when_buffer_full(&mut self) -> ODataResult<()> {
        if self.buffered_len() < self.settings.buffer_size {
            return Ok(());
        }
        self.flush_output_async().await
    }

    async fn flush_output_async(&mut self) -> ODataResult<()> {
        let result = match self.expanded.as_mut() {
            Some(expanded) => expanded.flush_async().await,
            None => self.json.flush_async().await.map_err(ODataError::from),
        };
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

    fn intercept(&mut self, action: impl FnOnce(&mut Self) -> ODataResult<()>) -> ODataResult<()> {
        let result = action(self);
        if let Err(e) = &result {
            self.enter_error_state(e);
        }
        result
    }

    fn enter_error_state(&mut self, error: &ODataError) {
        let from = self.state();
        if from == DeltaWriterState::Error {
            return;
        }
        let item = self.scopes.current().item.clone();
        let mut scope = Scope::new(DeltaWriterState::Error).with_item(item);
        scope.skip_writing = true;
        self.scopes.push(scope);
        debug!(from = %from, error = %error, "delta writer entered error state");
        notify(
            &mut self.listener,
            ListenerEvent::Exception {
                message: error.to_string(),
            },
        );
    }

    fn validate_transition(&self, to: DeltaWriterState) -> ODataResult<()> {
        use DeltaWriterState as S;
        let from = self.state();
        let legal = match (from, to) {
            (_, S::Error) => true,
            (S::Error, _) => {
                return Err(ODataError::InvalidTransitionFromError { to: to.to_string() })
            }
            (S::Completed, _) => {
                return Err(ODataError::InvalidTransitionFromCompleted { to: to.to_string() })
            }
            (S::Start, S::DeltaFeed) => true,
            (
                S::DeltaFeed,
                S::DeltaEntry | S::DeltaDeletedEntry | S::DeltaLink | S::DeltaDeletedLink,
            ) => true,
            (S::DeltaEntry, S::ExpandedNavigationProperty) => true,
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

    fn push_scope(&mut self, scope: Scope<DeltaWriterState>) {
        debug!(from = %self.state(), to = %scope.state, "delta writer transition");
        self.scopes.push(scope);
    }

    fn leave_scope(&mut self) {
        let Some(left) = self.scopes.pop() else {
            return;
        };
        debug!(from = %left.state, to = %self.state(), "delta writer transition");
        if self.scopes.len() == 1 && self.state() == DeltaWriterState::Start {
            self.scopes
                .replace_root(Scope::new(DeltaWriterState::Completed).with_item(left.item));
            debug!("delta payload completed");
            notify(&mut self.listener, ListenerEvent::Completed);
        }
    }

    /// Expanded content goes to the nested writer; everything else is a
    /// transition error in that state.
    fn expanded_mut(&mut self, to: &str) -> ODataResult<&mut ExpandedNavigationPropertyWriter> {
        let from = self.state();
        if from == DeltaWriterState::Error {
            return Err(ODataError::InvalidTransitionFromError { to: to.into() });
        }
        if from == DeltaWriterState::Completed {
            return Err(ODataError::InvalidTransitionFromCompleted { to: to.into() });
        }
        match self.expanded.as_mut() {
            Some(expanded) if from == DeltaWriterState::ExpandedNavigationProperty => Ok(expanded),
            _ => Err(ODataError::InvalidTransition {
                from: from.to_string(),
                to: to.into(),
            }),
        }
    }

    fn context_url(&self, source: Option<&str>, kind: ContextUrlKind) -> Option<String> {
        if self.settings.metadata_level == MetadataLevel::None {
            return None;
        }
        let metadata = self.settings.metadata_document_uri()?;
        let source = match source {
            Some(name) => name.to_string(),
            None => self.scopes.root().navigation_source.as_deref()?.name.clone(),
        };
        Some(ContextUrlInfo::new(source, kind).build(&metadata))
    }

    fn write_annotation(&mut self, name: &str, value: Value) -> ODataResult<()> {
        self.json.write_property(&instance_annotation(name), &value)?;
        Ok(())
    }

    fn write_instance_annotations(
        &mut self,
        annotations: &[ODataInstanceAnnotation],
        tracker: &mut InstanceAnnotationWriteTracker,
    ) -> ODataResult<()> {
        for annotation in annotations {
            if tracker.mark_written(&annotation.name) {
                self.write_annotation(&annotation.name, annotation.value.to_json())?;
            }
        }
        Ok(())
    }

    // ---- Delta resource set ----

    fn start_delta_resource_set(&mut self, set: ODataDeltaResourceSet) -> ODataResult<()> {
        self.validate_transition(DeltaWriterState::DeltaFeed)?;
        let source = set
            .serialization_info
            .as_ref()
            .map(|info| info.navigation_source_name.clone());
        let context_url = self.context_url(source.as_deref(), ContextUrlKind::Delta);

        self.json.start_object_scope()?;
        if let Some(url) = context_url {
            self.write_annotation(ODATA_CONTEXT, Value::String(url))?;
        }
        if let Some(count) = set.count {
            self.write_annotation(ODATA_COUNT, json!(count))?;
        }
        let mut tracker = InstanceAnnotationWriteTracker::default();
        self.write_instance_annotations(&set.instance_annotations, &mut tracker)?;
        self.json.write_name(VALUE_PROPERTY)?;
        self.json.start_array_scope()?;

        let root = self.scopes.current();
        let mut scope = Scope::new(DeltaWriterState::DeltaFeed)
            .with_item(Some(ODataItem::DeltaResourceSet(set)));
        scope.navigation_source = root.navigation_source.clone();
        scope.resource_type = root.resource_type.clone();
        scope.odata_path = root.odata_path.clone();
        self.push_scope(scope);
        Ok(())
    }

    fn end_delta_resource_set(&mut self) -> ODataResult<()> {
        self.json.end_array_scope()?;
        let scope = self.scopes.current();
        let (next, delta) = match &scope.item {
            Some(ODataItem::DeltaResourceSet(set)) => {
                (set.next_page_link.clone(), set.delta_link.clone())
            }
            _ => (None, None),
        };
        if let Some(link) = next {
            self.write_annotation(ODATA_NEXT_LINK, Value::String(link))?;
        }
        if let Some(link) = delta {
            self.write_annotation(ODATA_DELTA_LINK, Value::String(link))?;
        }
        self.json.end_object_scope()?;
        Ok(())
    }

    // ---- Delta entries ----

    /// Explicit type name first, then the serialization info's navigation
    /// source, then the delta feed's type.
    fn resolve_entry_type(
        &self,
        resource: &ODataResource,
    ) -> ODataResult<Option<Arc<EdmStructuredType>>> {
        if resource.type_name.is_some() {
            return resolve_resource_type(self.model.as_ref(), None, resource.type_name.as_deref());
        }
        if let Some(info) = &resource.serialization_info {
            let from_source = self
                .model
                .find_navigation_source(&info.navigation_source_name)
                .and_then(|s| self.model.find_type(&s.entity_type))
                .or_else(|| self.model.find_type(&info.navigation_source_entity_type_name));
            if from_source.is_some() {
                return Ok(from_source);
            }
        }
        Ok(self.scopes.current().resource_type.clone())
    }

    fn start_delta_resource(&mut self, resource: ODataResource) -> ODataResult<()> {
        if self.state() == DeltaWriterState::ExpandedNavigationProperty {
            return self.expanded_mut("Resource")?.write_start_resource(resource);
        }
        self.validate_transition(DeltaWriterState::DeltaEntry)?;
        let resource_type = self.resolve_entry_type(&resource)?;
        let mut checker = DuplicatePropertyNamesChecker::new(true);
        for property in &resource.properties {
            checker.check_property(&property.name)?;
        }

        let feed = self.scopes.current();
        let navigation_source = match &resource.serialization_info {
            Some(info) => self
                .model
                .find_navigation_source(&info.navigation_source_name)
                .or_else(|| Some(Arc::new(EdmNavigationSource::entity_set(
                    info.navigation_source_name.as_str(),
                    info.navigation_source_entity_type_name.as_str(),
                )))),
            None => feed.navigation_source.clone(),
        };
        let source_path = navigation_source
            .as_deref()
            .map(source_root_path)
            .unwrap_or_default();
        let type_context = ResourceTypeContext::create(
            resource.serialization_info.as_ref(),
            navigation_source.as_deref(),
            resource_type.as_deref(),
            true,
        );
        let builder = create_metadata_builder(
            self.model.as_ref(),
            MetadataBuilderInput {
                service_root: self.settings.service_root.as_deref(),
                resource: &resource,
                resource_type: resource_type.as_deref(),
                source_path: &source_path,
                type_context: &type_context,
                selected: &feed.selected_properties,
                key_as_segment: self.settings.key_as_segment,
            },
        );
        let level = self.settings.metadata_level;
        // Minimal metadata omits the type when the entry's own set implies it.
        let expected_type_name = match &resource.serialization_info {
            Some(_) => navigation_source
                .as_deref()
                .map(|s| s.entity_type.clone())
                .filter(|n| !n.is_empty()),
            None => feed.resource_type_name().map(str::to_string),
        };
        let actual_type_name = resource_type.as_ref().map(|t| t.full_name.clone());
        let type_name = match level {
            MetadataLevel::None => None,
            MetadataLevel::Full => actual_type_name,
            MetadataLevel::Minimal => actual_type_name.filter(|n| Some(n) != expected_type_name.as_ref()),
        };
        let id = match level {
            MetadataLevel::None => None,
            _ => resource.id.clone().or_else(|| builder.id()),
        };
        let context_url = self.context_url(
            navigation_source.as_deref().map(|s| s.name.as_str()),
            ContextUrlKind::Resource,
        );

        self.json.start_object_scope()?;
        if let Some(url) = context_url {
            self.write_annotation(ODATA_CONTEXT, Value::String(url))?;
        }
        if let Some(id) = id {
            self.write_annotation(ODATA_ID, Value::String(id))?;
        }
        if level != MetadataLevel::None {
            if let Some(etag) = &resource.etag {
                self.write_annotation(ODATA_ETAG, Value::String(etag.clone()))?;
            }
        }
        if let Some(type_name) = type_name {
            self.write_annotation(ODATA_TYPE, Value::String(format!("#{type_name}")))?;
        }
        let mut data = ResourceScopeData::new(checker);
        self.write_instance_annotations(&resource.instance_annotations, &mut data.annotation_tracker)?;
        PropertySerializer::new(self.model.as_ref(), &self.settings).write_properties(
            &mut self.json,
            resource_type.as_deref(),
            &resource.properties,
        )?;

        data.type_context = Some(type_context);
        data.metadata_builder = Some(builder);
        let mut scope = Scope::new(DeltaWriterState::DeltaEntry)
            .with_item(Some(ODataItem::Resource(resource)))
            .with_data(ScopeData::Resource(data));
        scope.navigation_source = navigation_source;
        scope.resource_type = resource_type;
        scope.odata_path = source_path;
        self.push_scope(scope);
        Ok(())
    }

    /// Projected links the caller never wrote, then annotations added since
    /// the entry started.
    fn end_delta_resource(&mut self) -> ODataResult<()> {
        let full = self.settings.metadata_level == MetadataLevel::Full;
        let Self { scopes, json, .. } = self;
        let Scope { item, data, .. } = scopes.current_mut();
        let (Some(ODataItem::Resource(resource)), ScopeData::Resource(data)) = (item, data) else {
            return Ok(());
        };
        if full {
            if let Some(builder) = data.metadata_builder.as_mut() {
                while let Some(mut link) = builder.next_unprocessed_navigation_link() {
                    link.url = link.url.or_else(|| builder.navigation_link(&link.name));
                    link.association_link_url = link
                        .association_link_url
                        .or_else(|| builder.association_link(&link.name));
                    write_navigation_link_annotations(json, &link)?;
                }
            }
        }
        for annotation in &resource.instance_annotations {
            if data.annotation_tracker.mark_written(&annotation.name) {
                json.write_property(&instance_annotation(&annotation.name), &annotation.value.to_json())?;
            }
        }
        json.end_object_scope()?;
        Ok(())
    }

    // ---- Single-shot items ----

    fn write_single(
        &mut self,
        state: DeltaWriterState,
        item: ODataItem,
        context_url: Option<String>,
        members: &[(&str, Value)],
    ) -> ODataResult<()> {
        self.validate_transition(state)?;
        self.push_scope(Scope::new(state).with_item(Some(item)));
        self.json.start_object_scope()?;
        if let Some(url) = context_url {
            self.write_annotation(ODATA_CONTEXT, Value::String(url))?;
        }
        for (name, value) in members {
            self.json.write_property(name, value)?;
        }
        self.json.end_object_scope()?;
        self.leave_scope();
        Ok(())
    }

    fn deleted_entry(&mut self, entry: ODataDeltaDeletedEntry) -> ODataResult<()> {
        let source = entry
            .serialization_info
            .as_ref()
            .map(|info| info.navigation_source_name.clone());
        let context_url = self.context_url(source.as_deref(), ContextUrlKind::DeletedEntry);
        let members = [
            (DELTA_ID_PROPERTY, json!(entry.id)),
            (DELTA_REASON_PROPERTY, json!(entry.reason.as_str())),
        ];
        self.write_single(
            DeltaWriterState::DeltaDeletedEntry,
            ODataItem::DeltaDeletedEntry(entry),
            context_url,
            &members,
        )
    }

    fn delta_link(&mut self, link: ODataDeltaLink) -> ODataResult<()> {
        let source = link
            .serialization_info
            .as_ref()
            .map(|info| info.navigation_source_name.clone());
        let context_url = self.context_url(source.as_deref(), ContextUrlKind::Link);
        let members = link_members(&link.source, &link.relationship, &link.target);
        self.write_single(
            DeltaWriterState::DeltaLink,
            ODataItem::DeltaLink(link),
            context_url,
            &members,
        )
    }

    fn delta_deleted_link(&mut self, link: ODataDeltaDeletedLink) -> ODataResult<()> {
        let source = link
            .serialization_info
            .as_ref()
            .map(|info| info.navigation_source_name.clone());
        let context_url = self.context_url(source.as_deref(), ContextUrlKind::DeletedLink);
        let members = link_members(&link.source, &link.relationship, &link.target);
        self.write_single(
            DeltaWriterState::DeltaDeletedLink,
            ODataItem::DeltaDeletedLink(link),
            context_url,
            &members,
        )
    }

    // ---- Expanded navigation properties ----

    fn start_navigation_link(&mut self, link: ODataNestedResourceInfo) -> ODataResult<()> {
        if self.state() == DeltaWriterState::ExpandedNavigationProperty {
            return self
                .expanded_mut("NavigationLink")?
                .write_start_navigation_link(link);
        }
        self.validate_transition(DeltaWriterState::ExpandedNavigationProperty)?;

        let entry = self.scopes.current_mut();
        let Some(parent) = entry.item.as_ref().and_then(ODataItem::as_resource).cloned() else {
            return Err(ODataError::InvalidTransition {
                from: entry.state.to_string(),
                to: DeltaWriterState::ExpandedNavigationProperty.to_string(),
            });
        };
        if let Some(data) = entry.data.as_resource_mut() {
            data.duplicate_checker.check_navigation_link(
                &link.name,
                NavigationLinkUse::Expanded,
                link.is_collection,
            )?;
            if let Some(builder) = data.metadata_builder.as_mut() {
                builder.mark_navigation_link_processed(&link.name);
            }
        }
        let target = WriterTarget {
            writing_resource_set: false,
            navigation_source: entry.navigation_source.as_deref().map(|s| s.name.clone()),
            resource_type: entry.resource_type_name().map(str::to_string),
        };

        let json = mem::replace(&mut self.json, JsonWriter::in_memory());
        let expanded = ExpandedNavigationPropertyWriter::new(
            json,
            self.settings.clone(),
            self.model.clone(),
            target,
            parent,
        )?;
        self.push_scope(Scope::new(DeltaWriterState::ExpandedNavigationProperty));
        self.expanded
            .insert(expanded)
            .write_start_navigation_link(link)
    }

    fn start_expanded_resource_set(&mut self, set: ODataResourceSet) -> ODataResult<()> {
        self.expanded_mut("ResourceSet")?.write_start_resource_set(set)
    }

    fn end_expanded(&mut self) -> ODataResult<()> {
        let done = self.expanded_mut("End")?.write_end()?;
        if done {
            if let Some(expanded) = self.expanded.take() {
                self.json = expanded.into_json_writer();
            }
            self.leave_scope();
        }
        Ok(())
    }

    fn end(&mut self) -> ODataResult<()> {
        use DeltaWriterState as S;
        match self.state() {
            S::ExpandedNavigationProperty => return self.end_expanded(),
            S::DeltaEntry => self.end_delta_resource()?,
            S::DeltaFeed => self.end_delta_resource_set()?,
            S::Completed => {
                return Err(ODataError::InvalidTransitionFromCompleted { to: "End".into() })
            }
            S::Error => return Err(ODataError::InvalidTransitionFromError { to: "End".into() }),
            state => return Err(ODataError::WriteEndInInvalidState(state.to_string())),
        }
        self.leave_scope();
        if self.state() == S::Completed && self.mode == ExecutionMode::Synchronous {
            self.json.flush()?;
        }
        Ok(())
    }
}

fn link_members(source: &str, relationship: &str, target: &str) -> [(&'static str, Value); 3] {
    [
        (DELTA_SOURCE_PROPERTY, json!(source)),
        (DELTA_RELATIONSHIP_PROPERTY, json!(relationship)),
        (DELTA_TARGET_PROPERTY, json!(target)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use odl_core::{ContextUrlParser, DeltaDeletedEntryReason};
    use odl_edm::{EdmNavigationProperty, EdmPrimitiveKind, EdmProperty, EdmTypeRef, InMemoryModel};

    fn model() -> Arc<dyn EdmModel> {
        Arc::new(
            InMemoryModel::builder()
                .add_type(
                    EdmStructuredType::entity("NS.Person")
                        .with_key("Id")
                        .with_property(EdmProperty::new(
                            "Id",
                            EdmTypeRef::Primitive(EdmPrimitiveKind::String),
                        ))
                        .with_navigation(EdmNavigationProperty::collection("Friends", "NS.Person")),
                )
                .add_source(EdmNavigationSource::entity_set("People", "NS.Person").with_binding("Friends", "People"))
                .build()
                .unwrap(),
        )
    }

    fn writer() -> ODataDeltaWriter {
        ODataDeltaWriter::new(
            JsonWriter::in_memory(),
            WriterSettings::response().with_service_root("http://host/svc"),
            model(),
            Some("People"),
            ExecutionMode::Synchronous,
        )
        .unwrap()
    }

    fn kind_of(item: &Value) -> &'static str {
        let url = item["@odata.context"].as_str().unwrap();
        ContextUrlParser::new().parse(url).unwrap().kind.as_str()
    }

    #[test]
    fn items_carry_their_own_context_kind_in_order() {
        let mut w = writer();
        w.write_start_delta_resource_set(ODataDeltaResourceSet::default())
            .unwrap();
        w.write_start_delta_resource(ODataResource::new().with_property("Id", "A"))
            .unwrap();
        w.write_end().unwrap();
        w.write_delta_deleted_link(ODataDeltaDeletedLink::new("People('A')", "People('B')", "Friends"))
            .unwrap();
        w.write_end().unwrap();
        assert_eq!(w.state(), DeltaWriterState::Completed);

        let payload: Value = serde_json::from_slice(&w.into_output()).unwrap();
        assert_eq!(kind_of(&payload), "Delta");
        let items = payload["value"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(kind_of(&items[0]), "Resource");
        assert_eq!(items[0]["Id"], "A");
        assert_eq!(items[0]["@odata.id"], "http://host/svc/People('A')");
        assert_eq!(kind_of(&items[1]), "DeletedLink");
        assert_eq!(items[1]["source"], "People('A')");
        assert_eq!(items[1]["relationship"], "Friends");
        assert_eq!(items[1]["target"], "People('B')");
    }

    #[test]
    fn deleted_entries_and_links_are_single_shot() {
        let mut w = writer();
        w.write_start_delta_resource_set(ODataDeltaResourceSet::default())
            .unwrap();
        w.write_delta_deleted_entry(ODataDeltaDeletedEntry::new(
            "People('C')",
            DeltaDeletedEntryReason::Changed,
        ))
        .unwrap();
        assert_eq!(w.state(), DeltaWriterState::DeltaFeed);
        w.write_delta_link(ODataDeltaLink::new("People('A')", "People('C')", "Friends"))
            .unwrap();
        assert_eq!(w.state(), DeltaWriterState::DeltaFeed);
        w.write_end().unwrap();

        let payload: Value = serde_json::from_slice(&w.into_output()).unwrap();
        let items = payload["value"].as_array().unwrap();
        assert_eq!(kind_of(&items[0]), "DeletedEntry");
        assert_eq!(items[0]["id"], "People('C')");
        assert_eq!(items[0]["reason"], "changed");
        assert_eq!(kind_of(&items[1]), "Link");
    }

    #[test]
    fn expanded_content_reuses_the_resource_writer() {
        let mut w = writer();
        w.write_start_delta_resource_set(ODataDeltaResourceSet::default())
            .unwrap();
        w.write_start_delta_resource(ODataResource::new().with_property("Id", "A"))
            .unwrap();
        w.write_start_navigation_link(ODataNestedResourceInfo::collection("Friends"))
            .unwrap();
        assert_eq!(w.state(), DeltaWriterState::ExpandedNavigationProperty);
        w.write_start_resource_set(ODataResourceSet::new()).unwrap();
        w.write_start_delta_resource(ODataResource::new().with_property("Id", "B"))
            .unwrap();
        w.write_end().unwrap();
        w.write_end().unwrap();
        assert_eq!(w.state(), DeltaWriterState::ExpandedNavigationProperty);
        w.write_end().unwrap();
        assert_eq!(w.state(), DeltaWriterState::DeltaEntry);
        w.write_end().unwrap();
        w.write_end().unwrap();
        assert_eq!(w.state(), DeltaWriterState::Completed);

        let payload: Value = serde_json::from_slice(&w.into_output()).unwrap();
        let entry = &payload["value"][0];
        assert_eq!(entry["Id"], "A");
        assert_eq!(entry["Friends"][0]["Id"], "B");
        assert_eq!(entry["Friends"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn entry_type_prefers_explicit_then_serialization_info_then_feed() {
        let model = Arc::new(
            InMemoryModel::builder()
                .add_type(EdmStructuredType::entity("NS.Person").with_key("Id"))
                .add_type(EdmStructuredType::entity("NS.Vip").with_base("NS.Person"))
                .add_type(EdmStructuredType::entity("NS.Order").with_key("Id"))
                .add_source(EdmNavigationSource::entity_set("People", "NS.Person"))
                .add_source(EdmNavigationSource::entity_set("Orders", "NS.Order"))
                .build()
                .unwrap(),
        );
        let w = ODataDeltaWriter::new(
            JsonWriter::in_memory(),
            WriterSettings::response(),
            model,
            Some("People"),
            ExecutionMode::Synchronous,
        )
        .unwrap();
        let name = |r: &ODataResource| {
            w.resolve_entry_type(r)
                .unwrap()
                .map(|t| t.full_name.clone())
        };

        let explicit = ODataResource::typed("NS.Vip")
            .with_serialization_info(odl_core::ResourceSerializationInfo::entity_set("Orders", "NS.Order"));
        assert_eq!(name(&explicit).as_deref(), Some("NS.Vip"));
        let from_info = ODataResource::new()
            .with_serialization_info(odl_core::ResourceSerializationInfo::entity_set("Orders", "NS.Order"));
        assert_eq!(name(&from_info).as_deref(), Some("NS.Order"));
        assert_eq!(name(&ODataResource::new()).as_deref(), Some("NS.Person"));
    }

    #[test]
    fn minimal_metadata_compares_against_the_entry_set_type() {
        let model = Arc::new(
            InMemoryModel::builder()
                .add_type(EdmStructuredType::entity("NS.Person").with_key("Id"))
                .add_type(EdmStructuredType::entity("NS.Vip").with_base("NS.Person"))
                .add_type(EdmStructuredType::entity("NS.Order").with_key("Id"))
                .add_source(EdmNavigationSource::entity_set("People", "NS.Person"))
                .add_source(EdmNavigationSource::entity_set("Orders", "NS.Order"))
                .build()
                .unwrap(),
        );
        let mut w = ODataDeltaWriter::new(
            JsonWriter::in_memory(),
            WriterSettings::response().with_service_root("http://host/svc"),
            model,
            Some("People"),
            ExecutionMode::Synchronous,
        )
        .unwrap();
        w.write_start_delta_resource_set(ODataDeltaResourceSet::default())
            .unwrap();
        let order = ODataResource::new()
            .with_serialization_info(odl_core::ResourceSerializationInfo::entity_set("Orders", "NS.Order"));
        w.write_start_delta_resource(order).unwrap();
        w.write_end().unwrap();
        let vip = ODataResource::typed("NS.Vip")
            .with_serialization_info(odl_core::ResourceSerializationInfo::entity_set("People", "NS.Person"));
        w.write_start_delta_resource(vip).unwrap();
        w.write_end().unwrap();
        w.write_end().unwrap();

        let payload: Value = serde_json::from_slice(&w.into_output()).unwrap();
        let items = payload["value"].as_array().unwrap();
        assert!(items[0].get("@odata.type").is_none());
        assert_eq!(items[1]["@odata.type"], "#NS.Vip");
    }

    #[test]
    fn entry_rejects_the_same_navigation_link_twice() {
        let mut w = writer();
        w.write_start_delta_resource_set(ODataDeltaResourceSet::default())
            .unwrap();
        w.write_start_delta_resource(ODataResource::new().with_property("Id", "A"))
            .unwrap();
        w.write_start_navigation_link(ODataNestedResourceInfo::collection("Friends"))
            .unwrap();
        w.write_start_resource_set(ODataResourceSet::new()).unwrap();
        w.write_end().unwrap();
        w.write_end().unwrap();
        assert_eq!(w.state(), DeltaWriterState::DeltaEntry);
        assert!(matches!(
            w.write_start_navigation_link(ODataNestedResourceInfo::collection("Friends")),
            Err(ODataError::DuplicatePropertyName(name)) if name == "Friends"
        ));

        let mut w = writer();
        w.write_start_delta_resource_set(ODataDeltaResourceSet::default())
            .unwrap();
        w.write_start_delta_resource(ODataResource::new().with_property("Id", "A"))
            .unwrap();
        assert!(matches!(
            w.write_start_navigation_link(ODataNestedResourceInfo::collection("Id")),
            Err(ODataError::DuplicatePropertyName(_))
        ));
    }

    #[test]
    fn error_state_keeps_the_failing_item() {
        let mut w = writer();
        w.write_start_delta_resource_set(ODataDeltaResourceSet::default())
            .unwrap();
        w.write_start_delta_resource(ODataResource::new().with_property("Id", "A"))
            .unwrap();
        assert!(w.write_delta_link(ODataDeltaLink::new("People('A')", "People('B')", "Friends")).is_err());
        assert_eq!(w.state(), DeltaWriterState::Error);
        let Some(ODataItem::Resource(resource)) = w.current_item() else {
            panic!("expected the open entry, got {:?}", w.current_item());
        };
        assert_eq!(resource.properties[0].name, "Id");
    }

    #[test]
    fn delta_structure_is_enforced() {
        let mut w = writer();
        assert!(matches!(
            w.write_start_delta_resource(ODataResource::new()),
            Err(ODataError::InvalidTransition { .. })
        ));
        assert_eq!(w.state(), DeltaWriterState::Error);

        let mut w = writer();
        w.write_start_delta_resource_set(ODataDeltaResourceSet::default())
            .unwrap();
        assert!(matches!(
            w.write_start_resource_set(ODataResourceSet::new()),
            Err(ODataError::InvalidTransition { from, .. }) if from == "DeltaResourceSet"
        ));

        let request = ODataDeltaWriter::new(
            JsonWriter::in_memory(),
            WriterSettings::request(),
            model(),
            Some("People"),
            ExecutionMode::Synchronous,
        );
        assert!(matches!(request, Err(ODataError::DeltaPayloadInRequest)));
    }

    #[tokio::test]
    async fn async_delta_matches_sync_output() {
        let mut sync = writer();
        sync.write_start_delta_resource_set(ODataDeltaResourceSet::default())
            .unwrap();
        sync.write_delta_deleted_entry(ODataDeltaDeletedEntry::new(
            "People('C')",
            DeltaDeletedEntryReason::Deleted,
        ))
        .unwrap();
        sync.write_end().unwrap();

        let mut w = ODataDeltaWriter::new(
            JsonWriter::in_memory(),
            WriterSettings::response().with_service_root("http://host/svc"),
            model(),
            Some("People"),
            ExecutionMode::Asynchronous,
        )
        .unwrap();
        w.write_start_delta_resource_set_async(ODataDeltaResourceSet::default())
            .await
            .unwrap();
        w.write_delta_deleted_entry_async(ODataDeltaDeletedEntry::new(
            "People('C')",
            DeltaDeletedEntryReason::Deleted,
        ))
        .await
        .unwrap();
        w.write_end_async().await.unwrap();
        assert_eq!(w.into_output(), sync.into_output());
    }
}
