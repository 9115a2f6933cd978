use std::sync::Arc;

use async_trait::async_trait;
use odl_core::annotations::{
    instance_annotation, property_annotation, ERROR_PROPERTY, ODATA_ASSOCIATION_LINK, ODATA_BIND,
    ODATA_CONTEXT, ODATA_COUNT, ODATA_DELTA_LINK, ODATA_EDIT_LINK, ODATA_ETAG, ODATA_ID,
    ODATA_MEDIA_CONTENT_TYPE, ODATA_MEDIA_EDIT_LINK, ODATA_MEDIA_ETAG, ODATA_MEDIA_READ_LINK,
    ODATA_NAVIGATION_LINK, ODATA_NEXT_LINK, ODATA_READ_LINK, ODATA_TYPE, VALUE_PROPERTY,
};
use odl_core::{
    InstanceAnnotationWriteTracker, MetadataLevel, MetadataProperty, ODataEntityReferenceLink,
    ODataInStreamError, ODataInstanceAnnotation, ODataNestedResourceInfo, ODataResource,
    ODataResourceSet, ODataResult, WriterSettings,
};
use odl_edm::EdmModel;
use odl_json::JsonWriter;
use serde_json::{json, Value};

use crate::format::{FormatWriter, ParentKind, ResourceContext, ResourceSetContext};
use crate::property::PropertySerializer;

/// Open navigation link with content.
#[derive(Debug)]
struct LinkFrame {
    name: String,
    is_collection: bool,
    /// `Name@odata.bind` array is open.
    bind_open: bool,
    /// `Name` array opened for resources written without a set.
    value_open: bool,
}

/// [`FormatWriter`] producing OData JSON.
///
/// Resource sets are written as `{"@odata.context":…,"value":[…]}` at the
/// top level and as a plain array inside a navigation link. Annotations of
/// an expanded set are attached to the link name (`Orders@odata.count`).
pub struct JsonFormatWriter {
    json: JsonWriter,
    settings: WriterSettings,
    model: Arc<dyn EdmModel>,
    links: Vec<LinkFrame>,
    /// The top-level resource was already written by an enclosing writer;
    /// only its navigation links are produced here.
    embedded: bool,
}

impl JsonFormatWriter {
    pub fn new(json: JsonWriter, settings: WriterSettings, model: Arc<dyn EdmModel>) -> Self {
        Self {
            json,
            settings,
            model,
            links: Vec::new(),
            embedded: false,
        }
    }

    /// Writer for the expanded content of a resource whose object is
    /// already open in `json`.
    pub fn embedded(json: JsonWriter, settings: WriterSettings, model: Arc<dyn EdmModel>) -> Self {
        Self {
            embedded: true,
            ..Self::new(json, settings, model)
        }
    }

    pub fn json(&self) -> &JsonWriter {
        &self.json
    }

    pub fn into_json_writer(self) -> JsonWriter {
        self.json
    }

    fn writes_metadata(&self) -> bool {
        self.settings.metadata_level != MetadataLevel::None
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
                self.json
                    .write_property(&instance_annotation(&annotation.name), &annotation.value.to_json())?;
            }
        }
        Ok(())
    }

    /// Close a pending bind array and open the link's value, if needed,
    /// before expanded content.
    fn before_link_content(&mut self, is_set: bool) -> ODataResult<()> {
        let Some(frame) = self.links.last_mut() else {
            return Ok(());
        };
        if frame.bind_open {
            self.json.end_array_scope()?;
            frame.bind_open = false;
        }
        if is_set || frame.value_open {
            return Ok(());
        }
        self.json.write_name(&frame.name)?;
        if frame.is_collection {
            self.json.start_array_scope()?;
            frame.value_open = true;
        }
        Ok(())
    }

    fn write_resource_metadata(
        &mut self,
        resource: &ODataResource,
        ctx: &mut ResourceContext<'_>,
    ) -> ODataResult<()> {
        if let Some(url) = ctx.context_url.take() {
            self.write_annotation(ODATA_CONTEXT, Value::String(url))?;
        }
        if let Some(id) = ctx.id.take() {
            self.write_annotation(ODATA_ID, Value::String(id))?;
        }
        if !self.writes_metadata() {
            return Ok(());
        }
        if let Some(etag) = &resource.etag {
            self.write_annotation(ODATA_ETAG, Value::String(etag.clone()))?;
        }
        if let Some(type_name) = ctx.type_name.take() {
            self.write_annotation(ODATA_TYPE, Value::String(format!("#{type_name}")))?;
        }
        if let Some(link) = ctx.edit_link.take() {
            self.write_annotation(ODATA_EDIT_LINK, Value::String(link))?;
            ctx.written_metadata.mark_edit_link_written();
        }
        if let Some(link) = ctx.read_link.take() {
            self.write_annotation(ODATA_READ_LINK, Value::String(link))?;
            ctx.written_metadata.mark_read_link_written();
        }
        if let Some(media) = &resource.media_resource {
            let entries = [
                (MetadataProperty::MediaEditLink, ODATA_MEDIA_EDIT_LINK, &media.edit_link),
                (MetadataProperty::MediaReadLink, ODATA_MEDIA_READ_LINK, &media.read_link),
                (MetadataProperty::MediaContentType, ODATA_MEDIA_CONTENT_TYPE, &media.content_type),
                (MetadataProperty::MediaETag, ODATA_MEDIA_ETAG, &media.etag),
            ];
            for (property, name, value) in entries {
                if let Some(value) = value {
                    self.write_annotation(name, Value::String(value.clone()))?;
                    ctx.written_metadata.mark(property);
                }
            }
        }
        Ok(())
    }
}

/// `Name@odata.associationLink` and `Name@odata.navigationLink` of a
/// deferred link.
pub(crate) fn write_navigation_link_annotations(
    json: &mut JsonWriter,
    link: &ODataNestedResourceInfo,
) -> ODataResult<()> {
    if let Some(url) = &link.association_link_url {
        json.write_property(
            &property_annotation(&link.name, ODATA_ASSOCIATION_LINK),
            &json!(url),
        )?;
    }
    if let Some(url) = &link.url {
        json.write_property(
            &property_annotation(&link.name, ODATA_NAVIGATION_LINK),
            &json!(url),
        )?;
    }
    Ok(())
}

#[async_trait]
impl FormatWriter for JsonFormatWriter {
    fn start_resource(
        &mut self,
        resource: Option<&ODataResource>,
        ctx: &mut ResourceContext<'_>,
    ) -> ODataResult<()> {
        if ctx.parent == ParentKind::TopLevel && self.embedded {
            return Ok(());
        }
        if ctx.parent == ParentKind::NavigationLink {
            self.before_link_content(false)?;
        }
        let Some(resource) = resource else {
            self.json.write_null()?;
            return Ok(());
        };
        self.json.start_object_scope()?;
        self.write_resource_metadata(resource, ctx)?;
        self.write_instance_annotations(&resource.instance_annotations, ctx.annotations)?;
        PropertySerializer::new(self.model.as_ref(), &self.settings).write_properties(
            &mut self.json,
            ctx.resource_type,
            &resource.properties,
        )
    }

    fn end_resource(
        &mut self,
        resource: Option<&ODataResource>,
        ctx: &mut ResourceContext<'_>,
    ) -> ODataResult<()> {
        if ctx.parent == ParentKind::TopLevel && self.embedded {
            return Ok(());
        }
        let Some(resource) = resource else {
            return Ok(());
        };
        // Annotations added to the item after it was started.
        self.write_instance_annotations(&resource.instance_annotations, ctx.annotations)?;
        self.json.end_object_scope()?;
        Ok(())
    }

    fn start_resource_set(
        &mut self,
        set: &ODataResourceSet,
        ctx: &mut ResourceSetContext<'_>,
    ) -> ODataResult<()> {
        if ctx.parent == ParentKind::NavigationLink {
            self.before_link_content(true)?;
            let Some(name) = self.links.last().map(|f| f.name.clone()) else {
                return Ok(());
            };
            if let Some(count) = set.count {
                self.json
                    .write_property(&property_annotation(&name, ODATA_COUNT), &json!(count))?;
            }
            self.json.write_name(&name)?;
            self.json.start_array_scope()?;
            return Ok(());
        }
        self.json.start_object_scope()?;
        if let Some(url) = ctx.context_url.take() {
            self.write_annotation(ODATA_CONTEXT, Value::String(url))?;
        }
        if let Some(count) = set.count {
            self.write_annotation(ODATA_COUNT, json!(count))?;
        }
        self.write_instance_annotations(&set.instance_annotations, ctx.annotations)?;
        self.json.write_name(VALUE_PROPERTY)?;
        self.json.start_array_scope()?;
        Ok(())
    }

    fn end_resource_set(
        &mut self,
        set: &ODataResourceSet,
        ctx: &mut ResourceSetContext<'_>,
    ) -> ODataResult<()> {
        self.json.end_array_scope()?;
        if ctx.parent == ParentKind::NavigationLink {
            let Some(name) = self.links.last().map(|f| f.name.clone()) else {
                return Ok(());
            };
            if let Some(link) = &set.next_page_link {
                self.json
                    .write_property(&property_annotation(&name, ODATA_NEXT_LINK), &json!(link))?;
            }
            return Ok(());
        }
        if let Some(link) = &set.next_page_link {
            self.write_annotation(ODATA_NEXT_LINK, json!(link))?;
        }
        if let Some(link) = &set.delta_link {
            self.write_annotation(ODATA_DELTA_LINK, json!(link))?;
        }
        self.write_instance_annotations(&set.instance_annotations, ctx.annotations)?;
        self.json.end_object_scope()?;
        Ok(())
    }

    fn write_deferred_navigation_link(&mut self, link: &ODataNestedResourceInfo) -> ODataResult<()> {
        if self.settings.metadata_level != MetadataLevel::Full {
            return Ok(());
        }
        write_navigation_link_annotations(&mut self.json, link)
    }

    fn start_navigation_link_with_content(
        &mut self,
        link: &ODataNestedResourceInfo,
        is_collection: bool,
    ) -> ODataResult<()> {
        self.links.push(LinkFrame {
            name: link.name.clone(),
            is_collection,
            bind_open: false,
            value_open: false,
        });
        Ok(())
    }

    fn end_navigation_link_with_content(
        &mut self,
        _link: &ODataNestedResourceInfo,
        _is_collection: bool,
    ) -> ODataResult<()> {
        if let Some(frame) = self.links.pop() {
            if frame.bind_open || frame.value_open {
                self.json.end_array_scope()?;
            }
        }
        Ok(())
    }

    fn write_entity_reference_in_navigation_link_content(
        &mut self,
        parent: &ODataNestedResourceInfo,
        is_collection: bool,
        link: &ODataEntityReferenceLink,
    ) -> ODataResult<()> {
        let bind = property_annotation(&parent.name, ODATA_BIND);
        if !is_collection {
            self.json.write_property(&bind, &json!(link.url))?;
            return Ok(());
        }
        let Some(frame) = self.links.last_mut() else {
            return Ok(());
        };
        if !frame.bind_open {
            self.json.write_name(&bind)?;
            self.json.start_array_scope()?;
            frame.bind_open = true;
        }
        self.json.write_str(&link.url)?;
        Ok(())
    }

    fn write_in_stream_error(&mut self, error: &ODataInStreamError) -> ODataResult<()> {
        let mut body = serde_json::Map::new();
        body.insert("code".into(), json!(error.code));
        body.insert("message".into(), json!(error.message));
        if let Some(target) = &error.target {
            body.insert("target".into(), json!(target));
        }
        let standalone = self.json.depth() == 0 || self.json.in_array();
        if standalone {
            self.json.start_object_scope()?;
        }
        self.json.write_property(ERROR_PROPERTY, &Value::Object(body))?;
        if standalone {
            self.json.end_object_scope()?;
        }
        Ok(())
    }

    fn buffered_len(&self) -> usize {
        self.json.buffered_len()
    }

    fn flush(&mut self) -> ODataResult<()> {
        self.json.flush()?;
        Ok(())
    }

    async fn flush_async(&mut self) -> ODataResult<()> {
        self.json.flush_async().await?;
        Ok(())
    }
}
