use async_trait::async_trait;
use odl_core::{
    InstanceAnnotationWriteTracker, ODataEntityReferenceLink, ODataInStreamError,
    ODataNestedResourceInfo, ODataResource, ODataResourceSet, ODataResult,
    WrittenMetadataProperties,
};
use odl_edm::EdmStructuredType;

/// Where a resource or resource set sits in the payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParentKind {
    TopLevel,
    ResourceSet,
    NavigationLink,
}

/// Control information the core resolved for a resource.
///
/// Every URL is optional; the format writes what it is given and nothing
/// else. Single-shot metadata properties must be marked on
/// `written_metadata` as they are written.
pub struct ResourceContext<'a> {
    pub parent: ParentKind,
    pub context_url: Option<String>,
    /// Value for `odata.type`, without the leading `#`.
    pub type_name: Option<String>,
    pub id: Option<String>,
    pub edit_link: Option<String>,
    pub read_link: Option<String>,
    pub resource_type: Option<&'a EdmStructuredType>,
    pub written_metadata: &'a mut WrittenMetadataProperties,
    pub annotations: &'a mut InstanceAnnotationWriteTracker,
}

pub struct ResourceSetContext<'a> {
    pub parent: ParentKind,
    pub context_url: Option<String>,
    pub annotations: &'a mut InstanceAnnotationWriteTracker,
}

/// Serializer hooks driven by [`ODataWriterCore`](crate::ODataWriterCore).
///
/// The core owns call-order validation, projection and error handling; an
/// implementation only turns each hook into tokens. Hooks are never called
/// for skipped subtrees.
#[async_trait]
pub trait FormatWriter: Send {
    fn start_payload(&mut self) -> ODataResult<()> {
        Ok(())
    }

    fn end_payload(&mut self) -> ODataResult<()> {
        Ok(())
    }

    /// `None` is a null expanded resource.
    fn start_resource(
        &mut self,
        resource: Option<&ODataResource>,
        ctx: &mut ResourceContext<'_>,
    ) -> ODataResult<()>;

    fn end_resource(
        &mut self,
        resource: Option<&ODataResource>,
        ctx: &mut ResourceContext<'_>,
    ) -> ODataResult<()>;

    fn start_resource_set(
        &mut self,
        set: &ODataResourceSet,
        ctx: &mut ResourceSetContext<'_>,
    ) -> ODataResult<()>;

    fn end_resource_set(
        &mut self,
        set: &ODataResourceSet,
        ctx: &mut ResourceSetContext<'_>,
    ) -> ODataResult<()>;

    fn write_deferred_navigation_link(&mut self, link: &ODataNestedResourceInfo) -> ODataResult<()>;

    fn start_navigation_link_with_content(
        &mut self,
        link: &ODataNestedResourceInfo,
        is_collection: bool,
    ) -> ODataResult<()>;

    fn end_navigation_link_with_content(
        &mut self,
        link: &ODataNestedResourceInfo,
        is_collection: bool,
    ) -> ODataResult<()>;

    fn write_entity_reference_in_navigation_link_content(
        &mut self,
        parent: &ODataNestedResourceInfo,
        is_collection: bool,
        link: &ODataEntityReferenceLink,
    ) -> ODataResult<()>;

    fn write_in_stream_error(&mut self, error: &ODataInStreamError) -> ODataResult<()>;

    /// Bytes produced but not yet handed to the sink.
    fn buffered_len(&self) -> usize {
        0
    }

    fn flush(&mut self) -> ODataResult<()>;

    async fn flush_async(&mut self) -> ODataResult<()>;
}
