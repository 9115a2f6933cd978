//! Shared machinery for the OData JSON reader and writer cores.
//!
//! Both state machines are built from the same parts:
//!
//! - payload items and values ([`ODataResource`], [`ODataResourceSet`],
//!   [`ODataNestedResourceInfo`], [`ODataValue`], the delta items)
//! - [`Scope`] and [`ScopeStack`]: one record per nesting level, with the
//!   per-state bookkeeping kept in [`ScopeData`]
//! - [`DuplicatePropertyNamesChecker`], [`WrittenMetadataProperties`] and
//!   [`InstanceAnnotationWriteTracker`] for per-resource constraints
//! - projections ([`SelectedPropertiesNode`]), resource paths
//!   ([`ODataPath`]) and context URLs ([`ContextUrlParser`])
//! - metadata builders and validators, injected rather than hardwired
//! - [`WriterSettings`] / [`ReaderSettings`] and the [`ODataError`] taxonomy

pub mod annotations;
pub mod context_url;
pub mod duplicate;
pub mod error;
pub mod item;
pub mod listener;
pub mod metadata;
pub mod path;
pub mod scope;
pub mod selection;
pub mod settings;
pub mod type_context;
pub mod validation;
pub mod value;
pub mod version;

pub use context_url::{ContextUrlInfo, ContextUrlKind, ContextUrlParser, ParsedContextUrl};
pub use duplicate::{DuplicatePropertyNamesChecker, NavigationLinkUse};
pub use error::{ODataError, ODataResult};
pub use item::{
    DeltaDeletedEntryReason, ODataDeltaDeletedEntry, ODataDeltaDeletedLink, ODataDeltaLink,
    ODataDeltaResourceSet, ODataEntityReferenceLink, ODataInStreamError, ODataItem,
    ODataNestedResourceInfo, ODataResource, ODataResourceSet, ODataStreamReferenceValue,
    ResourceSerializationInfo,
};
pub use listener::{Listener, ListenerEvent};
pub use metadata::{
    create_metadata_builder, ConventionalMetadataBuilder, MetadataBuilderInput,
    NoOpMetadataBuilder, ResourceMetadataBuilder,
};
pub use path::{ODataPath, PathSegment};
pub use scope::{
    InstanceAnnotationWriteTracker, MetadataProperty, NavigationLinkScopeData, ResourceScopeData,
    ResourceSetScopeData, Scope, ScopeData, ScopeStack, WrittenMetadataProperties,
};
pub use selection::SelectedPropertiesNode;
pub use settings::{ExecutionMode, MetadataLevel, ReaderSettings, WriterSettings};
pub use type_context::ResourceTypeContext;
pub use validation::{DefaultReaderValidator, DefaultWriterValidator, ReaderValidator, WriterValidator};
pub use value::{
    ODataCollectionValue, ODataInstanceAnnotation, ODataPrimitiveValue, ODataProperty, ODataValue,
};
pub use version::ODataVersion;

#[cfg(test)]
mod tests {
    use super::*;
    use odl_edm::{
        EdmModel, EdmNavigationProperty, EdmNavigationSource, EdmStructuredType, InMemoryModel,
    };

    #[test]
    fn projection_and_path_feed_the_metadata_builder() {
        let model = InMemoryModel::builder()
            .add_type(
                EdmStructuredType::entity("NS.Person")
                    .with_key("Id")
                    .with_navigation(EdmNavigationProperty::collection("Orders", "NS.Order").contained()),
            )
            .add_type(EdmStructuredType::entity("NS.Order").with_key("Id"))
            .add_source(EdmNavigationSource::entity_set("People", "NS.Person"))
            .build()
            .unwrap();

        let order_type = model.find_type("NS.Order").unwrap();
        let people = model.find_navigation_source("People").unwrap();
        let person_type = model.find_type("NS.Person").unwrap();
        let orders_nav = odl_edm::EdmModel::find_navigation_property(&model, &person_type, "Orders").unwrap();
        let orders = odl_edm::EdmModel::find_navigation_target(&model, &people, &orders_nav);

        let source_path = ODataPath::entity_set("People")
            .with_key(vec![("Id".into(), ODataPrimitiveValue::Int32(1))])
            .with_navigation("Orders");
        let ctx = ResourceTypeContext::create(None, Some(&*orders), Some(&*order_type), true);
        let order = ODataResource::new().with_property("Id", 7);
        let builder = create_metadata_builder(
            &model,
            MetadataBuilderInput {
                service_root: Some("http://host/svc/"),
                resource: &order,
                resource_type: Some(&*order_type),
                source_path: &source_path,
                type_context: &ctx,
                selected: &SelectedPropertiesNode::parse(Some("Id")).child("Orders"),
                key_as_segment: false,
            },
        );
        assert_eq!(builder.id().as_deref(), Some("http://host/svc/People(1)/Orders(7)"));
    }
}
