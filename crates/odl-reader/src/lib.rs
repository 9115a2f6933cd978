//! Pull-based OData JSON reader.
//!
//! [`ODataReaderCore`] walks a payload one item at a time: each `read`
//! moves to the next [`ReaderState`] and exposes the resource set,
//! resource, navigation link or entity reference link of that state.
//! [`ResourceDeserializer`] does the member-level work inside a resource:
//! annotations, properties, and the point where the next navigation link
//! starts.
//!
//! In responses the reader attaches a metadata builder to every resource,
//! fills in the conventional id and edit link, and reports projected
//! navigation links the payload left out as deferred links.

pub mod core;
pub mod deserializer;
pub mod state;

pub use crate::core::{ODataReaderCore, ReaderTarget};
pub use deserializer::{NavigationLinkFound, ResourceDeserializer};
pub use state::ReaderState;

#[cfg(test)]
mod tests {
    use super::*;
    use odl_core::{
        ExecutionMode, ODataItem, ODataResource, ODataResourceSet, ODataValue, ReaderSettings,
        WriterSettings,
    };
    use odl_edm::{
        EdmModel, EdmNavigationSource, EdmPrimitiveKind, EdmProperty, EdmStructuredType,
        EdmTypeRef, InMemoryModel,
    };
    use odl_json::{JsonReader, JsonWriter};
    use odl_writer::{ODataWriterCore, WriterTarget};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn model() -> Arc<dyn EdmModel> {
        let string = || EdmTypeRef::Primitive(EdmPrimitiveKind::String);
        let product = EdmStructuredType::entity("NS.Product")
            .with_key("Id")
            .with_property(EdmProperty::new("Id", EdmTypeRef::Primitive(EdmPrimitiveKind::Int32)))
            .with_property(EdmProperty::new("Name", string()))
            .with_property(EdmProperty::new("Tags", EdmTypeRef::collection(string())));
        Arc::new(
            InMemoryModel::builder()
                .add_type(product)
                .add_source(EdmNavigationSource::entity_set("Products", "NS.Product"))
                .build()
                .unwrap(),
        )
    }

    fn product(id: i32, name: &str, tags: Vec<&str>) -> ODataResource {
        ODataResource::new()
            .with_property("Id", id)
            .with_property("Name", name)
            .with_property("Tags", ODataValue::from(tags))
    }

    fn json_properties(resource: &ODataResource) -> BTreeMap<String, serde_json::Value> {
        resource
            .properties
            .iter()
            .map(|p| (p.name.clone(), p.value.to_json()))
            .collect()
    }

    #[test]
    fn written_payload_reads_back() {
        init_tracing();
        let written = vec![
            product(1, "Kettle", vec!["kitchen", "steel"]),
            product(2, "Lamp", vec![]),
        ];

        let mut w = ODataWriterCore::for_json(
            JsonWriter::in_memory(),
            WriterSettings::response().with_service_root("http://host/svc"),
            model(),
            WriterTarget::resource_set("Products"),
            ExecutionMode::Synchronous,
        )
        .unwrap();
        w.write_start_resource_set(ODataResourceSet::new().with_count(2))
            .unwrap();
        for resource in &written {
            w.write_start_resource(resource.clone()).unwrap();
            w.write_end().unwrap();
        }
        w.write_end().unwrap();
        let payload = w.into_output();

        let mut r = ODataReaderCore::new(
            JsonReader::from_bytes(payload),
            ReaderSettings::response(),
            model(),
            ReaderTarget::resource_set("Products"),
            ExecutionMode::Synchronous,
        )
        .unwrap();
        let mut read = Vec::new();
        while r.read().unwrap() {
            if r.state() == ReaderState::ResourceEnd {
                if let Some(ODataItem::Resource(resource)) = r.item() {
                    read.push(resource.clone());
                }
            }
        }

        assert_eq!(read.len(), written.len());
        for (got, sent) in read.iter().zip(&written) {
            assert_eq!(json_properties(got), json_properties(sent));
        }
        assert_eq!(read[0].id.as_deref(), Some("http://host/svc/Products(1)"));
        let set = r.item().and_then(ODataItem::as_resource_set).unwrap();
        assert_eq!(set.count, Some(2));
    }
}
