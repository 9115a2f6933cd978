//! Push-based OData JSON writer.
//!
//! [`ODataWriterCore`] is the state machine: callers push resource sets,
//! resources and navigation links and close them with `write_end`, and the
//! core validates every step against the scope stack before handing it to a
//! [`FormatWriter`]. [`JsonFormatWriter`] is the OData JSON format;
//! [`PropertySerializer`] writes property values and top-level property
//! payloads. [`ODataDeltaWriter`] writes delta responses and delegates
//! expanded content of delta entries to an ordinary core through
//! [`ExpandedNavigationPropertyWriter`].
//!
//! Each instance is created for synchronous or asynchronous use and rejects
//! calls of the other kind.

pub mod core;
pub mod delta;
pub mod format;
pub mod json_format;
pub mod property;
pub mod state;

pub use crate::core::{ODataWriterCore, WriterTarget};
pub use delta::{ExpandedNavigationPropertyWriter, ODataDeltaWriter};
pub use format::{FormatWriter, ParentKind, ResourceContext, ResourceSetContext};
pub use json_format::JsonFormatWriter;
pub use property::PropertySerializer;
pub use state::{DeltaWriterState, WriterState};

#[cfg(test)]
mod tests {
    use super::*;
    use odl_core::{
        ExecutionMode, MetadataLevel, ODataEntityReferenceLink, ODataInStreamError,
        ODataNestedResourceInfo, ODataResource, ODataResourceSet, WriterSettings,
    };
    use odl_edm::{
        EdmModel, EdmNavigationProperty, EdmNavigationSource, EdmPrimitiveKind, EdmProperty,
        EdmStructuredType, EdmTypeRef, InMemoryModel,
    };
    use odl_json::JsonWriter;
    use std::sync::Arc;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn model() -> Arc<dyn EdmModel> {
        let person = EdmStructuredType::entity("NS.Person")
            .with_key("Id")
            .with_property(EdmProperty::new("Id", EdmTypeRef::Primitive(EdmPrimitiveKind::Int32)))
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

    fn json_writer(
        settings: WriterSettings,
        target: WriterTarget,
    ) -> ODataWriterCore<JsonFormatWriter> {
        ODataWriterCore::for_json(
            JsonWriter::in_memory(),
            settings,
            model(),
            target,
            ExecutionMode::Synchronous,
        )
        .unwrap()
    }

    fn person(id: i32, name: &str) -> ODataResource {
        ODataResource::new()
            .with_property("Id", id)
            .with_property("Name", name)
    }

    fn text(writer: ODataWriterCore<JsonFormatWriter>) -> String {
        String::from_utf8(writer.into_output()).unwrap()
    }

    fn settings() -> WriterSettings {
        WriterSettings::response().with_service_root("http://host/svc")
    }

    #[test]
    fn resource_set_payload() {
        init_tracing();
        let mut w = json_writer(settings(), WriterTarget::resource_set("People"));
        w.write_start_resource_set(
            ODataResourceSet::new()
                .with_count(2)
                .with_next_page_link("http://host/svc/People?$skip=2"),
        )
        .unwrap();
        w.write_start_resource(person(1, "Alice")).unwrap();
        w.write_end().unwrap();
        w.write_start_resource(person(2, "Bob")).unwrap();
        w.write_end().unwrap();
        w.write_end().unwrap();
        assert_eq!(w.state(), WriterState::Completed);
        assert_eq!(
            text(w),
            concat!(
                r#"{"@odata.context":"http://host/svc/$metadata#People","@odata.count":2,"#,
                r#""value":[{"Id":1,"Name":"Alice"},{"Id":2,"Name":"Bob"}],"#,
                r#""@odata.nextLink":"http://host/svc/People?$skip=2"}"#
            )
        );
    }

    #[test]
    fn expanded_navigation_links() {
        let mut w = json_writer(settings(), WriterTarget::resource("People"));
        w.write_start_resource(ODataResource::new().with_property("Id", 1))
            .unwrap();
        w.write_start_navigation_link(ODataNestedResourceInfo::single("Manager"))
            .unwrap();
        w.write_start_resource(ODataResource::new().with_property("Id", 2))
            .unwrap();
        w.write_end().unwrap();
        w.write_end().unwrap();
        w.write_start_navigation_link(ODataNestedResourceInfo::collection("Friends"))
            .unwrap();
        w.write_start_resource_set(ODataResourceSet::new()).unwrap();
        w.write_end().unwrap();
        w.write_end().unwrap();
        w.write_end().unwrap();
        assert_eq!(
            text(w),
            concat!(
                r#"{"@odata.context":"http://host/svc/$metadata#People/$entity","Id":1,"#,
                r#""Manager":{"Id":2},"Friends":[]}"#
            )
        );
    }

    #[test]
    fn null_expanded_resource() {
        let mut w = json_writer(settings(), WriterTarget::resource("People"));
        w.write_start_resource(ODataResource::new().with_property("Id", 1))
            .unwrap();
        w.write_start_navigation_link(ODataNestedResourceInfo::single("Manager"))
            .unwrap();
        w.write_start_null_resource().unwrap();
        for _ in 0..3 {
            w.write_end().unwrap();
        }
        assert_eq!(
            text(w),
            r#"{"@odata.context":"http://host/svc/$metadata#People/$entity","Id":1,"Manager":null}"#
        );
    }

    #[test]
    fn request_binds_entity_reference_links() {
        let mut w = json_writer(WriterSettings::request(), WriterTarget::resource("People"));
        w.write_start_resource(ODataResource::new().with_property("Id", 1))
            .unwrap();
        w.write_start_navigation_link(ODataNestedResourceInfo::collection("Friends"))
            .unwrap();
        w.write_entity_reference_link(ODataEntityReferenceLink::new("People(2)"))
            .unwrap();
        w.write_entity_reference_link(ODataEntityReferenceLink::new("People(3)"))
            .unwrap();
        w.write_end().unwrap();
        w.write_start_navigation_link(ODataNestedResourceInfo::single("Manager"))
            .unwrap();
        w.write_entity_reference_link(ODataEntityReferenceLink::new("People(4)"))
            .unwrap();
        w.write_end().unwrap();
        w.write_end().unwrap();
        assert_eq!(
            text(w),
            r#"{"Id":1,"Friends@odata.bind":["People(2)","People(3)"],"Manager@odata.bind":"People(4)"}"#
        );
    }

    #[test]
    fn full_metadata_resource() {
        let settings = settings().with_metadata_level(MetadataLevel::Full);
        let mut w = json_writer(settings, WriterTarget::resource("People"));
        w.write_start_resource(ODataResource::new().with_property("Id", 1))
            .unwrap();
        w.write_end().unwrap();
        assert_eq!(
            text(w),
            concat!(
                r#"{"@odata.context":"http://host/svc/$metadata#People/$entity","#,
                r##""@odata.id":"http://host/svc/People(1)","@odata.type":"#NS.Person","##,
                r#""@odata.editLink":"http://host/svc/People(1)","Id":1,"#,
                r#""Friends@odata.associationLink":"http://host/svc/People(1)/Friends/$ref","#,
                r#""Friends@odata.navigationLink":"http://host/svc/People(1)/Friends","#,
                r#""Manager@odata.associationLink":"http://host/svc/People(1)/Manager/$ref","#,
                r#""Manager@odata.navigationLink":"http://host/svc/People(1)/Manager"}"#
            )
        );
    }

    #[test]
    fn no_metadata_omits_control_information() {
        let settings = settings().with_metadata_level(MetadataLevel::None);
        let mut w = json_writer(settings, WriterTarget::resource_set("People"));
        w.write_start_resource_set(ODataResourceSet::new()).unwrap();
        w.write_start_resource(person(1, "Alice")).unwrap();
        w.write_end().unwrap();
        w.write_end().unwrap();
        assert_eq!(text(w), r#"{"value":[{"Id":1,"Name":"Alice"}]}"#);
    }

    #[test]
    fn in_stream_error_inside_a_set() {
        let mut w = json_writer(settings(), WriterTarget::resource_set("People"));
        w.write_start_resource_set(ODataResourceSet::new()).unwrap();
        w.write_start_resource(person(1, "Alice")).unwrap();
        w.write_end().unwrap();
        w.write_in_stream_error(ODataInStreamError::new("500", "boom"))
            .unwrap();
        assert_eq!(w.state(), WriterState::Error);
        assert_eq!(
            text(w),
            concat!(
                r#"{"@odata.context":"http://host/svc/$metadata#People","#,
                r#""value":[{"Id":1,"Name":"Alice"},{"error":{"code":"500","message":"boom"}}"#
            )
        );
    }

    #[test]
    fn selected_projection_narrows_the_context_url() {
        let settings = settings().with_select("Id,Name");
        let mut w = json_writer(settings, WriterTarget::resource_set("People"));
        w.write_start_resource_set(ODataResourceSet::new()).unwrap();
        w.write_end().unwrap();
        assert_eq!(
            text(w),
            r#"{"@odata.context":"http://host/svc/$metadata#People(Id,Name)","value":[]}"#
        );
    }

    fn write_sample_sync(w: &mut ODataWriterCore<JsonFormatWriter>) {
        w.write_start_resource_set(ODataResourceSet::new().with_count(1))
            .unwrap();
        w.write_start_resource(person(1, "Alice")).unwrap();
        w.write_start_navigation_link(ODataNestedResourceInfo::single("Manager"))
            .unwrap();
        w.write_start_resource(person(2, "Bob")).unwrap();
        for _ in 0..4 {
            w.write_end().unwrap();
        }
    }

    #[tokio::test]
    async fn async_output_matches_sync_output() {
        let mut sync = json_writer(settings(), WriterTarget::resource_set("People"));
        write_sample_sync(&mut sync);

        let mut settings = settings();
        settings.buffer_size = 8;
        let mut w = ODataWriterCore::for_json(
            JsonWriter::in_memory(),
            settings,
            model(),
            WriterTarget::resource_set("People"),
            ExecutionMode::Asynchronous,
        )
        .unwrap();
        w.write_start_resource_set_async(ODataResourceSet::new().with_count(1))
            .await
            .unwrap();
        w.write_start_resource_async(person(1, "Alice")).await.unwrap();
        w.write_start_navigation_link_async(ODataNestedResourceInfo::single("Manager"))
            .await
            .unwrap();
        w.write_start_resource_async(person(2, "Bob")).await.unwrap();
        for _ in 0..4 {
            w.write_end_async().await.unwrap();
        }
        w.flush_async().await.unwrap();
        assert_eq!(w.state(), WriterState::Completed);
        assert_eq!(w.into_output(), sync.into_output());
    }

    // ---- Sinks ----

    #[derive(Clone, Default)]
    struct SharedSink(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn completed_payload_reaches_a_blocking_sink_without_flush() {
        init_tracing();
        let mut expected = json_writer(settings(), WriterTarget::resource_set("People"));
        write_sample_sync(&mut expected);

        let sink = SharedSink::default();
        let mut w = ODataWriterCore::for_json(
            JsonWriter::to_writer(sink.clone()),
            settings(),
            model(),
            WriterTarget::resource_set("People"),
            ExecutionMode::Synchronous,
        )
        .unwrap();
        write_sample_sync(&mut w);
        assert_eq!(w.state(), WriterState::Completed);
        assert_eq!(*sink.0.lock().unwrap(), expected.into_output());
    }

    #[tokio::test]
    async fn completed_payload_reaches_an_async_sink_without_flush() {
        use tokio::io::AsyncReadExt;

        let mut sync = json_writer(settings(), WriterTarget::resource_set("People"));
        write_sample_sync(&mut sync);
        let expected = sync.into_output();

        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let mut w = ODataWriterCore::for_json(
            JsonWriter::to_async_writer(client),
            settings(),
            model(),
            WriterTarget::resource_set("People"),
            ExecutionMode::Asynchronous,
        )
        .unwrap();
        w.write_start_resource_set_async(ODataResourceSet::new().with_count(1))
            .await
            .unwrap();
        w.write_start_resource_async(person(1, "Alice")).await.unwrap();
        w.write_start_navigation_link_async(ODataNestedResourceInfo::single("Manager"))
            .await
            .unwrap();
        w.write_start_resource_async(person(2, "Bob")).await.unwrap();
        for _ in 0..4 {
            w.write_end_async().await.unwrap();
        }
        assert_eq!(w.state(), WriterState::Completed);

        let mut received = vec![0u8; expected.len()];
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            server.read_exact(&mut received),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(received, expected);
    }
}
