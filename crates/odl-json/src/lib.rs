//! JSON token layer for the OData JSON core.
//!
//! The reader and writer cores never touch raw characters. They emit and
//! consume tokens through two types:
//!
//! - [`JsonWriter`]: scoped token writer (objects, arrays, names, values)
//!   that writes through to a blocking sink, or holds tokens for an async
//!   sink until flushed
//! - [`JsonReader`]: streaming pull tokenizer exposing the current
//!   [`JsonNodeType`] plus positioned helpers (`read_start_object`,
//!   `read_property_name`, ...) with explicit pre/post conditions
//!
//! Tokenizing is done by `json-event-parser`, which pulls input from a
//! `Read` or tokio `AsyncRead` only as far as the next token needs.
//! String escaping and number parsing are delegated to `serde_json`.

pub mod error;
pub mod reader;
pub mod writer;

pub use error::{JsonError, JsonResult};
pub use reader::{JsonNodeType, JsonReader};
pub use writer::{JsonWriter, OutputSink};

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use serde_json::json;

    #[test]
    fn writer_output_reads_back_token_for_token() {
        let mut w = JsonWriter::in_memory();
        w.start_object_scope().unwrap();
        w.write_property("@odata.context", &json!("http://svc/$metadata#People")).unwrap();
        w.write_name("value").unwrap();
        w.start_array_scope().unwrap();
        w.start_object_scope().unwrap();
        w.write_property("Id", &json!(1)).unwrap();
        w.end_object_scope().unwrap();
        w.end_array_scope().unwrap();
        w.end_object_scope().unwrap();

        let mut r = JsonReader::from_bytes(w.into_bytes());
        async {
            r.read().await.unwrap();
            r.read_start_object().await.unwrap();
            assert_eq!(r.read_property_name().await.unwrap(), "@odata.context");
            assert_eq!(
                r.read_primitive_value().await.unwrap(),
                json!("http://svc/$metadata#People")
            );
            assert_eq!(r.read_property_name().await.unwrap(), "value");
            r.read_start_array().await.unwrap();
            assert_eq!(r.read_value().await.unwrap(), json!({"Id": 1}));
            r.read_end_array().await.unwrap();
            r.read_end_object().await.unwrap();
        }
        .now_or_never()
        .unwrap();
        assert_eq!(r.node_type(), JsonNodeType::EndOfInput);
    }
}
