use std::fmt;
use std::io::{Cursor, Read};
use std::pin::Pin;

use json_event_parser::{FromReadJsonReader, FromTokioAsyncReadJsonReader, JsonEvent, ParseError};
use serde_json::{Map, Number, Value};
use tokio::io::AsyncRead;
use tracing::trace;

use crate::error::{JsonError, JsonResult};

/// The kind of token the reader is positioned on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JsonNodeType {
    /// Before the first call to [`JsonReader::read`].
    None,
    StartObject,
    EndObject,
    StartArray,
    EndArray,
    /// A member name; [`JsonReader::value`] holds the name as a string.
    Property,
    /// A string, number, boolean or null.
    PrimitiveValue,
    EndOfInput,
}

impl fmt::Display for JsonNodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "None",
            Self::StartObject => "StartObject",
            Self::EndObject => "EndObject",
            Self::StartArray => "StartArray",
            Self::EndArray => "EndArray",
            Self::Property => "Property",
            Self::PrimitiveValue => "PrimitiveValue",
            Self::EndOfInput => "EndOfInput",
        };
        f.write_str(name)
    }
}

type BlockingSource = FromReadJsonReader<Box<dyn Read + Send>>;
type AsyncSource = FromTokioAsyncReadJsonReader<Pin<Box<dyn AsyncRead + Send>>>;

enum TokenSource {
    Blocking(BlockingSource),
    Async(AsyncSource),
}

/// Streaming pull tokenizer.
///
/// Tokens are parsed one at a time; the parser pulls more bytes from the
/// underlying source only when the next token needs them. Member order and
/// duplicate member names are reported exactly as they appear in the input.
///
/// Every method that advances is `async`. Over a blocking source the
/// returned futures never pend, so a synchronous caller can drive them with
/// `FutureExt::now_or_never`.
pub struct JsonReader {
    source: TokenSource,
    node_type: JsonNodeType,
    value: Option<Value>,
    depth: usize,
    tokens: u64,
}

impl fmt::Debug for JsonReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonReader")
            .field("async", &self.is_async())
            .field("node_type", &self.node_type)
            .field("depth", &self.depth)
            .field("tokens", &self.tokens)
            .finish()
    }
}

impl JsonReader {
    fn with_source(source: TokenSource) -> Self {
        Self {
            source,
            node_type: JsonNodeType::None,
            value: None,
            depth: 0,
            tokens: 0,
        }
    }

    pub fn from_bytes(input: impl Into<Vec<u8>>) -> Self {
        Self::from_reader(Cursor::new(input.into()))
    }

    pub fn from_str(input: &str) -> Self {
        Self::from_bytes(input.as_bytes().to_vec())
    }

    pub fn from_reader(reader: impl Read + Send + 'static) -> Self {
        let reader: Box<dyn Read + Send> = Box::new(reader);
        Self::with_source(TokenSource::Blocking(FromReadJsonReader::new(reader)))
    }

    pub fn from_async_reader(reader: impl AsyncRead + Send + 'static) -> Self {
        let reader: Pin<Box<dyn AsyncRead + Send>> = Box::pin(reader);
        Self::with_source(TokenSource::Async(FromTokioAsyncReadJsonReader::new(reader)))
    }

    /// Returns `true` when reads may wait on an async source.
    pub fn is_async(&self) -> bool {
        matches!(self.source, TokenSource::Async(_))
    }

    // ---- Current node ----

    pub fn node_type(&self) -> JsonNodeType {
        self.node_type
    }

    /// Property name or primitive value of the current node.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Number of tokens read so far.
    pub fn tokens_read(&self) -> u64 {
        self.tokens
    }

    /// Number of open objects and arrays.
    pub fn depth(&self) -> usize {
        self.depth
    }

    // ---- Tokenizer ----

    /// Advance to the next node and return its type.
    pub async fn read(&mut self) -> JsonResult<JsonNodeType> {
        if self.node_type == JsonNodeType::EndOfInput {
            return Ok(self.node_type);
        }
        self.value = None;
        let (node_type, value) = match &mut self.source {
            TokenSource::Blocking(parser) => {
                owned_token(parser.read_next_event().map_err(parse_error)?)?
            }
            TokenSource::Async(parser) => {
                owned_token(parser.read_next_event().await.map_err(parse_error)?)?
            }
        };
        match node_type {
            JsonNodeType::StartObject | JsonNodeType::StartArray => self.depth += 1,
            JsonNodeType::EndObject | JsonNodeType::EndArray => {
                self.depth = self.depth.saturating_sub(1)
            }
            JsonNodeType::EndOfInput => trace!(tokens = self.tokens, "json input exhausted"),
            _ => {}
        }
        self.tokens += 1;
        self.node_type = node_type;
        self.value = value;
        Ok(node_type)
    }

    // ---- Positioned helpers ----

    fn unexpected(&self, expected: JsonNodeType) -> JsonError {
        JsonError::UnexpectedNode {
            expected: expected.to_string(),
            found: self.node_type.to_string(),
        }
    }

    fn expect_node(&self, expected: JsonNodeType) -> JsonResult<()> {
        if self.node_type == expected {
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    /// Pre: on StartObject. Post: on the first node inside the object.
    pub async fn read_start_object(&mut self) -> JsonResult<()> {
        self.expect_node(JsonNodeType::StartObject)?;
        self.read().await?;
        Ok(())
    }

    /// Pre: on EndObject. Post: on the node after the object.
    pub async fn read_end_object(&mut self) -> JsonResult<()> {
        self.expect_node(JsonNodeType::EndObject)?;
        self.read().await?;
        Ok(())
    }

    /// Pre: on StartArray. Post: on the first node inside the array.
    pub async fn read_start_array(&mut self) -> JsonResult<()> {
        self.expect_node(JsonNodeType::StartArray)?;
        self.read().await?;
        Ok(())
    }

    /// Pre: on EndArray. Post: on the node after the array.
    pub async fn read_end_array(&mut self) -> JsonResult<()> {
        self.expect_node(JsonNodeType::EndArray)?;
        self.read().await?;
        Ok(())
    }

    /// Pre: on Property. Post: on the first node of the property value.
    pub async fn read_property_name(&mut self) -> JsonResult<String> {
        let name = self.take_property_name()?;
        self.read().await?;
        Ok(name)
    }

    fn take_property_name(&mut self) -> JsonResult<String> {
        self.expect_node(JsonNodeType::Property)?;
        match self.value.take() {
            Some(Value::String(s)) => Ok(s),
            _ => Err(self.unexpected(JsonNodeType::Property)),
        }
    }

    /// Name of the current Property node without advancing.
    pub fn property_name(&self) -> Option<&str> {
        match (&self.node_type, &self.value) {
            (JsonNodeType::Property, Some(Value::String(s))) => Some(s),
            _ => None,
        }
    }

    /// Pre: on PrimitiveValue. Post: on the node after it.
    pub async fn read_primitive_value(&mut self) -> JsonResult<Value> {
        self.expect_node(JsonNodeType::PrimitiveValue)?;
        let value = self.value.take().unwrap_or(Value::Null);
        self.read().await?;
        Ok(value)
    }

    /// Pre: on the first node of a value. Post: on the node after the
    /// value. Returns the whole value.
    pub async fn read_value(&mut self) -> JsonResult<Value> {
        let mut open: Vec<Partial> = Vec::new();
        loop {
            let completed = match self.node_type {
                JsonNodeType::PrimitiveValue => self.read_primitive_value().await?,
                JsonNodeType::StartArray => {
                    open.push(Partial::Array(Vec::new()));
                    self.read().await?;
                    continue;
                }
                JsonNodeType::StartObject => {
                    open.push(Partial::Object(Map::new(), None));
                    self.read().await?;
                    continue;
                }
                JsonNodeType::Property => {
                    let name = self.read_property_name().await?;
                    if let Some(Partial::Object(_, pending)) = open.last_mut() {
                        *pending = Some(name);
                    }
                    continue;
                }
                JsonNodeType::EndArray | JsonNodeType::EndObject if !open.is_empty() => {
                    let value = match open.pop() {
                        Some(Partial::Array(items)) => Value::Array(items),
                        Some(Partial::Object(map, _)) => Value::Object(map),
                        None => Value::Null,
                    };
                    self.read().await?;
                    value
                }
                other => {
                    return Err(JsonError::UnexpectedNode {
                        expected: "value".into(),
                        found: other.to_string(),
                    })
                }
            };
            match open.last_mut() {
                None => return Ok(completed),
                Some(Partial::Array(items)) => items.push(completed),
                Some(Partial::Object(map, pending)) => {
                    if let Some(name) = pending.take() {
                        map.insert(name, completed);
                    }
                }
            }
        }
    }

    /// Pre: on the first node of a value. Post: on the node after it.
    pub async fn skip_value(&mut self) -> JsonResult<()> {
        match self.node_type {
            JsonNodeType::PrimitiveValue => {
                self.read().await?;
                Ok(())
            }
            JsonNodeType::StartArray | JsonNodeType::StartObject => {
                let depth = self.depth;
                loop {
                    self.read().await?;
                    let closed = matches!(
                        self.node_type,
                        JsonNodeType::EndArray | JsonNodeType::EndObject
                    );
                    if closed && self.depth == depth - 1 {
                        break;
                    }
                    if self.node_type == JsonNodeType::EndOfInput {
                        return Err(JsonError::Syntax("input ended inside a value".into()));
                    }
                }
                self.read().await?;
                Ok(())
            }
            _ => Err(JsonError::UnexpectedNode {
                expected: "value".into(),
                found: self.node_type.to_string(),
            }),
        }
    }
}

/// A container of [`JsonReader::read_value`] still being filled.
enum Partial {
    Array(Vec<Value>),
    /// Members so far, plus the name whose value is being read.
    Object(Map<String, Value>, Option<String>),
}

fn owned_token(event: JsonEvent<'_>) -> JsonResult<(JsonNodeType, Option<Value>)> {
    Ok(match event {
        JsonEvent::StartObject => (JsonNodeType::StartObject, None),
        JsonEvent::EndObject => (JsonNodeType::EndObject, None),
        JsonEvent::StartArray => (JsonNodeType::StartArray, None),
        JsonEvent::EndArray => (JsonNodeType::EndArray, None),
        JsonEvent::ObjectKey(name) => (JsonNodeType::Property, Some(Value::String(name.into_owned()))),
        JsonEvent::String(s) => (JsonNodeType::PrimitiveValue, Some(Value::String(s.into_owned()))),
        JsonEvent::Number(raw) => {
            let number = raw
                .parse::<Number>()
                .map_err(|e| JsonError::Syntax(format!("number {raw}: {e}")))?;
            (JsonNodeType::PrimitiveValue, Some(Value::Number(number)))
        }
        JsonEvent::Boolean(b) => (JsonNodeType::PrimitiveValue, Some(Value::Bool(b))),
        JsonEvent::Null => (JsonNodeType::PrimitiveValue, Some(Value::Null)),
        JsonEvent::Eof => (JsonNodeType::EndOfInput, None),
    })
}

fn parse_error(e: ParseError) -> JsonError {
    match e {
        ParseError::Io(e) => JsonError::Io(e),
        ParseError::Syntax(e) => JsonError::Syntax(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use proptest::prelude::*;
    use serde_json::json;
    use std::future::Future;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    /// Drive a read over a blocking source.
    fn now<T>(f: impl Future<Output = T>) -> T {
        f.now_or_never().expect("blocking source never pends")
    }

    fn nodes(input: &str) -> Vec<JsonNodeType> {
        let mut r = JsonReader::from_str(input);
        let mut out = Vec::new();
        loop {
            let n = now(r.read()).unwrap();
            out.push(n);
            if n == JsonNodeType::EndOfInput {
                break;
            }
        }
        out
    }

    #[test]
    fn tokenizes_object_with_array() {
        use JsonNodeType::*;
        assert_eq!(
            nodes(r#" {"a": [1, "x", null], "b": {}} "#),
            vec![
                StartObject, Property, StartArray, PrimitiveValue, PrimitiveValue,
                PrimitiveValue, EndArray, Property, StartObject, EndObject, EndObject,
                EndOfInput
            ]
        );
    }

    #[test]
    fn preserves_duplicate_names() {
        let mut r = JsonReader::from_str(r#"{"a":1,"a":2}"#);
        now(r.read()).unwrap();
        now(r.read_start_object()).unwrap();
        assert_eq!(now(r.read_property_name()).unwrap(), "a");
        assert_eq!(now(r.read_primitive_value()).unwrap(), json!(1));
        assert_eq!(now(r.read_property_name()).unwrap(), "a");
        assert_eq!(now(r.read_primitive_value()).unwrap(), json!(2));
        now(r.read_end_object()).unwrap();
        assert_eq!(r.node_type(), JsonNodeType::EndOfInput);
    }

    #[test]
    fn read_value_collects_nested() {
        let mut r = JsonReader::from_str(r#"{"v":{"z":1,"a":[true,{"k":"s"},[]]},"w":0}"#);
        now(r.read()).unwrap();
        now(r.read_start_object()).unwrap();
        now(r.read_property_name()).unwrap();
        let v = now(r.read_value()).unwrap();
        assert_eq!(v, json!({"z":1,"a":[true,{"k":"s"},[]]}));
        assert_eq!(r.property_name(), Some("w"));
        assert_eq!(r.depth(), 1);
    }

    #[test]
    fn skip_value_leaves_reader_after_value() {
        let mut r = JsonReader::from_str(r#"[[1,[2]],{"a":{}},3]"#);
        now(r.read()).unwrap();
        now(r.read_start_array()).unwrap();
        now(r.skip_value()).unwrap();
        now(r.skip_value()).unwrap();
        assert_eq!(now(r.read_primitive_value()).unwrap(), json!(3));
        assert_eq!(r.node_type(), JsonNodeType::EndArray);
    }

    #[test]
    fn syntax_errors_are_reported() {
        let mut r = JsonReader::from_str(r#"{"a" 1}"#);
        now(r.read()).unwrap();
        assert!(matches!(now(r.read()), Err(JsonError::Syntax(_))));

        let mut r = JsonReader::from_str("[1 2]");
        now(r.read()).unwrap();
        now(r.read()).unwrap();
        assert!(now(r.read()).is_err());

        let mut r = JsonReader::from_str("{} x");
        now(r.read()).unwrap();
        now(r.read()).unwrap();
        assert!(matches!(now(r.read()), Err(JsonError::Syntax(_))));
    }

    #[test]
    fn truncated_input_is_a_syntax_error() {
        let mut r = JsonReader::from_str(r#"{"a":"#);
        now(r.read()).unwrap();
        now(r.read()).unwrap();
        assert!(matches!(now(r.read()), Err(JsonError::Syntax(_))));
    }

    #[test]
    fn positioned_helpers_check_node_type() {
        let mut r = JsonReader::from_str("[]");
        now(r.read()).unwrap();
        assert!(matches!(
            now(r.read_start_object()),
            Err(JsonError::UnexpectedNode { .. })
        ));
    }

    /// Yields its bytes, then fails every later read.
    struct FailsAfter(Cursor<Vec<u8>>);

    impl Read for FailsAfter {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.0.read(buf)? {
                0 => Err(std::io::Error::other("connection reset")),
                n => Ok(n),
            }
        }
    }

    #[test]
    fn blocking_source_is_read_on_demand() {
        let source = FailsAfter(Cursor::new(br#"{"a":[1,"#.to_vec()));
        let mut r = JsonReader::from_reader(source);
        assert!(!r.is_async());
        assert_eq!(now(r.read()).unwrap(), JsonNodeType::StartObject);
        assert_eq!(now(r.read()).unwrap(), JsonNodeType::Property);
        assert_eq!(now(r.read()).unwrap(), JsonNodeType::StartArray);
        assert_eq!(now(r.read()).unwrap(), JsonNodeType::PrimitiveValue);
        assert!(matches!(now(r.read()), Err(JsonError::Io(_))));
    }

    #[tokio::test]
    async fn async_source_yields_tokens_before_the_input_is_complete() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut r = JsonReader::from_async_reader(server);
        assert!(r.is_async());
        client.write_all(br#"{"n":"#).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), async {
            (r.read().await.unwrap(), r.read().await.unwrap())
        })
        .await
        .unwrap();
        assert_eq!(first, (JsonNodeType::StartObject, JsonNodeType::Property));

        client.write_all(b"[2]}").await.unwrap();
        drop(client);
        assert_eq!(r.read_property_name().await.unwrap(), "n");
        assert_eq!(r.read_value().await.unwrap(), json!([2]));
        r.read_end_object().await.unwrap();
        assert_eq!(r.node_type(), JsonNodeType::EndOfInput);
    }

    proptest! {
        #[test]
        fn strings_survive_writer_then_reader(s in ".*") {
            let mut w = crate::writer::JsonWriter::in_memory();
            w.start_array_scope().unwrap();
            w.write_str(&s).unwrap();
            w.end_array_scope().unwrap();
            let bytes = w.into_bytes();
            let mut r = JsonReader::from_bytes(bytes);
            now(r.read()).unwrap();
            now(r.read_start_array()).unwrap();
            prop_assert_eq!(now(r.read_primitive_value()).unwrap(), Value::String(s));
        }
    }
}
