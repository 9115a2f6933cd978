use std::fmt;
use std::io::{self, BufWriter, Write};
use std::pin::Pin;

use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::{JsonError, JsonResult};

/// Where tokens go.
pub enum OutputSink {
    /// Keep everything in memory; retrieve with [`JsonWriter::into_bytes`].
    Memory,
    /// Tokens are written through a `BufWriter` as they are produced.
    Sync(Box<dyn Write + Send>),
    /// Tokens collect in memory until [`JsonWriter::flush_async`].
    Async(Pin<Box<dyn AsyncWrite + Send>>),
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "Memory"),
            Self::Sync(_) => write!(f, "Sync"),
            Self::Async(_) => write!(f, "Async"),
        }
    }
}

enum Target {
    Memory(Vec<u8>),
    Blocking(BufWriter<Box<dyn Write + Send>>),
    Async {
        pending: Vec<u8>,
        sink: Pin<Box<dyn AsyncWrite + Send>>,
    },
}

/// Byte-counting front of the current target.
struct Output {
    target: Target,
    written: u64,
}

impl Output {
    fn held(&self) -> &[u8] {
        match &self.target {
            Target::Memory(bytes) | Target::Async { pending: bytes, .. } => bytes,
            Target::Blocking(w) => w.buffer(),
        }
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = match &mut self.target {
            Target::Memory(bytes) | Target::Async { pending: bytes, .. } => {
                bytes.extend_from_slice(buf);
                buf.len()
            }
            Target::Blocking(w) => w.write(buf)?,
        };
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.target {
            Target::Blocking(w) => w.flush(),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.target {
            Target::Memory(_) => "Memory",
            Target::Blocking(_) => "Sync",
            Target::Async { .. } => "Async",
        };
        f.debug_struct("Output")
            .field("sink", &kind)
            .field("written", &self.written)
            .field("held", &self.held().len())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ScopeKind {
    Object,
    Array,
}

#[derive(Debug)]
struct WriterScope {
    kind: ScopeKind,
    count: usize,
    /// Object scopes only: a name was written and its value is pending.
    name_pending: bool,
}

/// Scoped JSON token writer.
///
/// Over a blocking sink every token is written through to the sink as it is
/// produced, so only the `BufWriter`'s buffer is ever held in memory. An
/// async sink cannot be written from a synchronous call; its tokens are
/// held until [`JsonWriter::flush_async`].
#[derive(Debug)]
pub struct JsonWriter {
    out: Output,
    scopes: Vec<WriterScope>,
    root_written: bool,
}

impl JsonWriter {
    pub fn new(sink: OutputSink) -> Self {
        let target = match sink {
            OutputSink::Memory => Target::Memory(Vec::with_capacity(1024)),
            OutputSink::Sync(w) => Target::Blocking(BufWriter::new(w)),
            OutputSink::Async(sink) => Target::Async {
                pending: Vec::with_capacity(1024),
                sink,
            },
        };
        Self {
            out: Output { target, written: 0 },
            scopes: Vec::new(),
            root_written: false,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(OutputSink::Memory)
    }

    pub fn to_writer(writer: impl Write + Send + 'static) -> Self {
        Self::new(OutputSink::Sync(Box::new(writer)))
    }

    pub fn to_async_writer(writer: impl AsyncWrite + Send + 'static) -> Self {
        Self::new(OutputSink::Async(Box::pin(writer)))
    }

    // ---- Token emission ----

    pub fn start_object_scope(&mut self) -> JsonResult<()> {
        self.before_value()?;
        self.out.write_all(b"{")?;
        self.scopes.push(WriterScope {
            kind: ScopeKind::Object,
            count: 0,
            name_pending: false,
        });
        Ok(())
    }

    pub fn end_object_scope(&mut self) -> JsonResult<()> {
        match self.scopes.last() {
            Some(s) if s.kind == ScopeKind::Object && !s.name_pending => {}
            Some(s) if s.kind == ScopeKind::Object => {
                return Err(JsonError::InvalidWriterState(
                    "object closed while a property value is pending".into(),
                ))
            }
            _ => {
                return Err(JsonError::InvalidWriterState(
                    "end_object_scope outside an object".into(),
                ))
            }
        }
        self.scopes.pop();
        self.out.write_all(b"}")?;
        self.after_value();
        Ok(())
    }

    pub fn start_array_scope(&mut self) -> JsonResult<()> {
        self.before_value()?;
        self.out.write_all(b"[")?;
        self.scopes.push(WriterScope {
            kind: ScopeKind::Array,
            count: 0,
            name_pending: false,
        });
        Ok(())
    }

    pub fn end_array_scope(&mut self) -> JsonResult<()> {
        match self.scopes.last() {
            Some(s) if s.kind == ScopeKind::Array => {}
            _ => {
                return Err(JsonError::InvalidWriterState(
                    "end_array_scope outside an array".into(),
                ))
            }
        }
        self.scopes.pop();
        self.out.write_all(b"]")?;
        self.after_value();
        Ok(())
    }

    /// Write a member name inside the current object.
    pub fn write_name(&mut self, name: &str) -> JsonResult<()> {
        let scope = match self.scopes.last_mut() {
            Some(s) if s.kind == ScopeKind::Object => s,
            _ => {
                return Err(JsonError::InvalidWriterState(format!(
                    "name {name:?} written outside an object"
                )))
            }
        };
        if scope.name_pending {
            return Err(JsonError::InvalidWriterState(format!(
                "name {name:?} written while another name awaits its value"
            )));
        }
        if scope.count > 0 {
            self.out.write_all(b",")?;
        }
        scope.name_pending = true;
        serde_json::to_writer(&mut self.out, name)?;
        self.out.write_all(b":")?;
        Ok(())
    }

    /// Write a complete JSON value (primitive or nested).
    pub fn write_value(&mut self, value: &Value) -> JsonResult<()> {
        self.before_value()?;
        serde_json::to_writer(&mut self.out, value)?;
        self.after_value();
        Ok(())
    }

    pub fn write_null(&mut self) -> JsonResult<()> {
        self.write_value(&Value::Null)
    }

    pub fn write_str(&mut self, value: &str) -> JsonResult<()> {
        self.before_value()?;
        serde_json::to_writer(&mut self.out, value)?;
        self.after_value();
        Ok(())
    }

    /// Shorthand for `write_name` followed by `write_value`.
    pub fn write_property(&mut self, name: &str, value: &Value) -> JsonResult<()> {
        self.write_name(name)?;
        self.write_value(value)
    }

    fn before_value(&mut self) -> JsonResult<()> {
        match self.scopes.last_mut() {
            None if self.root_written => Err(JsonError::InvalidWriterState(
                "a second top-level value was started".into(),
            )),
            None => Ok(()),
            Some(s) if s.kind == ScopeKind::Object && !s.name_pending => Err(
                JsonError::InvalidWriterState("value written in an object without a name".into()),
            ),
            Some(s) if s.kind == ScopeKind::Array => {
                if s.count > 0 {
                    self.out.write_all(b",")?;
                }
                Ok(())
            }
            Some(_) => Ok(()),
        }
    }

    fn after_value(&mut self) {
        match self.scopes.last_mut() {
            Some(s) => {
                s.count += 1;
                s.name_pending = false;
            }
            None => self.root_written = true,
        }
    }

    // ---- Introspection ----

    /// Current nesting depth of open objects and arrays.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Returns `true` when the innermost open scope is an array.
    pub fn in_array(&self) -> bool {
        matches!(self.scopes.last(), Some(s) if s.kind == ScopeKind::Array)
    }

    /// Returns `true` once a complete top-level value has been written.
    pub fn is_complete(&self) -> bool {
        self.root_written && self.scopes.is_empty()
    }

    /// Bytes produced but not yet handed to the sink.
    pub fn buffered_len(&self) -> usize {
        self.out.held().len()
    }

    /// Bytes handed to the sink so far.
    pub fn flushed_len(&self) -> u64 {
        self.out.written - self.out.held().len() as u64
    }

    pub fn is_async(&self) -> bool {
        matches!(self.out.target, Target::Async { .. })
    }

    // ---- Output ----

    /// Push whatever the `BufWriter` still holds to a blocking sink. No-op
    /// for memory sinks.
    pub fn flush(&mut self) -> JsonResult<()> {
        match &mut self.out.target {
            Target::Memory(_) => Ok(()),
            Target::Blocking(w) => {
                let held = w.buffer().len();
                w.flush()?;
                trace!(bytes = held, "json flush");
                Ok(())
            }
            Target::Async { .. } => Err(JsonError::WrongSink("blocking flush")),
        }
    }

    /// Hand held bytes to an async sink. No-op for memory sinks.
    pub async fn flush_async(&mut self) -> JsonResult<()> {
        match &mut self.out.target {
            Target::Memory(_) => Ok(()),
            Target::Async { pending, sink } => {
                sink.write_all(pending.as_slice()).await?;
                sink.flush().await?;
                trace!(bytes = pending.len(), "json async flush");
                pending.clear();
                Ok(())
            }
            Target::Blocking(_) => Err(JsonError::WrongSink("async flush")),
        }
    }

    /// Consume the writer and return the bytes still held in memory. A
    /// blocking sink is flushed first; anything it fails to take is
    /// returned.
    pub fn into_bytes(self) -> Vec<u8> {
        match self.out.target {
            Target::Memory(bytes) | Target::Async { pending: bytes, .. } => bytes,
            Target::Blocking(w) => match w.into_inner() {
                Ok(_) => Vec::new(),
                Err(e) => e.into_inner().buffer().to_vec(),
            },
        }
    }

    /// Borrow the bytes still held in memory.
    pub fn buffered(&self) -> &[u8] {
        self.out.held()
    }
}
