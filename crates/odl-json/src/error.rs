use thiserror::Error;

/// Errors raised by the JSON token layer.
#[derive(Debug, Error)]
pub enum JsonError {
    #[error("invalid writer state: {0}")]
    InvalidWriterState(String),

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("unexpected node: expected {expected}, found {found}")]
    UnexpectedNode { expected: String, found: String },

    #[error("input source is not ready; read it through the async entry point")]
    WouldBlock,

    #[error("sink does not support {0}")]
    WrongSink(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for JsonError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Self::Io(e.into())
        } else {
            Self::InvalidWriterState(e.to_string())
        }
    }
}

pub type JsonResult<T> = Result<T, JsonError>;
