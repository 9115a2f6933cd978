use odl_edm::EdmError;
use odl_json::JsonError;
use thiserror::Error;

/// Errors raised by the reader and writer cores.
///
/// Every variant is fatal to the reader or writer instance that raised it,
/// except the sync/async misuse variants, which are reported before any
/// state is touched.
#[derive(Debug, Error)]
pub enum ODataError {
    // ---- Invalid transitions ----
    #[error("invalid transition from state {from} to state {to}")]
    InvalidTransition { from: String, to: String },

    #[error("invalid transition from state Completed to state {to}; nothing more can be written or read")]
    InvalidTransitionFromCompleted { to: String },

    #[error("invalid transition from state Error to state {to}; the instance must be discarded")]
    InvalidTransitionFromError { to: String },

    #[error("write_end called in state {0}, which has nothing open to end")]
    WriteEndInInvalidState(String),

    // ---- Sync/async misuse ----
    #[error("synchronous call on an instance created for asynchronous use")]
    SyncCallOnAsyncInstance,

    #[error("asynchronous call on an instance created for synchronous use")]
    AsyncCallOnSyncInstance,

    // ---- Protocol and model consistency ----
    #[error("maximum nesting depth of {0} exceeded")]
    MaxNestingDepthExceeded(usize),

    #[error("more than one item written into the content of navigation link {0}")]
    MultipleItemsInNavigationLinkContent(String),

    #[error("entity reference link written into navigation link {0} after its expanded content")]
    EntityReferenceLinkAfterExpandedContent(String),

    #[error("navigation link {name} is declared as collection={declared} but the model says collection={model}")]
    NavigationLinkCardinalityMismatch {
        name: String,
        declared: bool,
        model: bool,
    },

    #[error("navigation link {name} expects {expected} content but {found} was written")]
    NavigationLinkContentMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("navigation property {property} is not declared on type {type_name}")]
    UnknownNavigationProperty { type_name: String, property: String },

    #[error("property {property} is not declared on non-open type {type_name}")]
    OpenPropertyNotAllowed { type_name: String, property: String },

    #[error("unknown type {0}")]
    UnknownType(String),

    #[error("unknown navigation source {0}")]
    UnknownNavigationSource(String),

    #[error("resource type {actual} is not compatible with expected type {expected}")]
    ResourceTypeMismatch { expected: String, actual: String },

    #[error("property {0} is declared non-nullable but a null value was supplied")]
    NullValueForNonNullableProperty(String),

    #[error("{0} may only be written in a response payload")]
    ResponseOnlyAnnotation(&'static str),

    #[error("top-level property {0} is null; a null top-level property must be reported as no content")]
    TopLevelNullProperty(String),

    #[error("top-level property {0} has a resource value; write it as a resource instead")]
    ResourceValuedTopLevelProperty(String),

    #[error("entity reference links may only be written in a request payload")]
    EntityReferenceLinkInResponse,

    #[error("entity reference link must have a non-empty URL")]
    EmptyEntityReferenceLink,

    #[error("deferred navigation link {0} may not be written in a request payload")]
    DeferredLinkInRequest(String),

    #[error("navigation link must have a non-empty name")]
    NavigationLinkWithoutName,

    #[error("odata.count may only be written in a response payload")]
    CountInRequest,

    #[error("delta payloads may only be written in a response")]
    DeltaPayloadInRequest,

    #[error("annotation {annotation} is not valid on property {property}")]
    InvalidPropertyAnnotation { property: String, annotation: String },

    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    // ---- Duplicate data ----
    #[error("duplicate property name {0} within one resource")]
    DuplicatePropertyName(String),

    #[error("duplicate annotation {annotation} on property {property}")]
    DuplicateAnnotation { property: String, annotation: String },

    #[error("resource annotation {0} appears after a property; odata annotations must come first")]
    ResourceAnnotationAfterProperty(String),

    #[error("annotation {annotation} for property {property} appears after the property value")]
    PropertyAnnotationAfterProperty { property: String, annotation: String },

    // ---- Context URLs and payload shape ----
    #[error("top-level payload has no odata.context annotation")]
    ContextUrlMissing,

    #[error("invalid context URL {url}: {reason}")]
    InvalidContextUrl { url: String, reason: String },

    #[error("context URL names {found} but {expected} was expected")]
    ContextUrlMismatch { expected: String, found: String },

    #[error("unexpected JSON node {found} while {context}; expected {expected}")]
    UnexpectedNode {
        context: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("in-stream error {code}: {message}")]
    InStreamError { code: String, message: String },

    // ---- Configuration ----
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error(transparent)]
    Json(#[from] JsonError),

    #[error(transparent)]
    Edm(#[from] EdmError),
}

pub type ODataResult<T> = Result<T, ODataError>;

impl ODataError {
    /// Returns `true` for the misuse errors that leave the instance
    /// untouched.
    pub fn is_mode_misuse(&self) -> bool {
        matches!(
            self,
            Self::SyncCallOnAsyncInstance | Self::AsyncCallOnSyncInstance
        )
    }
}
