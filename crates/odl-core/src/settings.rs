use serde::{Deserialize, Serialize};

use crate::error::{ODataError, ODataResult};
use crate::version::ODataVersion;

/// Default for `max_nesting_depth` on both sides.
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 100;

/// Default async auto-flush threshold in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 84 * 1024;

/// Calling convention fixed when a reader or writer is created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    #[default]
    Synchronous,
    Asynchronous,
}

/// How much control information a response carries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataLevel {
    None,
    #[default]
    Minimal,
    Full,
}

// ---------------------------------------------------------------------------
// WriterSettings
// ---------------------------------------------------------------------------

/// Configuration for a writer instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterSettings {
    pub version: ODataVersion,
    /// Responses carry context URLs, counts and links; requests carry
    /// entity reference links.
    pub is_response: bool,
    /// Maximum number of simultaneously open resources.
    pub max_nesting_depth: usize,
    pub metadata_level: MetadataLevel,
    /// Service root used for context URLs and conventional links, with a
    /// trailing slash (`http://host/svc/`).
    pub service_root: Option<String>,
    /// `$select`/`$expand` projection applied to the top-level scope.
    pub select_clause: Option<String>,
    /// Write `odata.null: true` for null top-level values (4.0 only).
    pub enable_legacy_null_annotation: bool,
    /// Conventional keys as path segments (`Customers/1`) instead of
    /// parentheses (`Customers(1)`).
    pub key_as_segment: bool,
    /// Async writers flush once this many bytes are buffered.
    pub buffer_size: usize,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            version: ODataVersion::V4,
            is_response: true,
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
            metadata_level: MetadataLevel::Minimal,
            service_root: None,
            select_clause: None,
            enable_legacy_null_annotation: false,
            key_as_segment: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl WriterSettings {
    pub fn response() -> Self {
        Self::default()
    }

    pub fn request() -> Self {
        Self {
            is_response: false,
            ..Self::default()
        }
    }

    pub fn with_service_root(mut self, root: impl Into<String>) -> Self {
        self.service_root = Some(normalize_root(root.into()));
        self
    }

    pub fn with_select(mut self, clause: impl Into<String>) -> Self {
        self.select_clause = Some(clause.into());
        self
    }

    pub fn with_metadata_level(mut self, level: MetadataLevel) -> Self {
        self.metadata_level = level;
        self
    }

    pub fn with_max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }

    /// `$metadata` document URI derived from the service root.
    pub fn metadata_document_uri(&self) -> Option<String> {
        self.service_root.as_ref().map(|root| format!("{root}$metadata"))
    }

    /// The legacy `odata.null` form only exists before 4.01.
    pub fn writes_legacy_null(&self) -> bool {
        self.enable_legacy_null_annotation && self.version < ODataVersion::V401
    }

    pub fn validate(&self) -> ODataResult<()> {
        if self.max_nesting_depth == 0 {
            return Err(ODataError::InvalidSettings(
                "max_nesting_depth must be at least 1".into(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(ODataError::InvalidSettings(
                "buffer_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn from_toml_str(text: &str) -> ODataResult<Self> {
        let mut settings: Self =
            toml::from_str(text).map_err(|e| ODataError::InvalidSettings(e.to_string()))?;
        settings.service_root = settings.service_root.map(normalize_root);
        settings.validate()?;
        Ok(settings)
    }
}

// ---------------------------------------------------------------------------
// ReaderSettings
// ---------------------------------------------------------------------------

/// Configuration for a reader instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderSettings {
    pub version: ODataVersion,
    pub is_response: bool,
    pub max_nesting_depth: usize,
    pub validate_duplicate_properties: bool,
    /// Accept undeclared properties on non-open types as untyped values
    /// instead of failing. Ignored for the core model, which accepts them
    /// always.
    pub read_untyped_open_values: bool,
    /// Service root used by the conventional metadata builder.
    pub service_root: Option<String>,
    pub key_as_segment: bool,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            version: ODataVersion::V4,
            is_response: true,
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
            validate_duplicate_properties: true,
            read_untyped_open_values: false,
            service_root: None,
            key_as_segment: false,
        }
    }
}

impl ReaderSettings {
    pub fn response() -> Self {
        Self::default()
    }

    pub fn request() -> Self {
        Self {
            is_response: false,
            ..Self::default()
        }
    }

    pub fn with_service_root(mut self, root: impl Into<String>) -> Self {
        self.service_root = Some(normalize_root(root.into()));
        self
    }

    pub fn validate(&self) -> ODataResult<()> {
        if self.max_nesting_depth == 0 {
            return Err(ODataError::InvalidSettings(
                "max_nesting_depth must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn from_toml_str(text: &str) -> ODataResult<Self> {
        let mut settings: Self =
            toml::from_str(text).map_err(|e| ODataError::InvalidSettings(e.to_string()))?;
        settings.service_root = settings.service_root.map(normalize_root);
        settings.validate()?;
        Ok(settings)
    }
}

fn normalize_root(mut root: String) -> String {
    if !root.ends_with('/') {
        root.push('/');
    }
    root
}
