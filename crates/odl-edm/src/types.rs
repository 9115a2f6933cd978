use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EdmError, EdmResult};

/// Primitive types understood by the JSON core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdmPrimitiveKind {
    Boolean,
    Byte,
    Int16,
    Int32,
    Int64,
    Single,
    Double,
    Decimal,
    String,
    Guid,
    Date,
    DateTimeOffset,
    Duration,
    Binary,
}

impl EdmPrimitiveKind {
    /// Qualified name as it appears in `odata.type` annotations and CSDL.
    pub fn full_name(&self) -> &'static str {
        match self {
            Self::Boolean => "Edm.Boolean",
            Self::Byte => "Edm.Byte",
            Self::Int16 => "Edm.Int16",
            Self::Int32 => "Edm.Int32",
            Self::Int64 => "Edm.Int64",
            Self::Single => "Edm.Single",
            Self::Double => "Edm.Double",
            Self::Decimal => "Edm.Decimal",
            Self::String => "Edm.String",
            Self::Guid => "Edm.Guid",
            Self::Date => "Edm.Date",
            Self::DateTimeOffset => "Edm.DateTimeOffset",
            Self::Duration => "Edm.Duration",
            Self::Binary => "Edm.Binary",
        }
    }

    /// Resolve a qualified primitive name. Accepts the short form used in
    /// JSON type annotations (`#Int32`) as well as the `Edm.` form.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim_start_matches('#');
        let short = name.strip_prefix("Edm.").unwrap_or(name);
        let kind = match short {
            "Boolean" => Self::Boolean,
            "Byte" => Self::Byte,
            "Int16" => Self::Int16,
            "Int32" => Self::Int32,
            "Int64" => Self::Int64,
            "Single" => Self::Single,
            "Double" => Self::Double,
            "Decimal" => Self::Decimal,
            "String" => Self::String,
            "Guid" => Self::Guid,
            "Date" => Self::Date,
            "DateTimeOffset" => Self::DateTimeOffset,
            "Duration" => Self::Duration,
            "Binary" => Self::Binary,
            _ => return None,
        };
        Some(kind)
    }

    /// Returns `true` for the integral kinds that JSON carries as numbers.
    pub fn is_integral(&self) -> bool {
        matches!(self, Self::Byte | Self::Int16 | Self::Int32 | Self::Int64)
    }
}

impl fmt::Display for EdmPrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.full_name())
    }
}

/// A reference to a property or element type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdmTypeRef {
    Primitive(EdmPrimitiveKind),
    /// Entity or complex type, by qualified name.
    Structured(String),
    Collection(Box<EdmTypeRef>),
    /// `Edm.Untyped`: any JSON value is accepted as-is.
    Untyped,
}

impl EdmTypeRef {
    pub fn collection(element: EdmTypeRef) -> Self {
        Self::Collection(Box::new(element))
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, Self::Collection(_))
    }

    /// Element type of a collection, or the type itself.
    pub fn element_type(&self) -> &EdmTypeRef {
        match self {
            Self::Collection(inner) => inner,
            other => other,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self.element_type(), Self::Structured(_))
    }

    /// Qualified name, e.g. `Collection(Edm.String)`.
    pub fn full_name(&self) -> String {
        match self {
            Self::Primitive(kind) => kind.full_name().to_string(),
            Self::Structured(name) => name.clone(),
            Self::Collection(inner) => format!("Collection({})", inner.full_name()),
            Self::Untyped => "Edm.Untyped".to_string(),
        }
    }

    /// Parse a qualified type name. Primitive names resolve to
    /// [`EdmTypeRef::Primitive`]; anything else dotted is treated as a
    /// structured type reference to be checked against a model later.
    pub fn parse(name: &str) -> EdmResult<Self> {
        let name = name.trim().trim_start_matches('#');
        if let Some(inner) = name
            .strip_prefix("Collection(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            return Ok(Self::collection(Self::parse(inner)?));
        }
        if name == "Edm.Untyped" {
            return Ok(Self::Untyped);
        }
        if let Some(kind) = EdmPrimitiveKind::from_name(name) {
            return Ok(Self::Primitive(kind));
        }
        if name.is_empty() || !name.contains('.') || name.ends_with('.') {
            return Err(EdmError::InvalidTypeName(name.to_string()));
        }
        Ok(Self::Structured(name.to_string()))
    }
}

impl fmt::Display for EdmTypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}
