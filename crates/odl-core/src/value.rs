use odl_edm::{EdmPrimitiveKind, EdmTypeRef};
use serde_json::{Number, Value};

use crate::error::{ODataError, ODataResult};

// ---------------------------------------------------------------------------
// ODataPrimitiveValue
// ---------------------------------------------------------------------------

/// A typed primitive. Kinds without a native JSON form keep their canonical
/// string representation.
#[derive(Clone, Debug, PartialEq)]
pub enum ODataPrimitiveValue {
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    Decimal(String),
    String(String),
    Guid(String),
    Date(String),
    DateTimeOffset(String),
    Duration(String),
    Binary(String),
}

impl ODataPrimitiveValue {
    pub fn kind(&self) -> EdmPrimitiveKind {
        match self {
            Self::Boolean(_) => EdmPrimitiveKind::Boolean,
            Self::Int32(_) => EdmPrimitiveKind::Int32,
            Self::Int64(_) => EdmPrimitiveKind::Int64,
            Self::Double(_) => EdmPrimitiveKind::Double,
            Self::Decimal(_) => EdmPrimitiveKind::Decimal,
            Self::String(_) => EdmPrimitiveKind::String,
            Self::Guid(_) => EdmPrimitiveKind::Guid,
            Self::Date(_) => EdmPrimitiveKind::Date,
            Self::DateTimeOffset(_) => EdmPrimitiveKind::DateTimeOffset,
            Self::Duration(_) => EdmPrimitiveKind::Duration,
            Self::Binary(_) => EdmPrimitiveKind::Binary,
        }
    }

    /// JSON form. Non-finite doubles are written as the strings `NaN`,
    /// `INF` and `-INF`.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Boolean(b) => Value::Bool(*b),
            Self::Int32(n) => Value::from(*n),
            Self::Int64(n) => Value::from(*n),
            Self::Double(d) if d.is_nan() => Value::String("NaN".into()),
            Self::Double(d) if d.is_infinite() && *d > 0.0 => Value::String("INF".into()),
            Self::Double(d) if d.is_infinite() => Value::String("-INF".into()),
            Self::Double(d) => Number::from_f64(*d).map(Value::Number).unwrap_or(Value::Null),
            Self::Decimal(s) => serde_json::from_str::<Number>(s)
                .map(Value::Number)
                .unwrap_or_else(|_| Value::String(s.clone())),
            Self::String(s)
            | Self::Guid(s)
            | Self::Date(s)
            | Self::DateTimeOffset(s)
            | Self::Duration(s)
            | Self::Binary(s) => Value::String(s.clone()),
        }
    }

    /// Convert a JSON primitive, guided by the declared kind when known.
    pub fn from_json(name: &str, value: &Value, kind: Option<EdmPrimitiveKind>) -> ODataResult<Self> {
        let invalid = |reason: &str| ODataError::InvalidValue {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        let Some(kind) = kind else {
            return Self::infer(value).ok_or_else(|| invalid("not a primitive value"));
        };
        let converted = match (kind, value) {
            (EdmPrimitiveKind::Boolean, Value::Bool(b)) => Self::Boolean(*b),
            (EdmPrimitiveKind::Int32 | EdmPrimitiveKind::Int16 | EdmPrimitiveKind::Byte, Value::Number(n)) => {
                let n = n
                    .as_i64()
                    .and_then(|v| i32::try_from(v).ok())
                    .ok_or_else(|| invalid("not a 32-bit integer"))?;
                Self::Int32(n)
            }
            (EdmPrimitiveKind::Int64, Value::Number(n)) => {
                Self::Int64(n.as_i64().ok_or_else(|| invalid("not a 64-bit integer"))?)
            }
            (EdmPrimitiveKind::Int64, Value::String(s)) => {
                Self::Int64(s.parse().map_err(|_| invalid("not a 64-bit integer"))?)
            }
            (EdmPrimitiveKind::Double | EdmPrimitiveKind::Single, Value::Number(n)) => {
                Self::Double(n.as_f64().ok_or_else(|| invalid("not a number"))?)
            }
            (EdmPrimitiveKind::Double | EdmPrimitiveKind::Single, Value::String(s)) => {
                let d = match s.as_str() {
                    "NaN" => f64::NAN,
                    "INF" => f64::INFINITY,
                    "-INF" => f64::NEG_INFINITY,
                    other => other.parse().map_err(|_| invalid("not a number"))?,
                };
                Self::Double(d)
            }
            (EdmPrimitiveKind::Decimal, Value::Number(n)) => Self::Decimal(n.to_string()),
            (EdmPrimitiveKind::Decimal, Value::String(s)) => Self::Decimal(s.clone()),
            (EdmPrimitiveKind::String, Value::String(s)) => Self::String(s.clone()),
            (EdmPrimitiveKind::Guid, Value::String(s)) => Self::Guid(s.clone()),
            (EdmPrimitiveKind::Date, Value::String(s)) => Self::Date(s.clone()),
            (EdmPrimitiveKind::DateTimeOffset, Value::String(s)) => Self::DateTimeOffset(s.clone()),
            (EdmPrimitiveKind::Duration, Value::String(s)) => Self::Duration(s.clone()),
            (EdmPrimitiveKind::Binary, Value::String(s)) => Self::Binary(s.clone()),
            (kind, _) => return Err(invalid(&format!("expected {kind}"))),
        };
        Ok(converted)
    }

    /// Kind inference for values with no declared type: integers that fit
    /// 32 bits become `Int32`, larger ones `Int64`, other numbers `Double`.
    pub fn infer(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Boolean(*b)),
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Number(n) => Some(match n.as_i64() {
                Some(v) => match i32::try_from(v) {
                    Ok(small) => Self::Int32(small),
                    Err(_) => Self::Int64(v),
                },
                None => Self::Double(n.as_f64().unwrap_or(f64::NAN)),
            }),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// ODataValue
// ---------------------------------------------------------------------------

/// Ordered collection of values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ODataCollectionValue {
    /// `Collection(...)` type name, written as `Prop@odata.type` when the
    /// declared type cannot be inferred.
    pub type_name: Option<String>,
    pub items: Vec<ODataValue>,
}

/// Value of a property or instance annotation.
#[derive(Clone, Debug, PartialEq)]
pub enum ODataValue {
    Null,
    Primitive(ODataPrimitiveValue),
    Collection(ODataCollectionValue),
    /// JSON passed through as-is (`Edm.Untyped` and unknown annotations).
    Untyped(Value),
}

impl ODataValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn collection(items: impl IntoIterator<Item = ODataValue>) -> Self {
        Self::Collection(ODataCollectionValue {
            type_name: None,
            items: items.into_iter().collect(),
        })
    }

    pub fn as_primitive(&self) -> Option<&ODataPrimitiveValue> {
        match self {
            Self::Primitive(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Primitive(ODataPrimitiveValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Primitive(p) => p.to_json(),
            Self::Collection(c) => Value::Array(c.items.iter().map(|v| v.to_json()).collect()),
            Self::Untyped(v) => v.clone(),
        }
    }

    /// Convert a JSON value guided by an optional declared type. Without a
    /// declared type, primitives are inferred, arrays become collections and
    /// objects stay untyped.
    pub fn from_json(name: &str, value: Value, declared: Option<&EdmTypeRef>) -> ODataResult<Self> {
        match (declared, value) {
            (_, Value::Null) => Ok(Self::Null),
            (Some(EdmTypeRef::Untyped), v) => Ok(Self::Untyped(v)),
            (Some(EdmTypeRef::Collection(element)), Value::Array(items)) => {
                let items = items
                    .into_iter()
                    .map(|item| Self::from_json(name, item, Some(element)))
                    .collect::<ODataResult<Vec<_>>>()?;
                Ok(Self::Collection(ODataCollectionValue {
                    type_name: None,
                    items,
                }))
            }
            (Some(EdmTypeRef::Collection(_)), _) => Err(ODataError::InvalidValue {
                name: name.to_string(),
                reason: "expected a JSON array for a collection property".into(),
            }),
            (Some(EdmTypeRef::Primitive(kind)), v) => Ok(Self::Primitive(
                ODataPrimitiveValue::from_json(name, &v, Some(*kind))?,
            )),
            (Some(EdmTypeRef::Structured(_)), v) => Ok(Self::Untyped(v)),
            (None, Value::Array(items)) => {
                let items = items
                    .into_iter()
                    .map(|item| Self::from_json(name, item, None))
                    .collect::<ODataResult<Vec<_>>>()?;
                Ok(Self::Collection(ODataCollectionValue {
                    type_name: None,
                    items,
                }))
            }
            (None, Value::Object(map)) => Ok(Self::Untyped(Value::Object(map))),
            (None, v) => Ok(Self::Primitive(ODataPrimitiveValue::from_json(name, &v, None)?)),
        }
    }
}

impl From<ODataPrimitiveValue> for ODataValue {
    fn from(p: ODataPrimitiveValue) -> Self {
        Self::Primitive(p)
    }
}

impl From<bool> for ODataValue {
    fn from(b: bool) -> Self {
        Self::Primitive(ODataPrimitiveValue::Boolean(b))
    }
}

impl From<i32> for ODataValue {
    fn from(n: i32) -> Self {
        Self::Primitive(ODataPrimitiveValue::Int32(n))
    }
}

impl From<i64> for ODataValue {
    fn from(n: i64) -> Self {
        Self::Primitive(ODataPrimitiveValue::Int64(n))
    }
}

impl From<f64> for ODataValue {
    fn from(d: f64) -> Self {
        Self::Primitive(ODataPrimitiveValue::Double(d))
    }
}

impl From<&str> for ODataValue {
    fn from(s: &str) -> Self {
        Self::Primitive(ODataPrimitiveValue::String(s.to_string()))
    }
}

impl From<String> for ODataValue {
    fn from(s: String) -> Self {
        Self::Primitive(ODataPrimitiveValue::String(s))
    }
}

impl<T: Into<ODataValue>> From<Vec<T>> for ODataValue {
    fn from(items: Vec<T>) -> Self {
        Self::collection(items.into_iter().map(Into::into))
    }
}

// ---------------------------------------------------------------------------
// ODataProperty
// ---------------------------------------------------------------------------

/// Custom annotation attached to a resource, resource set or property.
#[derive(Clone, Debug, PartialEq)]
pub struct ODataInstanceAnnotation {
    /// Qualified name without the leading `@`, e.g. `Custom.Note`.
    pub name: String,
    pub value: ODataValue,
}

impl ODataInstanceAnnotation {
    pub fn new(name: impl Into<String>, value: impl Into<ODataValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A named structural value inside a resource.
#[derive(Clone, Debug, PartialEq)]
pub struct ODataProperty {
    pub name: String,
    pub value: ODataValue,
    pub instance_annotations: Vec<ODataInstanceAnnotation>,
}

impl ODataProperty {
    pub fn new(name: impl Into<String>, value: impl Into<ODataValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            instance_annotations: Vec::new(),
        }
    }

    pub fn null(name: impl Into<String>) -> Self {
        Self::new(name, ODataValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inference_prefers_int32() {
        assert_eq!(
            ODataPrimitiveValue::infer(&json!(7)),
            Some(ODataPrimitiveValue::Int32(7))
        );
        assert_eq!(
            ODataPrimitiveValue::infer(&json!(5_000_000_000i64)),
            Some(ODataPrimitiveValue::Int64(5_000_000_000))
        );
        assert_eq!(
            ODataPrimitiveValue::infer(&json!(1.5)),
            Some(ODataPrimitiveValue::Double(1.5))
        );
        assert_eq!(ODataPrimitiveValue::infer(&json!(null)), None);
    }

    #[test]
    fn declared_kind_guides_conversion() {
        let v = ODataPrimitiveValue::from_json("X", &json!("42"), Some(EdmPrimitiveKind::Int64)).unwrap();
        assert_eq!(v, ODataPrimitiveValue::Int64(42));
        let v = ODataPrimitiveValue::from_json("X", &json!("INF"), Some(EdmPrimitiveKind::Double)).unwrap();
        assert_eq!(v, ODataPrimitiveValue::Double(f64::INFINITY));
        let err = ODataPrimitiveValue::from_json("X", &json!(true), Some(EdmPrimitiveKind::String));
        assert!(matches!(err, Err(ODataError::InvalidValue { .. })));
        let err = ODataPrimitiveValue::from_json("X", &json!(3_000_000_000i64), Some(EdmPrimitiveKind::Int32));
        assert!(err.is_err());
    }

    #[test]
    fn non_finite_doubles_use_string_forms() {
        assert_eq!(ODataPrimitiveValue::Double(f64::NAN).to_json(), json!("NaN"));
        assert_eq!(ODataPrimitiveValue::Double(f64::NEG_INFINITY).to_json(), json!("-INF"));
        assert_eq!(ODataPrimitiveValue::Double(2.5).to_json(), json!(2.5));
    }

    #[test]
    fn collections_convert_elementwise() {
        let declared = EdmTypeRef::collection(EdmTypeRef::Primitive(EdmPrimitiveKind::String));
        let v = ODataValue::from_json("Tags", json!(["a", "b"]), Some(&declared)).unwrap();
        assert_eq!(v, ODataValue::from(vec!["a", "b"]));
        assert_eq!(v.to_json(), json!(["a", "b"]));

        let err = ODataValue::from_json("Tags", json!("a"), Some(&declared));
        assert!(err.is_err());
    }

    #[test]
    fn undeclared_objects_stay_untyped() {
        let v = ODataValue::from_json("Extra", json!({"k": 1}), None).unwrap();
        assert_eq!(v, ODataValue::Untyped(json!({"k": 1})));
        assert!(ODataValue::from_json("N", json!(null), None).unwrap().is_null());
    }

    #[test]
    fn decimal_written_as_number_when_parseable() {
        assert_eq!(ODataPrimitiveValue::Decimal("12.50".into()).to_json().to_string(), "12.5");
        assert_eq!(ODataPrimitiveValue::Decimal("abc".into()).to_json(), json!("abc"));
    }
}
