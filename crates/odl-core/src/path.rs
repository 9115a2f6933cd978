use std::fmt;

use crate::value::{ODataPrimitiveValue, ODataValue};

/// One segment of a resource path.
#[derive(Clone, Debug, PartialEq)]
pub enum PathSegment {
    EntitySet(String),
    Singleton(String),
    /// Key predicate; a single entry renders as `(1)`, several as
    /// `(A=1,B='x')`.
    Key(Vec<(String, ODataPrimitiveValue)>),
    Navigation(String),
    TypeCast(String),
}

/// Path of the resource a scope describes, relative to the service root.
///
/// Nested writers extend their parent's path: contained navigation
/// appends the parent's key and the navigation segment so that context
/// URLs and conventional ids stay correct below the top level.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ODataPath {
    segments: Vec<PathSegment>,
}

impl ODataPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity_set(name: impl Into<String>) -> Self {
        Self {
            segments: vec![PathSegment::EntitySet(name.into())],
        }
    }

    pub fn singleton(name: impl Into<String>) -> Self {
        Self {
            segments: vec![PathSegment::Singleton(name.into())],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }

    pub fn ends_with_key(&self) -> bool {
        matches!(self.last(), Some(PathSegment::Key(_)))
    }

    pub fn push(&mut self, segment: PathSegment) {
        self.segments.push(segment);
    }

    pub fn with_key(mut self, key: Vec<(String, ODataPrimitiveValue)>) -> Self {
        if !key.is_empty() && !self.ends_with_key() {
            self.segments.push(PathSegment::Key(key));
        }
        self
    }

    pub fn with_navigation(mut self, name: impl Into<String>) -> Self {
        self.segments.push(PathSegment::Navigation(name.into()));
        self
    }

    pub fn with_type_cast(mut self, type_name: impl Into<String>) -> Self {
        self.segments.push(PathSegment::TypeCast(type_name.into()));
        self
    }

    /// Render as a relative URL, either `People(1)/Orders` or, with
    /// `key_as_segment`, `People/1/Orders`.
    pub fn to_relative_url(&self, key_as_segment: bool) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                PathSegment::Key(key) if key_as_segment && key.len() == 1 => {
                    out.push('/');
                    out.push_str(&key_segment_literal(&key[0].1));
                }
                PathSegment::Key(key) => out.push_str(&key_predicate(key)),
                PathSegment::EntitySet(name)
                | PathSegment::Singleton(name)
                | PathSegment::Navigation(name)
                | PathSegment::TypeCast(name) => {
                    if !out.is_empty() {
                        out.push('/');
                    }
                    out.push_str(name);
                }
            }
        }
        out
    }
}

impl fmt::Display for ODataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_relative_url(false))
    }
}

// ---------------------------------------------------------------------------
// Key literals
// ---------------------------------------------------------------------------

/// `(1)` for a single key, `(A=1,B='x')` for a composite key.
pub fn key_predicate(key: &[(String, ODataPrimitiveValue)]) -> String {
    let body = if key.len() == 1 {
        key_literal(&key[0].1)
    } else {
        key.iter()
            .map(|(name, value)| format!("{name}={}", key_literal(value)))
            .collect::<Vec<_>>()
            .join(",")
    };
    format!("({body})")
}

/// URL literal for a key value. String-like values are quoted and every
/// embedded single quote is doubled, so `O'Neil` becomes `'O''Neil'` and
/// `'''` becomes `''''''''`.
pub fn key_literal(value: &ODataPrimitiveValue) -> String {
    match value {
        ODataPrimitiveValue::String(s) => quote(s),
        ODataPrimitiveValue::Duration(s) => format!("duration{}", quote(s)),
        ODataPrimitiveValue::Binary(s) => format!("binary{}", quote(s)),
        ODataPrimitiveValue::Boolean(b) => b.to_string(),
        ODataPrimitiveValue::Int32(n) => n.to_string(),
        ODataPrimitiveValue::Int64(n) => n.to_string(),
        ODataPrimitiveValue::Double(d) => d.to_string(),
        ODataPrimitiveValue::Decimal(s)
        | ODataPrimitiveValue::Guid(s)
        | ODataPrimitiveValue::Date(s)
        | ODataPrimitiveValue::DateTimeOffset(s) => s.clone(),
    }
}

/// Key-as-segment literals are never quoted.
fn key_segment_literal(value: &ODataPrimitiveValue) -> String {
    match value {
        ODataPrimitiveValue::String(s) => s.replace('/', "%2F"),
        other => key_literal(other),
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Extract key values from a resource's properties in key order. Returns
/// `None` when any key property is missing or not a primitive.
pub fn key_values(
    key_names: &[String],
    lookup: impl Fn(&str) -> Option<ODataValue>,
) -> Option<Vec<(String, ODataPrimitiveValue)>> {
    if key_names.is_empty() {
        return None;
    }
    key_names
        .iter()
        .map(|name| match lookup(name)? {
            ODataValue::Primitive(p) => Some((name.clone(), p)),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(v: impl Into<ODataValue>) -> Vec<(String, ODataPrimitiveValue)> {
        match v.into() {
            ODataValue::Primitive(p) => vec![("Id".to_string(), p)],
            other => panic!("not primitive: {other:?}"),
        }
    }

    #[test]
    fn parentheses_and_segments() {
        let path = ODataPath::entity_set("People")
            .with_key(key(1))
            .with_navigation("Orders");
        assert_eq!(path.to_relative_url(false), "People(1)/Orders");
        assert_eq!(path.to_relative_url(true), "People/1/Orders");
    }

    #[test]
    fn composite_key() {
        let k = vec![
            ("A".to_string(), ODataPrimitiveValue::Int32(1)),
            ("B".to_string(), ODataPrimitiveValue::String("x".into())),
        ];
        assert_eq!(key_predicate(&k), "(A=1,B='x')");
    }

    #[test]
    fn quotes_are_doubled_one_for_one() {
        assert_eq!(key_literal(&ODataPrimitiveValue::String("O'Neil".into())), "'O''Neil'");
        assert_eq!(key_literal(&ODataPrimitiveValue::String("'''".into())), "''''''''");
        assert_eq!(key_literal(&ODataPrimitiveValue::String(String::new())), "''");
    }

    #[test]
    fn key_is_not_appended_twice() {
        let path = ODataPath::entity_set("People").with_key(key(1)).with_key(key(2));
        assert_eq!(path.to_string(), "People(1)");
    }

    #[test]
    fn key_values_require_every_key() {
        let names = vec!["Id".to_string(), "Region".to_string()];
        let found = key_values(&names, |n| (n == "Id").then(|| ODataValue::from(7)));
        assert!(found.is_none());
        let found = key_values(&names, |n| Some(ODataValue::from(n)));
        assert_eq!(found.unwrap().len(), 2);
    }
}
