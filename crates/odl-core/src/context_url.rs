use std::fmt;

use odl_edm::EdmModel;

use crate::error::{ODataError, ODataResult};

const METADATA_SEGMENT: &str = "$metadata";

/// What a context URL says the following JSON value is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContextUrlKind {
    ResourceSet,
    Resource,
    Delta,
    DeletedEntry,
    Link,
    DeletedLink,
    Property,
}

impl ContextUrlKind {
    /// Fragment suffix appended after the navigation source.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::ResourceSet | Self::Property => "",
            Self::Resource => "/$entity",
            Self::Delta => "/$delta",
            Self::DeletedEntry => "/$deletedEntity",
            Self::Link => "/$link",
            Self::DeletedLink => "/$deletedLink",
        }
    }

    /// Name of the item kind inside a delta payload.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceSet => "ResourceSet",
            Self::Resource => "Resource",
            Self::Delta => "Delta",
            Self::DeletedEntry => "DeletedEntry",
            Self::Link => "Link",
            Self::DeletedLink => "DeletedLink",
            Self::Property => "Property",
        }
    }

    fn from_suffix(segment: &str) -> Option<Self> {
        match segment {
            "$entity" => Some(Self::Resource),
            "$delta" => Some(Self::Delta),
            "$deletedEntity" => Some(Self::DeletedEntry),
            "$link" => Some(Self::Link),
            "$deletedLink" => Some(Self::DeletedLink),
            _ => None,
        }
    }
}

impl fmt::Display for ContextUrlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Pieces of a context URL fragment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextUrlInfo {
    /// Navigation path, e.g. `People` or `People(1)/Orders`.
    pub navigation_path: Option<String>,
    pub type_cast: Option<String>,
    pub select: Option<String>,
    /// Type of a property payload, e.g. `Edm.String` or
    /// `Collection(Edm.Int32)`.
    pub type_name: Option<String>,
    pub kind: ContextUrlKind,
}

impl ContextUrlInfo {
    pub fn new(navigation_path: impl Into<String>, kind: ContextUrlKind) -> Self {
        Self {
            navigation_path: Some(navigation_path.into()),
            type_cast: None,
            select: None,
            type_name: None,
            kind,
        }
    }

    pub fn property(type_name: impl Into<String>) -> Self {
        Self {
            navigation_path: None,
            type_cast: None,
            select: None,
            type_name: Some(type_name.into()),
            kind: ContextUrlKind::Property,
        }
    }

    pub fn with_type_cast(mut self, type_cast: Option<String>) -> Self {
        self.type_cast = type_cast;
        self
    }

    pub fn with_select(mut self, select: Option<String>) -> Self {
        self.select = select.filter(|s| !s.trim().is_empty());
        self
    }

    /// `{metadata}#{path}{/cast}{(select)}{suffix}`.
    pub fn build(&self, metadata_document_uri: &str) -> String {
        let mut out = format!("{metadata_document_uri}#");
        match (&self.navigation_path, &self.type_name) {
            (Some(path), _) => {
                out.push_str(path);
                if let Some(cast) = &self.type_cast {
                    out.push('/');
                    out.push_str(cast);
                }
            }
            (None, Some(type_name)) => out.push_str(type_name),
            (None, None) => {}
        }
        if let Some(select) = &self.select {
            out.push('(');
            out.push_str(select);
            out.push(')');
        }
        out.push_str(self.kind.suffix());
        out
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Result of parsing a context URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedContextUrl {
    pub metadata_document_uri: String,
    /// Name of the first navigation source in the path.
    pub navigation_source: Option<String>,
    /// Full navigation path, keys included (`People(1)/Orders`).
    pub navigation_path: Option<String>,
    pub type_cast: Option<String>,
    pub select: Option<String>,
    /// Property payload type.
    pub type_name: Option<String>,
    pub kind: ContextUrlKind,
}

impl ParsedContextUrl {
    /// Service root derived from the metadata document URI.
    pub fn service_root(&self) -> &str {
        self.metadata_document_uri
            .strip_suffix(METADATA_SEGMENT)
            .unwrap_or(&self.metadata_document_uri)
    }
}

/// Parses `…/$metadata#fragment` context URLs.
pub struct ContextUrlParser<'a> {
    model: Option<&'a dyn EdmModel>,
}

impl<'a> ContextUrlParser<'a> {
    pub fn new() -> Self {
        Self { model: None }
    }

    /// With a model, a bare singleton name parses as a resource instead of a
    /// resource set.
    pub fn with_model(model: &'a dyn EdmModel) -> Self {
        Self { model: Some(model) }
    }

    pub fn parse(&self, url: &str) -> ODataResult<ParsedContextUrl> {
        let invalid = |reason: &str| ODataError::InvalidContextUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };
        let (document, fragment) = url.split_once('#').ok_or_else(|| invalid("missing '#'"))?;
        if !document.ends_with(METADATA_SEGMENT) {
            return Err(invalid("does not reference a $metadata document"));
        }
        if fragment.is_empty() {
            return Err(invalid("empty fragment"));
        }

        let mut segments = split_fragment(fragment);
        let kind_suffix = segments
            .last()
            .and_then(|s| ContextUrlKind::from_suffix(s));
        if kind_suffix.is_some() {
            segments.pop();
        }

        let mut parsed = ParsedContextUrl {
            metadata_document_uri: document.to_string(),
            navigation_source: None,
            navigation_path: None,
            type_cast: None,
            select: None,
            type_name: None,
            kind: kind_suffix.unwrap_or(ContextUrlKind::ResourceSet),
        };

        let first = segments.first().copied().ok_or_else(|| invalid("empty fragment"))?;
        if kind_suffix.is_none() && is_type_fragment(first) && segments.len() == 1 {
            let (type_name, select) = split_select(first);
            parsed.type_name = Some(type_name.to_string());
            parsed.select = select;
            parsed.kind = ContextUrlKind::Property;
            return Ok(parsed);
        }

        let mut path = Vec::new();
        for (i, segment) in segments.iter().enumerate() {
            let (name, parens) = split_parens(segment);
            let is_last = i + 1 == segments.len();
            if name.contains('.') && i > 0 {
                parsed.type_cast = Some(name.to_string());
                if let Some(inner) = parens {
                    parsed.select = Some(inner.to_string());
                }
                continue;
            }
            match parens {
                Some(inner) if is_last && !is_key_predicate(inner) => {
                    parsed.select = Some(inner.to_string());
                    path.push(name.to_string());
                }
                _ => path.push(segment.to_string()),
            }
        }
        let (source, _) = split_parens(first);
        parsed.navigation_source = Some(source.to_string());
        parsed.navigation_path = Some(path.join("/"));

        if kind_suffix.is_none() {
            let single = self
                .model
                .and_then(|m| m.find_navigation_source(source))
                .map(|s| s.is_singleton())
                .unwrap_or(false);
            if single || path.last().map(|p| p.ends_with(')')).unwrap_or(false) {
                parsed.kind = ContextUrlKind::Resource;
            }
        }
        Ok(parsed)
    }

    /// Parse and require a specific kind.
    pub fn parse_expecting(&self, url: &str, expected: ContextUrlKind) -> ODataResult<ParsedContextUrl> {
        let parsed = self.parse(url)?;
        if parsed.kind != expected {
            return Err(ODataError::ContextUrlMismatch {
                expected: expected.to_string(),
                found: parsed.kind.to_string(),
            });
        }
        Ok(parsed)
    }
}

impl Default for ContextUrlParser<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Split on `/` outside parentheses.
fn split_fragment(fragment: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in fragment.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '/' if depth == 0 => {
                parts.push(&fragment[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&fragment[start..]);
    parts
}

fn split_parens(segment: &str) -> (&str, Option<&str>) {
    match segment.find('(') {
        Some(open) if segment.ends_with(')') => {
            (&segment[..open], Some(&segment[open + 1..segment.len() - 1]))
        }
        _ => (segment, None),
    }
}

fn split_select(segment: &str) -> (&str, Option<String>) {
    if segment.starts_with("Collection(") {
        return (segment, None);
    }
    let (name, select) = split_parens(segment);
    (name, select.map(str::to_string))
}

fn is_type_fragment(segment: &str) -> bool {
    segment.starts_with("Collection(") || split_parens(segment).0.contains('.')
}

/// Key predicates are literals or `Name=literal` pairs; select lists are
/// property names.
fn is_key_predicate(inner: &str) -> bool {
    let inner = inner.trim();
    inner.contains('=')
        || inner.starts_with('\'')
        || inner.starts_with('-')
        || inner.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use odl_edm::{EdmNavigationSource, EdmStructuredType, InMemoryModel};

    const META: &str = "http://host/svc/$metadata";

    fn parse(url: &str) -> ParsedContextUrl {
        ContextUrlParser::new().parse(url).unwrap()
    }

    #[test]
    fn builder_covers_every_kind() {
        let cases = [
            (ContextUrlKind::ResourceSet, "http://host/svc/$metadata#People"),
            (ContextUrlKind::Resource, "http://host/svc/$metadata#People/$entity"),
            (ContextUrlKind::Delta, "http://host/svc/$metadata#People/$delta"),
            (ContextUrlKind::DeletedEntry, "http://host/svc/$metadata#People/$deletedEntity"),
            (ContextUrlKind::Link, "http://host/svc/$metadata#People/$link"),
            (ContextUrlKind::DeletedLink, "http://host/svc/$metadata#People/$deletedLink"),
        ];
        for (kind, expected) in cases {
            let url = ContextUrlInfo::new("People", kind).build(META);
            assert_eq!(url, expected);
            assert_eq!(parse(&url).kind, kind);
        }
    }

    #[test]
    fn cast_and_select_round_trip() {
        let url = ContextUrlInfo::new("People", ContextUrlKind::Resource)
            .with_type_cast(Some("NS.Vip".into()))
            .with_select(Some("Id,Name".into()))
            .build(META);
        assert_eq!(url, "http://host/svc/$metadata#People/NS.Vip(Id,Name)/$entity");
        let parsed = parse(&url);
        assert_eq!(parsed.navigation_source.as_deref(), Some("People"));
        assert_eq!(parsed.type_cast.as_deref(), Some("NS.Vip"));
        assert_eq!(parsed.select.as_deref(), Some("Id,Name"));
        assert_eq!(parsed.service_root(), "http://host/svc/");
    }

    #[test]
    fn select_on_set_versus_key_on_path() {
        let parsed = parse("http://host/svc/$metadata#People(Id,Orders(Id))");
        assert_eq!(parsed.kind, ContextUrlKind::ResourceSet);
        assert_eq!(parsed.select.as_deref(), Some("Id,Orders(Id)"));

        let parsed = parse("http://host/svc/$metadata#People(1)/Orders");
        assert_eq!(parsed.navigation_source.as_deref(), Some("People"));
        assert_eq!(parsed.navigation_path.as_deref(), Some("People(1)/Orders"));
        assert!(parsed.select.is_none());
    }

    #[test]
    fn property_fragments() {
        let parsed = parse("http://host/svc/$metadata#Edm.String");
        assert_eq!(parsed.kind, ContextUrlKind::Property);
        assert_eq!(parsed.type_name.as_deref(), Some("Edm.String"));

        let parsed = parse("http://host/svc/$metadata#Collection(Edm.Int32)");
        assert_eq!(parsed.type_name.as_deref(), Some("Collection(Edm.Int32)"));
    }

    #[test]
    fn singleton_needs_model() {
        let model = InMemoryModel::builder()
            .add_type(EdmStructuredType::entity("NS.Person").with_key("Id"))
            .add_source(EdmNavigationSource::singleton("Me", "NS.Person"))
            .build()
            .unwrap();
        let url = "http://host/svc/$metadata#Me";
        assert_eq!(parse(url).kind, ContextUrlKind::ResourceSet);
        let parsed = ContextUrlParser::with_model(&model).parse(url).unwrap();
        assert_eq!(parsed.kind, ContextUrlKind::Resource);
    }

    #[test]
    fn rejects_malformed_urls() {
        let parser = ContextUrlParser::new();
        assert!(matches!(
            parser.parse("http://host/svc/People"),
            Err(ODataError::InvalidContextUrl { .. })
        ));
        assert!(matches!(
            parser.parse("http://host/svc/other#People"),
            Err(ODataError::InvalidContextUrl { .. })
        ));
        assert!(matches!(
            parser.parse_expecting("http://host/svc/$metadata#People", ContextUrlKind::Resource),
            Err(ODataError::ContextUrlMismatch { .. })
        ));
    }
}
