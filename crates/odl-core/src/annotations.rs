//! Reserved annotation names and the helpers that put them on the wire.
//!
//! Names are stored without the leading `@`; [`instance_annotation`] and
//! [`property_annotation`] produce the member names that are written.

pub const ODATA_CONTEXT: &str = "odata.context";
pub const ODATA_TYPE: &str = "odata.type";
pub const ODATA_ID: &str = "odata.id";
pub const ODATA_ETAG: &str = "odata.etag";
pub const ODATA_COUNT: &str = "odata.count";
pub const ODATA_NEXT_LINK: &str = "odata.nextLink";
pub const ODATA_DELTA_LINK: &str = "odata.deltaLink";
pub const ODATA_EDIT_LINK: &str = "odata.editLink";
pub const ODATA_READ_LINK: &str = "odata.readLink";
pub const ODATA_MEDIA_EDIT_LINK: &str = "odata.mediaEditLink";
pub const ODATA_MEDIA_READ_LINK: &str = "odata.mediaReadLink";
pub const ODATA_MEDIA_CONTENT_TYPE: &str = "odata.mediaContentType";
pub const ODATA_MEDIA_ETAG: &str = "odata.mediaEtag";
pub const ODATA_NAVIGATION_LINK: &str = "odata.navigationLink";
pub const ODATA_ASSOCIATION_LINK: &str = "odata.associationLink";
pub const ODATA_BIND: &str = "odata.bind";
pub const ODATA_REASON: &str = "odata.reason";
/// Legacy boolean annotation for a null top-level value (4.0 compatibility).
pub const ODATA_NULL: &str = "odata.null";
pub const ODATA_REMOVED: &str = "odata.removed";

/// Member holding the items of a top-level resource set.
pub const VALUE_PROPERTY: &str = "value";
/// Member holding an in-stream error object.
pub const ERROR_PROPERTY: &str = "error";

/// Members of a 4.0 deleted entry and of delta links.
pub const DELTA_ID_PROPERTY: &str = "id";
pub const DELTA_REASON_PROPERTY: &str = "reason";
pub const DELTA_SOURCE_PROPERTY: &str = "source";
pub const DELTA_RELATIONSHIP_PROPERTY: &str = "relationship";
pub const DELTA_TARGET_PROPERTY: &str = "target";

pub const REASON_DELETED: &str = "deleted";
pub const REASON_CHANGED: &str = "changed";

/// `@name`
pub fn instance_annotation(name: &str) -> String {
    format!("@{name}")
}

/// `property@name`
pub fn property_annotation(property: &str, name: &str) -> String {
    format!("{property}@{name}")
}

/// Classification of a JSON member name found inside a resource object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemberName<'a> {
    /// `@odata.type` and friends; the name is normalised to carry the
    /// `odata.` prefix when the payload used the 4.01 short form.
    InstanceAnnotation(String),
    /// `Prop@odata.type`.
    PropertyAnnotation { property: &'a str, annotation: String },
    Property(&'a str),
}

/// Split a member name into its annotation parts.
pub fn classify_member(name: &str) -> MemberName<'_> {
    if let Some(rest) = name.strip_prefix('@') {
        return MemberName::InstanceAnnotation(normalize_annotation(rest));
    }
    match name.split_once('@') {
        Some((property, annotation)) if !property.is_empty() && !annotation.is_empty() => {
            MemberName::PropertyAnnotation {
                property,
                annotation: normalize_annotation(annotation),
            }
        }
        _ => MemberName::Property(name),
    }
}

/// 4.01 allows `@type` for `@odata.type`; reserved names without a
/// namespace are mapped into the `odata.` namespace.
pub fn normalize_annotation(name: &str) -> String {
    if name.contains('.') {
        name.to_string()
    } else {
        format!("odata.{name}")
    }
}

/// Returns `true` for annotations in the reserved `odata.` namespace.
pub fn is_odata_annotation(name: &str) -> bool {
    name.starts_with("odata.")
}
