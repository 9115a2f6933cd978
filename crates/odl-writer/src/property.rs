use odl_core::annotations::{instance_annotation, property_annotation, ODATA_CONTEXT, ODATA_NULL, ODATA_TYPE, VALUE_PROPERTY};
use odl_core::{
    ContextUrlInfo, MetadataLevel, ODataError, ODataInstanceAnnotation, ODataPrimitiveValue,
    ODataProperty, ODataResult, ODataValue, WriterSettings,
};
use odl_edm::{EdmModel, EdmPrimitiveKind, EdmStructuredType};
use odl_json::JsonWriter;
use serde_json::Value;

/// Writes property values with their annotations.
///
/// Validation of nullability and open properties against the owning type
/// happens in the writer core before a resource reaches the format; this
/// type only decides what control information accompanies each value.
pub struct PropertySerializer<'a> {
    model: &'a dyn EdmModel,
    settings: &'a WriterSettings,
}

impl<'a> PropertySerializer<'a> {
    pub fn new(model: &'a dyn EdmModel, settings: &'a WriterSettings) -> Self {
        Self { model, settings }
    }

    pub fn write_properties(
        &self,
        json: &mut JsonWriter,
        owner: Option<&EdmStructuredType>,
        properties: &[ODataProperty],
    ) -> ODataResult<()> {
        for property in properties {
            self.write_property(json, owner, property)?;
        }
        Ok(())
    }

    /// `Name@Custom.Note`, `Name@odata.type`, then `Name`.
    pub fn write_property(
        &self,
        json: &mut JsonWriter,
        owner: Option<&EdmStructuredType>,
        property: &ODataProperty,
    ) -> ODataResult<()> {
        let declared = owner
            .and_then(|ty| self.model.find_property(ty, &property.name))
            .is_some();
        for annotation in &property.instance_annotations {
            json.write_property(
                &property_annotation(&property.name, &annotation.name),
                &annotation.value.to_json(),
            )?;
        }
        if let Some(type_name) = self.type_annotation(&property.value, declared) {
            json.write_property(
                &property_annotation(&property.name, ODATA_TYPE),
                &Value::String(format!("#{type_name}")),
            )?;
        }
        json.write_property(&property.name, &property.value.to_json())?;
        Ok(())
    }

    /// Write `property` as a payload of its own.
    ///
    /// A null value is a protocol error (the response must be "no content")
    /// unless the legacy `odata.null` form is enabled. Object values belong
    /// in a resource payload.
    pub fn write_top_level_property(
        &self,
        json: &mut JsonWriter,
        property: &ODataProperty,
    ) -> ODataResult<()> {
        match &property.value {
            ODataValue::Null if self.settings.writes_legacy_null() => {
                json.start_object_scope()?;
                if let Some(url) = self.context_url("Edm.Null") {
                    json.write_property(&instance_annotation(ODATA_CONTEXT), &Value::String(url))?;
                }
                json.write_property(&instance_annotation(ODATA_NULL), &Value::Bool(true))?;
                json.end_object_scope()?;
                Ok(())
            }
            ODataValue::Null => Err(ODataError::TopLevelNullProperty(property.name.clone())),
            ODataValue::Untyped(Value::Object(_)) => Err(
                ODataError::ResourceValuedTopLevelProperty(property.name.clone()),
            ),
            value => {
                json.start_object_scope()?;
                if let Some(url) = self.context_url(&value_type_name(value)) {
                    json.write_property(&instance_annotation(ODATA_CONTEXT), &Value::String(url))?;
                }
                self.write_instance_annotations(json, &property.instance_annotations)?;
                if let Some(type_name) = self.type_annotation(value, false) {
                    json.write_property(
                        &instance_annotation(ODATA_TYPE),
                        &Value::String(format!("#{type_name}")),
                    )?;
                }
                json.write_property(VALUE_PROPERTY, &value.to_json())?;
                json.end_object_scope()?;
                Ok(())
            }
        }
    }

    pub fn write_instance_annotations(
        &self,
        json: &mut JsonWriter,
        annotations: &[ODataInstanceAnnotation],
    ) -> ODataResult<()> {
        for annotation in annotations {
            json.write_property(&instance_annotation(&annotation.name), &annotation.value.to_json())?;
        }
        Ok(())
    }

    fn context_url(&self, type_name: &str) -> Option<String> {
        if !self.settings.is_response || self.settings.metadata_level == MetadataLevel::None {
            return None;
        }
        let metadata = self.settings.metadata_document_uri()?;
        Some(ContextUrlInfo::property(type_name).build(&metadata))
    }

    /// Minimal metadata annotates undeclared values JSON cannot type by
    /// itself; full metadata annotates every value that JSON cannot type.
    fn type_annotation(&self, value: &ODataValue, declared: bool) -> Option<String> {
        match self.settings.metadata_level {
            MetadataLevel::None => return None,
            MetadataLevel::Minimal if declared => return None,
            _ => {}
        }
        match value {
            ODataValue::Primitive(p) if !is_json_native(p) => Some(short_name(p.kind()).to_string()),
            ODataValue::Collection(c) => c.type_name.clone(),
            _ => None,
        }
    }
}

/// Kinds a reader infers from the JSON token alone.
fn is_json_native(value: &ODataPrimitiveValue) -> bool {
    matches!(
        value,
        ODataPrimitiveValue::Boolean(_)
            | ODataPrimitiveValue::Int32(_)
            | ODataPrimitiveValue::Double(_)
            | ODataPrimitiveValue::String(_)
    )
}

/// Primitive names are written without the `Edm.` namespace.
fn short_name(kind: EdmPrimitiveKind) -> &'static str {
    let full = kind.full_name();
    full.strip_prefix("Edm.").unwrap_or(full)
}

fn value_type_name(value: &ODataValue) -> String {
    match value {
        ODataValue::Primitive(p) => p.kind().full_name().to_string(),
        ODataValue::Collection(c) => c.type_name.clone().unwrap_or_else(|| {
            let element = c
                .items
                .iter()
                .find_map(ODataValue::as_primitive)
                .map(|p| p.kind().full_name())
                .unwrap_or("Edm.Untyped");
            format!("Collection({element})")
        }),
        ODataValue::Null => "Edm.Null".to_string(),
        ODataValue::Untyped(_) => "Edm.Untyped".to_string(),
    }
}
