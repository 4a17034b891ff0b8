//! Static JSON Schema generation from an explicit field-descriptor list.
//!
//! Some host SDKs derive schemas from a function's type hints by reflection
//! at registration time; Rust has no such runtime introspection, so each
//! `register_*` call instead supplies a `Vec<FieldSpec>` up front. This
//! module turns that list into a JSON Schema exactly once, which is then
//! cached by the registry.

use serde_json::{json, Map, Value};

/// The scalar/aggregate shapes a handler parameter or return value can take.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    /// `{type: "array", items: <T>}`.
    Array(Box<FieldType>),
    /// A free-form JSON object (no further schema on the values).
    Object,
    /// `{type: "string", enum: [...]}`.
    Enum(Vec<String>),
    /// A nested, structured record with its own fields.
    Struct(Vec<FieldSpec>),
}

impl FieldType {
    /// Render this type as a JSON Schema fragment. Struct types hoist their
    /// nested schema inline rather than through a `$defs` indirection.
    pub fn to_schema(&self) -> Value {
        match self {
            Self::String => json!({"type": "string"}),
            Self::Integer => json!({"type": "integer"}),
            Self::Number => json!({"type": "number"}),
            Self::Boolean => json!({"type": "boolean"}),
            Self::Array(items) => json!({"type": "array", "items": items.to_schema()}),
            Self::Object => json!({"type": "object"}),
            Self::Enum(values) => json!({"type": "string", "enum": values}),
            Self::Struct(fields) => struct_schema(fields),
        }
    }
}

/// One parameter in a handler's declared signature.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub ty: FieldType,
    pub required: bool,
    pub description: Option<String>,
    pub default: Option<Value>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            description: None,
            default: None,
        }
    }

    /// `Option<T>` in the host signature: optional, not required.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self.required = false;
        self
    }
}

fn struct_schema(fields: &[FieldSpec]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for field in fields {
        let mut frag = field.ty.to_schema();
        if let Value::Object(ref mut obj) = frag {
            if let Some(desc) = &field.description {
                obj.insert("description".into(), json!(desc));
            }
            if let Some(default) = &field.default {
                obj.insert("default".into(), default.clone());
            }
        }
        properties.insert(field.name.clone(), frag);
        if field.required {
            required.push(json!(field.name));
        }
    }
    json!({
        "type": "object",
        "properties": Value::Object(properties),
        "required": required,
    })
}

/// Build the `inputSchema` for a tool/prompt/resource-template from its
/// declared field list. Top level is always an object schema.
pub fn build_input_schema(fields: &[FieldSpec]) -> Value {
    struct_schema(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_types_map_correctly() {
        assert_eq!(FieldType::String.to_schema(), json!({"type": "string"}));
        assert_eq!(FieldType::Integer.to_schema(), json!({"type": "integer"}));
        assert_eq!(FieldType::Boolean.to_schema(), json!({"type": "boolean"}));
    }

    #[test]
    fn array_wraps_items() {
        let schema = FieldType::Array(Box::new(FieldType::String)).to_schema();
        assert_eq!(schema["type"], "array");
        assert_eq!(schema["items"]["type"], "string");
    }

    #[test]
    fn optional_field_not_in_required() {
        let fields = vec![
            FieldSpec::new("a", FieldType::Integer),
            FieldSpec::new("b", FieldType::Integer).optional(),
        ];
        let schema = build_input_schema(&fields);
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(required, vec!["a"]);
        assert!(schema["properties"]["b"].is_object());
    }

    #[test]
    fn enum_field_renders_as_string_enum() {
        let schema = FieldType::Enum(vec!["a".into(), "b".into()]).to_schema();
        assert_eq!(schema["type"], "string");
        assert_eq!(schema["enum"], json!(["a", "b"]));
    }

    #[test]
    fn nested_struct_fields() {
        let inner = vec![FieldSpec::new("x", FieldType::Number)];
        let fields = vec![FieldSpec::new("point", FieldType::Struct(inner))];
        let schema = build_input_schema(&fields);
        assert_eq!(schema["properties"]["point"]["type"], "object");
        assert_eq!(schema["properties"]["point"]["properties"]["x"]["type"], "number");
    }
}
