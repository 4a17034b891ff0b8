//! Lightweight argument validation against a handler's cached JSON Schema.
//! Not a general-purpose JSON Schema validator — it covers the shapes
//! [`ferrite_mcp_types::schema`] actually produces (flat or one level of
//! nesting, scalar/array/enum/object properties), which is all a
//! registration-time `FieldSpec` list can express.

use serde_json::Value;

pub struct ValidationFailure {
    pub param_name: String,
    pub expected_type: String,
    pub observed: String,
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("boolean {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => format!("string {s:?}"),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "object".to_string(),
    }
}

fn matches_type(schema: &Value, value: &Value) -> bool {
    if let Some(enum_values) = schema.get("enum").and_then(Value::as_array) {
        return enum_values.contains(value);
    }
    match schema.get("type").and_then(Value::as_str) {
        Some("string") => value.is_string(),
        Some("integer") => value.is_i64() || value.is_u64(),
        Some("number") => value.is_number(),
        Some("boolean") => value.is_boolean(),
        Some("array") => value.is_array(),
        Some("object") => value.is_object(),
        _ => true,
    }
}

fn expected_type_name(schema: &Value) -> String {
    if schema.get("enum").is_some() {
        return "one of the allowed enum values".into();
    }
    schema
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("any")
        .to_string()
}

/// Validate `args` against an object schema built by
/// [`ferrite_mcp_types::build_input_schema`]. Returns the first mismatch
/// found, naming the offending parameter so the client can self-correct.
pub fn validate_arguments(schema: &Value, args: &Value) -> Result<(), ValidationFailure> {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let Some(args_obj) = args.as_object() else {
        return Err(ValidationFailure {
            param_name: "<arguments>".into(),
            expected_type: "object".into(),
            observed: describe(args),
        });
    };

    for name in &required {
        if !args_obj.contains_key(*name) {
            let field_schema = properties.get(*name).cloned().unwrap_or(Value::Null);
            return Err(ValidationFailure {
                param_name: name.to_string(),
                expected_type: expected_type_name(&field_schema),
                observed: "missing".into(),
            });
        }
    }

    for (name, value) in args_obj {
        let Some(field_schema) = properties.get(name) else {
            continue;
        };
        if !matches_type(field_schema, value) {
            return Err(ValidationFailure {
                param_name: name.clone(),
                expected_type: expected_type_name(field_schema),
                observed: describe(value),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_mcp_types::{build_input_schema, FieldSpec, FieldType};
    use serde_json::json;

    #[test]
    fn missing_required_field_reported() {
        let fields = vec![FieldSpec::new("a", FieldType::Integer)];
        let schema = build_input_schema(&fields);
        let err = validate_arguments(&schema, &json!({})).unwrap_err();
        assert_eq!(err.param_name, "a");
        assert_eq!(err.observed, "missing");
    }

    #[test]
    fn type_mismatch_reported() {
        let fields = vec![FieldSpec::new("a", FieldType::Integer)];
        let schema = build_input_schema(&fields);
        let err = validate_arguments(&schema, &json!({"a": "ten"})).unwrap_err();
        assert_eq!(err.param_name, "a");
        assert_eq!(err.expected_type, "integer");
    }

    #[test]
    fn valid_arguments_pass() {
        let fields = vec![
            FieldSpec::new("a", FieldType::Integer),
            FieldSpec::new("b", FieldType::Integer).optional(),
        ];
        let schema = build_input_schema(&fields);
        assert!(validate_arguments(&schema, &json!({"a": 1})).is_ok());
    }
}
