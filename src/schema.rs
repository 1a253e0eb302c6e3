//! JSON-schema subset used for structured completion output.
//!
//! The same schema value is sent to the completion API and used to check the
//! model's answer locally. Only the keywords the pipeline relies on are
//! understood: `type`, `properties`, `items`, `required` and
//! `additionalProperties`.

use serde_json::Value;

/// Checks that a schema is well-formed enough to send.
///
/// `type` must be present and a string; `properties` and `items`, if present,
/// must be objects; `required`, if present, must be an array. Nested property
/// and item schemas are checked recursively.
pub fn validate_schema(schema: &Value) -> bool {
    let Some(obj) = schema.as_object() else {
        return false;
    };

    if !obj.get("type").is_some_and(Value::is_string) {
        return false;
    }

    if let Some(required) = obj.get("required") {
        if !required.is_array() {
            return false;
        }
    }

    if let Some(properties) = obj.get("properties") {
        let Some(properties) = properties.as_object() else {
            return false;
        };
        if !properties.values().all(validate_schema) {
            return false;
        }
    }

    if let Some(items) = obj.get("items") {
        if !items.is_object() || !validate_schema(items) {
            return false;
        }
    }

    true
}

/// Checks `value` against `schema`, returning a description of the first
/// mismatch found.
pub fn validate_value(schema: &Value, value: &Value) -> Result<(), String> {
    check(schema, value, "$")
}

fn check(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    let expected = schema.get("type").and_then(Value::as_str).unwrap_or("");

    let type_ok = match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    };
    if !type_ok {
        return Err(format!(
            "{} must be of type '{}', got {}",
            path,
            expected,
            json_type_name(value)
        ));
    }

    if let Some(obj) = value.as_object() {
        let properties = schema.get("properties").and_then(Value::as_object);

        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for field in required.iter().filter_map(Value::as_str) {
                if !obj.contains_key(field) {
                    return Err(format!("{} is missing required field '{}'", path, field));
                }
            }
        }

        let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));
        for (key, child) in obj {
            match properties.and_then(|p| p.get(key)) {
                Some(child_schema) => check(child_schema, child, &format!("{}.{}", path, key))?,
                None if closed => {
                    return Err(format!("{} has unexpected field '{}'", path, key));
                }
                None => {}
            }
        }
    }

    if let (Some(items), Some(arr)) = (schema.get("items"), value.as_array()) {
        for (i, item) in arr.iter().enumerate() {
            check(items, item, &format!("{}[{}]", path, i))?;
        }
    }

    Ok(())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
