//! Validation of plugin configuration against a JSON schema subset.
//!
//! Supported keywords: `type`, `enum`, `properties`, `required`,
//! `additionalProperties` (boolean or schema), `items`, `minItems`,
//! `minimum` and `maximum`. Unknown keywords are ignored. Every violation
//! is reported, never just the first one.

use crate::errors::ValidationError;
use serde_json::Value;

/// Validates `value` against `schema`, collecting every violation.
#[must_use]
pub fn validate(plugin: &str, schema: &Value, value: &Value) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    validate_at(plugin, schema, value, "", &mut errors);
    errors
}

fn validate_at(
    plugin: &str,
    schema: &Value,
    value: &Value,
    path: &str,
    errors: &mut Vec<ValidationError>,
) {
    let Some(schema) = schema.as_object() else {
        return;
    };

    if let Some(expected) = schema.get("type") {
        if !type_matches(expected, value) {
            errors.push(ValidationError::new(
                plugin,
                path,
                format!("expected type {}, got {}", render_type(expected), type_name(value)),
            ));
            // Nested keywords would only produce noise.
            return;
        }
    }

    if let Some(Value::Array(allowed)) = schema.get("enum") {
        if !allowed.contains(value) {
            errors.push(ValidationError::new(
                plugin,
                path,
                format!("{value} is not one of {}", Value::Array(allowed.clone())),
            ));
        }
    }

    if let Some(number) = value.as_f64() {
        if let Some(minimum) = schema.get("minimum").and_then(Value::as_f64) {
            if number < minimum {
                errors.push(ValidationError::new(
                    plugin,
                    path,
                    format!("{number} is less than the minimum of {minimum}"),
                ));
            }
        }
        if let Some(maximum) = schema.get("maximum").and_then(Value::as_f64) {
            if number > maximum {
                errors.push(ValidationError::new(
                    plugin,
                    path,
                    format!("{number} is greater than the maximum of {maximum}"),
                ));
            }
        }
    }

    if let Value::Object(map) = value {
        if let Some(Value::Array(required)) = schema.get("required") {
            for key in required.iter().filter_map(Value::as_str) {
                if !map.contains_key(key) {
                    errors.push(ValidationError::new(
                        plugin,
                        path,
                        format!("'{key}' is a required property"),
                    ));
                }
            }
        }

        let properties = schema.get("properties").and_then(Value::as_object);
        for (key, child) in map {
            let child_path = format!("{path}/{key}");
            match properties.and_then(|props| props.get(key)) {
                Some(child_schema) => {
                    validate_at(plugin, child_schema, child, &child_path, errors);
                }
                None => match schema.get("additionalProperties") {
                    Some(Value::Bool(false)) => errors.push(ValidationError::new(
                        plugin,
                        path,
                        format!("additional property '{key}' is not allowed"),
                    )),
                    Some(extra @ Value::Object(_)) => {
                        validate_at(plugin, extra, child, &child_path, errors);
                    }
                    _ => {}
                },
            }
        }
    }

    if let Value::Array(items) = value {
        if let Some(min_items) = schema.get("minItems").and_then(Value::as_u64) {
            if (items.len() as u64) < min_items {
                errors.push(ValidationError::new(
                    plugin,
                    path,
                    format!("expected at least {min_items} item(s), got {}", items.len()),
                ));
            }
        }
        if let Some(item_schema) = schema.get("items") {
            for (index, item) in items.iter().enumerate() {
                validate_at(plugin, item_schema, item, &format!("{path}/{index}"), errors);
            }
        }
    }
}

fn type_matches(expected: &Value, value: &Value) -> bool {
    match expected {
        Value::String(name) => single_type_matches(name, value),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| single_type_matches(name, value)),
        _ => true,
    }
}

fn single_type_matches(name: &str, value: &Value) -> bool {
    match name {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        _ => true,
    }
}

fn render_type(expected: &Value) -> String {
    match expected {
        Value::String(name) => name.clone(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
