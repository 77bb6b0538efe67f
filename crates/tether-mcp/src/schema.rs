//! Cheap structural pre-check of tool arguments against an input schema.
//!
//! This is not JSON Schema validation. It catches the mistakes worth a fast
//! local failure before a round trip: a non-object argument value, missing
//! required properties, properties of the wrong primitive kind, and unknown
//! properties when the schema sets `additionalProperties: false`. Nested
//! schemas are not descended into.

use serde_json::{Map, Value};

/// Check `arguments` against `schema`, returning a human-readable reason on
/// mismatch. `null` arguments are treated as an empty object.
pub fn check_arguments(schema: &Value, arguments: &Value) -> Result<(), String> {
    let empty = Map::new();
    let args = match arguments {
        Value::Object(map) => map,
        Value::Null => &empty,
        other => {
            return Err(format!(
                "arguments must be a JSON object, got {}",
                kind_name(other)
            ));
        }
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        let missing: Vec<&str> = required
            .iter()
            .filter_map(Value::as_str)
            .filter(|name| !args.contains_key(*name))
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing required field(s): {}", missing.join(", ")));
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);

    for (name, value) in args {
        let declared = properties.and_then(|props| props.get(name));
        match declared {
            Some(property) => {
                if let Some(expected) = property.get("type") {
                    if !matches_type(expected, value) {
                        return Err(format!(
                            "field '{name}' must be {}, got {}",
                            describe_type(expected),
                            kind_name(value)
                        ));
                    }
                }
            }
            None => {
                if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
                    return Err(format!("unexpected field '{name}'"));
                }
            }
        }
    }

    Ok(())
}

/// `type` may be a single name or a list of names.
fn matches_type(expected: &Value, value: &Value) -> bool {
    match expected {
        Value::String(name) => matches_named_type(name, value),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| matches_named_type(name, value)),
        _ => true,
    }
}

fn matches_named_type(name: &str, value: &Value) -> bool {
    match name {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => match value {
            Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0),
            _ => false,
        },
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // Unknown type names are the server's business
        _ => true,
    }
}

fn describe_type(expected: &Value) -> String {
    match expected {
        Value::String(name) => name.clone(),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" or "),
        other => other.to_string(),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
