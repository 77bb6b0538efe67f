//! Terminal prompts: call confirmation and schema-driven argument entry.

use crate::style;
use serde_json::{Map, Value};
use std::io::{self, BufRead, Write};
use tether_types::ToolDescriptor;

/// Ask whether to run a tool call. Anything but y/yes declines.
pub async fn confirm_call(tool: &str, arguments: &Value) -> bool {
    let tool = tool.to_string();
    let summary = summarize_input(arguments);
    let result = tokio::task::spawn_blocking(move || {
        let stderr = io::stderr();
        let mut err = stderr.lock();
        let _ = writeln!(err, "  {} {}", style::info("Calling"), style::highlight(&tool));
        if !summary.is_empty() {
            let _ = writeln!(err, "  {}", style::dim(&summary));
        }
        let _ = write!(err, "{}", style::warning("  Execute this tool? [y/N] > "));
        let _ = err.flush();

        let mut input = String::new();
        let _ = io::stdin().lock().read_line(&mut input);
        matches!(input.trim().to_lowercase().as_str(), "y" | "yes")
    })
    .await;

    result.unwrap_or(false)
}

/// Prompt for each property in the tool's input schema.
///
/// `Ok(None)` means the operator aborted (EOF); `Err` carries the reason a
/// value was rejected.
pub async fn prompt_arguments(tool: &ToolDescriptor) -> Result<Option<Value>, String> {
    let schema = tool.input_schema.clone();
    let name = tool.name.clone();
    tokio::task::spawn_blocking(move || {
        let stdin = io::stdin();
        let stderr = io::stderr();
        let _ = writeln!(
            stderr.lock(),
            "\n{} {}:",
            style::info("Enter arguments for"),
            style::highlight(&name)
        );
        collect_arguments(&schema, &mut stdin.lock(), &mut stderr.lock())
    })
    .await
    .map_err(|e| format!("prompt failed: {e}"))?
}

/// Read one value per schema property from `input`, echoing prompts to `out`.
pub fn collect_arguments<R: BufRead, W: Write>(
    schema: &Value,
    input: &mut R,
    out: &mut W,
) -> Result<Option<Value>, String> {
    let mut arguments = Map::new();
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(Some(Value::Object(arguments)));
    };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    for (name, property) in properties {
        let kind = property_type(property);
        let is_required = required.contains(&name.as_str());
        let default = property.get("default");

        if let Some(description) = property.get("description").and_then(Value::as_str) {
            let _ = writeln!(out, "  {}", style::dim(description));
        }
        let mut label = format!("  {} ({kind}", style::highlight(name));
        if is_required {
            label.push_str(&format!(", {}", style::error("required")));
        }
        if let Some(default) = default {
            label.push_str(&format!(", default: {default}"));
        }
        label.push_str("): ");
        let _ = write!(out, "{label}");
        let _ = out.flush();

        let mut line = String::new();
        let read = input.read_line(&mut line).map_err(|e| e.to_string())?;
        if read == 0 {
            return Ok(None);
        }
        let raw = line.trim();

        if raw.is_empty() {
            if is_required {
                return Err(format!("{name} is required"));
            }
            if let Some(default) = default {
                arguments.insert(name.clone(), default.clone());
            }
            continue;
        }

        let value = coerce(raw, kind).map_err(|e| format!("Invalid value for {name}: {e}"))?;
        arguments.insert(name.clone(), value);
    }

    Ok(Some(Value::Object(arguments)))
}

/// The property's primary type; the first non-null member of a type list.
fn property_type(property: &Value) -> &str {
    match property.get("type") {
        Some(Value::String(kind)) => kind.as_str(),
        Some(Value::Array(kinds)) => kinds
            .iter()
            .filter_map(Value::as_str)
            .find(|kind| *kind != "null")
            .unwrap_or("string"),
        _ => "string",
    }
}

/// Convert typed input into a JSON value of the declared kind.
pub fn coerce(raw: &str, kind: &str) -> Result<Value, String> {
    match kind {
        "integer" => raw
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("expected an integer, got '{raw}'")),
        "number" => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("expected a number, got '{raw}'")),
        "boolean" => match raw.to_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "n" | "0" => Ok(Value::Bool(false)),
            _ => Err(format!("expected yes or no, got '{raw}'")),
        },
        "array" | "object" => {
            let value: Value = serde_json::from_str(raw).map_err(|e| e.to_string())?;
            let matches = if kind == "array" {
                value.is_array()
            } else {
                value.is_object()
            };
            if matches {
                Ok(value)
            } else {
                Err(format!("expected a JSON {kind}"))
            }
        }
        _ => Ok(Value::String(raw.to_string())),
    }
}

/// Create a brief summary of tool input for display.
fn summarize_input(input: &Value) -> String {
    match input {
        Value::Object(map) => {
            let parts: Vec<String> = map
                .iter()
                .take(3)
                .map(|(k, v)| {
                    let val = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    format!("{k}: {}", truncate(&val, 60))
                })
                .collect();
            parts.join(", ")
        }
        _ => String::new(),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}
