//! Tool catalog entries and call results.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Failure;

/// A tool advertised by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Structural description of accepted arguments.
    #[serde(rename = "inputSchema", default = "default_schema")]
    pub input_schema: Value,
    /// Optional hint about the shape of structured output.
    #[serde(rename = "outputSchema", default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<ToolAnnotations>,
}

fn default_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// Behavioural hints a server may attach to a tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolAnnotations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only_hint: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destructive_hint: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotent_hint: Option<bool>,
}

impl ToolDescriptor {
    /// Names of the properties the input schema marks as required.
    pub fn required_arguments(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// A resource advertised by a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// One typed block of tool output. Kinds the client does not know are kept
/// verbatim in [`ContentBlock::Other`].
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text { text: String },
    Image { data: String, mime_type: String },
    Resource { resource: Value },
    Other(Value),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum TaggedBlock {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: Value,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// The block's `type` tag.
    pub fn kind(&self) -> &str {
        match self {
            ContentBlock::Text { .. } => "text",
            ContentBlock::Image { .. } => "image",
            ContentBlock::Resource { .. } => "resource",
            ContentBlock::Other(raw) => raw.get("type").and_then(Value::as_str).unwrap_or("unknown"),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        }
    }
}

impl Serialize for ContentBlock {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let tagged = match self {
            ContentBlock::Text { text } => TaggedBlock::Text { text: text.clone() },
            ContentBlock::Image { data, mime_type } => TaggedBlock::Image {
                data: data.clone(),
                mime_type: mime_type.clone(),
            },
            ContentBlock::Resource { resource } => TaggedBlock::Resource {
                resource: resource.clone(),
            },
            ContentBlock::Other(raw) => return raw.serialize(serializer),
        };
        tagged.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ContentBlock {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Ok(match serde_json::from_value::<TaggedBlock>(raw.clone()) {
            Ok(TaggedBlock::Text { text }) => ContentBlock::Text { text },
            Ok(TaggedBlock::Image { data, mime_type }) => ContentBlock::Image { data, mime_type },
            Ok(TaggedBlock::Resource { resource }) => ContentBlock::Resource { resource },
            Err(_) => ContentBlock::Other(raw),
        })
    }
}

/// Outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallResult {
    Success(Vec<ContentBlock>),
    Failure(Failure),
}

impl ToolCallResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolCallResult::Success(_))
    }

    /// Output content, empty for failures.
    pub fn content(&self) -> &[ContentBlock] {
        match self {
            ToolCallResult::Success(content) => content,
            ToolCallResult::Failure(_) => &[],
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            ToolCallResult::Success(_) => None,
            ToolCallResult::Failure(failure) => Some(failure),
        }
    }

    /// The JSON shape the protocol uses for call results.
    pub fn to_json(&self) -> Value {
        match self {
            ToolCallResult::Success(content) => serde_json::json!({ "content": content }),
            ToolCallResult::Failure(failure) => serde_json::json!({
                "isError": true,
                "error": { "kind": failure.kind, "message": failure.message },
            }),
        }
    }
}
