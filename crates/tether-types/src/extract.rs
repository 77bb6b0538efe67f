//! Call/result contract of document-reading tools.
//!
//! File-system servers expose a `read(path, options)` tool that returns the
//! extracted text plus a metadata map. The client has no knowledge of file
//! formats; these types only shape the arguments and interpret the result.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::tool::ContentBlock;

/// Options accepted by a document-reading tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summarize: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_only: Option<bool>,
}

impl ReadOptions {
    /// Build the tool arguments for reading `path`.
    pub fn to_arguments(&self, path: &str) -> Value {
        let mut args = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        args.insert("path".to_string(), Value::String(path.to_string()));
        Value::Object(args)
    }
}

/// Text extracted from a document, with whatever metadata the reader found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// The reading tool ran but could not produce content.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("Extraction failed: {0}")]
    Failed(String),

    #[error("Reader returned no text content")]
    Empty,
}

impl ExtractedContent {
    /// Interpret the content blocks of a successful read.
    ///
    /// A single text block holding a `{content, metadata}` JSON object is
    /// decoded as such; otherwise all text blocks are joined and metadata is
    /// left empty.
    pub fn from_blocks(blocks: &[ContentBlock]) -> Result<Self, ExtractionError> {
        let texts: Vec<&str> = blocks.iter().filter_map(ContentBlock::as_text).collect();
        if texts.is_empty() {
            return Err(ExtractionError::Empty);
        }

        if let [single] = texts.as_slice() {
            if let Ok(parsed) = serde_json::from_str::<ExtractedContent>(single) {
                return Ok(parsed);
            }
        }

        Ok(Self {
            content: texts.join("\n"),
            metadata: Map::new(),
        })
    }
}
