// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use qm_core::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One client request: `{"id": ..., "tool": "...", "args": {...}}`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Request {
    /// Echoed back verbatim; clients correlate responses with it.
    #[serde(default)]
    pub id: Value,
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

impl Request {
    /// Decode the argument map into a typed struct. An absent map reads
    /// as empty, so all-optional tools accept bare requests.
    pub fn parse_args<T: serde::de::DeserializeOwned>(&self) -> Result<T, EngineError> {
        let args = match &self.args {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other.clone(),
        };
        serde_json::from_value(args)
            .map_err(|e| EngineError::invalid_params(format!("bad arguments: {e}")))
    }
}

/// Successful tool output: a text block, optionally with structured data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), data: None }
    }

    pub fn with_data(text: impl Into<String>, data: Value) -> Self {
        Self { text: text.into(), data: Some(data) }
    }
}

/// Error payload with the semantic kind tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireError {
    pub kind: String,
    pub message: String,
}

/// One response line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl Response {
    pub fn ok(id: Value, result: ToolResult) -> Self {
        Self { id, result: Some(result), error: None }
    }

    pub fn fail(id: Value, error: &EngineError) -> Self {
        Self {
            id,
            result: None,
            error: Some(WireError {
                kind: error.kind.as_str().to_string(),
                message: error.message.clone(),
            }),
        }
    }
}
