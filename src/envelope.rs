use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ToolError, ToolResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
}

/// The only shape a tool operation returns to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Undecodable worker output, kept so the caller can see what came back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl Envelope {
    pub fn success(data: impl Into<Value>) -> Self {
        Self {
            status: Status::Success,
            data: Some(data.into()),
            error: None,
            raw: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            data: None,
            error: Some(message.into()),
            raw: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({ "status": "error", "error": format!("envelope encode: {e}") })
        })
    }
}

impl From<ToolError> for Envelope {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::Decode { detail, raw } => Self {
                status: Status::Error,
                data: None,
                error: Some(detail),
                raw: Some(raw),
            },
            other => Self::error(other.to_string()),
        }
    }
}

impl From<ToolResult<Value>> for Envelope {
    fn from(result: ToolResult<Value>) -> Self {
        match result {
            Ok(data) => Self::success(data),
            Err(err) => err.into(),
        }
    }
}
