use std::path::PathBuf;

use thiserror::Error;

/// Every failure a tool call can end in. All variants collapse into the
/// error [`Envelope`](crate::Envelope) at the tool boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    /// Bad or missing caller input. Never reaches the worker.
    #[error("{0}")]
    Validation(String),
    /// The worker could not be started or lacks the query capability.
    /// Sticky for the lifetime of the bridge.
    #[error("worker unavailable: {0}")]
    BridgeUnavailable(String),
    /// One call to the worker failed; local to that call.
    #[error("{0}")]
    Transport(String),
    /// Every normalization strategy failed on the worker output.
    #[error("could not decode worker output: {detail}")]
    Decode { detail: String, raw: String },
    /// The worker ran the query but it matched no rows.
    #[error("{0}")]
    NotFound(String),
}

impl ToolError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::BridgeUnavailable(_) => "bridge_unavailable",
            Self::Transport(_) => "transport",
            Self::Decode { .. } => "decode",
            Self::NotFound(_) => "not_found",
        }
    }
}

pub type ToolResult<T> = Result<T, ToolError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: String, value: String },
}
