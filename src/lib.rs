//! A tool-execution facade over a stdio MCP database worker.
//!
//! Callers invoke named tools with JSON arguments and always get an
//! [`Envelope`] back. Reads are cached per session and writes invalidate
//! the entity kinds they touch.

pub mod bridge;
pub mod cache;
pub mod config;
pub mod envelope;
pub mod error;
pub mod mcp;
pub mod normalize;
pub mod quote;
pub mod records;
pub mod tools;
pub mod vector;

pub use bridge::{Executor, ProcessBridge};
pub use config::FacadeConfig;
pub use envelope::{Envelope, Status};
pub use error::{ConfigError, ToolError, ToolResult};
pub use tools::{TOOL_NAMES, ToolFacade, tool_definitions};
