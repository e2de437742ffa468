//! The single funnel every query goes through.
//!
//! The worker is started lazily on the first query and memoized for the
//! bridge's lifetime. Concurrent first callers wait on the same start. A
//! failed start is remembered: later calls report the same
//! [`ToolError::BridgeUnavailable`] without respawning.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::OnceCell;

use crate::config::WorkerConfig;
use crate::error::{ToolError, ToolResult};
use crate::mcp::McpWorker;

/// Runs one query string and returns the worker's raw text reply.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, query: &str) -> ToolResult<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Uninitialized,
    Starting,
    Ready,
    Failed,
}

impl BridgeState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Ready,
            3 => Self::Failed,
            _ => Self::Uninitialized,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::Starting => 1,
            Self::Ready => 2,
            Self::Failed => 3,
        }
    }
}

pub struct ProcessBridge {
    config: WorkerConfig,
    state: AtomicU8,
    worker: OnceCell<Result<Arc<McpWorker>, String>>,
}

impl ProcessBridge {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(BridgeState::Uninitialized.as_u8()),
            worker: OnceCell::new(),
        }
    }

    /// A worker that exited after a good start reports `Failed`; it is not
    /// respawned.
    pub fn state(&self) -> BridgeState {
        if let Some(Ok(worker)) = self.worker.get() {
            if !worker.is_alive() {
                return BridgeState::Failed;
            }
        }
        BridgeState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: BridgeState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    async fn worker(&self) -> ToolResult<Arc<McpWorker>> {
        let started = self
            .worker
            .get_or_init(|| async {
                self.set_state(BridgeState::Starting);
                match self.start().await {
                    Ok(worker) => {
                        self.set_state(BridgeState::Ready);
                        Ok(Arc::new(worker))
                    }
                    Err(e) => {
                        self.set_state(BridgeState::Failed);
                        tracing::error!(worker = %self.config.name, "bridge failed: {e}");
                        Err(match e {
                            ToolError::BridgeUnavailable(msg) => msg,
                            other => other.to_string(),
                        })
                    }
                }
            })
            .await;
        match started {
            Ok(worker) => Ok(worker.clone()),
            Err(msg) => Err(ToolError::BridgeUnavailable(msg.clone())),
        }
    }

    async fn start(&self) -> ToolResult<McpWorker> {
        if self.routing_id().is_none() {
            return Err(ToolError::BridgeUnavailable(
                "no project id configured (SUPABASE_PROJECT_ID)".to_string(),
            ));
        }
        let worker = McpWorker::start(&self.config).await?;
        if !worker.has_tool(&self.config.capability) {
            return Err(ToolError::BridgeUnavailable(format!(
                "worker '{}' does not advertise '{}'",
                worker.name(),
                self.config.capability
            )));
        }
        Ok(worker)
    }

    fn routing_id(&self) -> Option<&str> {
        self.config
            .routing_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
    }

    /// Start the worker if needed and return the tools it advertises.
    pub async fn advertised_tools(&self) -> ToolResult<Vec<Value>> {
        Ok(self.worker().await?.tools().to_vec())
    }
}

#[async_trait]
impl Executor for ProcessBridge {
    async fn execute(&self, query: &str) -> ToolResult<String> {
        let worker = self.worker().await?;
        let project_id = self.routing_id().unwrap_or_default();
        tracing::debug!(worker = %worker.name(), bytes = query.len(), "execute");
        worker
            .call_tool(
                &self.config.capability,
                json!({ "query": query, "project_id": project_id }),
            )
            .await
    }
}
