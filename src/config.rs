use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "vaultbridge.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FacadeConfig {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub vector: VectorConfig,
}

/// The query worker: an MCP server spoken to over stdio.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Label used in logs and error messages.
    pub name: String,
    /// Command line that starts the worker, split like a shell would.
    pub command: String,
    /// Passed to the worker as `--access-token`.
    pub access_token: Option<String>,
    /// Tool the worker must advertise in `tools/list`.
    pub capability: String,
    /// Project the worker routes every query to.
    pub routing_id: Option<String>,
    /// Per-call timeout for `tools/call`.
    pub timeout_secs: u64,
    pub env: HashMap<String, String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "supabase".to_string(),
            command: "npx -y @supabase/mcp-server-supabase@latest".to_string(),
            access_token: None,
            capability: "execute_sql".to_string(),
            routing_id: None,
            timeout_secs: 30,
            env: HashMap::new(),
        }
    }
}

impl WorkerConfig {
    pub fn command_line(&self) -> Result<Vec<String>, String> {
        let mut parts = shlex::split(&self.command)
            .ok_or_else(|| format!("worker '{}': malformed command", self.name))?;
        if parts.is_empty() {
            return Err(format!("worker '{}': empty command", self.name));
        }
        if let Some(token) = &self.access_token {
            if !parts.iter().any(|p| p == "--access-token") {
                parts.push("--access-token".to_string());
                parts.push(token.clone());
            }
        }
        Ok(parts)
    }
}

/// The ritual collection behind the vector-search Data API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub keyspace: String,
    pub collection: String,
    /// Result count when the caller gives none.
    pub limit: usize,
    pub timeout_secs: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            token: None,
            keyspace: "default_keyspace".to_string(),
            collection: "ritual_data".to_string(),
            limit: 3,
            timeout_secs: 15,
        }
    }
}

impl VectorConfig {
    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some() && self.token.is_some()
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from(DEFAULT_CONFIG_FILE)
}

pub(crate) fn env_optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// Read `path` (a missing file means defaults), then apply environment
/// overrides.
pub fn load(path: &Path) -> Result<FacadeConfig, ConfigError> {
    load_with(path, env_optional)
}

pub fn load_with(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<FacadeConfig, ConfigError> {
    let mut config = match std::fs::read_to_string(path) {
        Ok(data) => serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => FacadeConfig::default(),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    apply_env(&mut config, lookup)?;
    Ok(config)
}

fn apply_env(
    config: &mut FacadeConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(token) = get("SUPABASE_ACCESS_TOKEN") {
        config.worker.access_token = Some(token);
    }
    if let Some(project) = get("SUPABASE_PROJECT_ID") {
        config.worker.routing_id = Some(project);
    }
    if let Some(command) = get("VAULTBRIDGE_WORKER_COMMAND") {
        config.worker.command = command;
    }
    if let Some(value) = get("VAULTBRIDGE_WORKER_TIMEOUT_SECS") {
        config.worker.timeout_secs = value
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or_else(|| ConfigError::InvalidEnv {
                name: "VAULTBRIDGE_WORKER_TIMEOUT_SECS".to_string(),
                value,
            })?;
    }
    if let Some(endpoint) = get("ASTRA_DB_API_ENDPOINT") {
        config.vector.endpoint = Some(endpoint);
    }
    if let Some(token) = get("ASTRA_DB_APPLICATION_TOKEN") {
        config.vector.token = Some(token);
    }
    if let Some(keyspace) = get("ASTRA_DB_KEYSPACE") {
        config.vector.keyspace = keyspace;
    }
    if let Some(collection) = get("ASTRA_DB_COLLECTION") {
        config.vector.collection = collection;
    }
    Ok(())
}
