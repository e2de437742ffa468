//! Ritual lookup through a vector-search Data API.
//!
//! Ranking happens server-side: we send the query text for server-side
//! embedding and return the documents as they come back.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use url::Url;

use crate::config::VectorConfig;
use crate::error::{ToolError, ToolResult};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorQuery {
    pub text: String,
    /// Exact-match metadata filter, e.g. `{"culture": "Tamil"}`.
    pub filter: Map<String, Value>,
    pub limit: usize,
}

#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn find(&self, query: &VectorQuery) -> ToolResult<Vec<Value>>;

    /// Cheap round trip used by `vaultbridge check`.
    async fn ping(&self) -> ToolResult<()>;
}

/// Pick the configured backend, or one that refuses every call.
pub fn vector_search(config: &VectorConfig) -> ToolResult<Arc<dyn VectorSearch>> {
    match (&config.endpoint, &config.token) {
        (Some(endpoint), Some(token)) => Ok(Arc::new(AstraCollection::new(
            endpoint,
            token,
            &config.keyspace,
            &config.collection,
            Duration::from_secs(config.timeout_secs.max(1)),
        )?)),
        _ => Ok(Arc::new(DisabledVectorSearch)),
    }
}

pub struct AstraCollection {
    client: reqwest::Client,
    url: Url,
    token: String,
}

impl AstraCollection {
    pub fn new(
        endpoint: &str,
        token: &str,
        keyspace: &str,
        collection: &str,
        timeout: Duration,
    ) -> ToolResult<Self> {
        let url = collection_url(endpoint, keyspace, collection)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ToolError::BridgeUnavailable(format!("vector client: {e}")))?;
        Ok(Self {
            client,
            url,
            token: token.to_string(),
        })
    }

    async fn command(&self, body: &Value) -> ToolResult<Value> {
        let response = self
            .client
            .post(self.url.clone())
            .header("Token", &self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| ToolError::transport(format!("vector search request failed: {e}")))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ToolError::transport(format!("vector search read failed: {e}")))?;
        if !status.is_success() {
            return Err(ToolError::transport(format!("vector search returned {status}: {text}")));
        }
        let reply: Value = serde_json::from_str(&text)
            .map_err(|e| ToolError::transport(format!("vector search reply is not JSON: {e}")))?;
        check_errors(&reply)?;
        Ok(reply)
    }
}

#[async_trait]
impl VectorSearch for AstraCollection {
    async fn find(&self, query: &VectorQuery) -> ToolResult<Vec<Value>> {
        let reply = self.command(&find_body(query)).await?;
        Ok(documents(reply))
    }

    async fn ping(&self) -> ToolResult<()> {
        self.command(&json!({ "estimatedDocumentCount": {} })).await.map(|_| ())
    }
}

pub struct DisabledVectorSearch;

impl DisabledVectorSearch {
    fn refuse() -> ToolError {
        ToolError::BridgeUnavailable(
            "vector search is not configured (ASTRA_DB_API_ENDPOINT, ASTRA_DB_APPLICATION_TOKEN)".to_string(),
        )
    }
}

#[async_trait]
impl VectorSearch for DisabledVectorSearch {
    async fn find(&self, _query: &VectorQuery) -> ToolResult<Vec<Value>> {
        Err(Self::refuse())
    }

    async fn ping(&self) -> ToolResult<()> {
        Err(Self::refuse())
    }
}

fn collection_url(endpoint: &str, keyspace: &str, collection: &str) -> ToolResult<Url> {
    let bad = |msg: String| ToolError::BridgeUnavailable(format!("vector endpoint {endpoint}: {msg}"));
    let mut url = Url::parse(endpoint).map_err(|e| bad(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| bad("cannot be a base URL".to_string()))?
        .pop_if_empty()
        .extend(["api", "json", "v1", keyspace, collection]);
    Ok(url)
}

fn find_body(query: &VectorQuery) -> Value {
    let mut find = json!({
        "sort": { "$vectorize": query.text },
        "projection": { "$vectorize": 1 },
        "options": { "limit": query.limit }
    });
    if !query.filter.is_empty() {
        find["filter"] = Value::Object(query.filter.clone());
    }
    json!({ "find": find })
}

fn check_errors(reply: &Value) -> ToolResult<()> {
    let Some(errors) = reply.get("errors").and_then(|e| e.as_array()) else {
        return Ok(());
    };
    if errors.is_empty() {
        return Ok(());
    }
    let messages: Vec<String> = errors
        .iter()
        .map(|e| {
            e.get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| e.to_string())
        })
        .collect();
    Err(ToolError::transport(format!("vector search: {}", messages.join("; "))))
}

fn documents(mut reply: Value) -> Vec<Value> {
    match reply.pointer_mut("/data/documents").map(Value::take) {
        Some(Value::Array(docs)) => docs,
        _ => Vec::new(),
    }
}
