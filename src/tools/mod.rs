//! The public tool operations.
//!
//! Every operation follows the same path: validate the arguments, consult the
//! session cache for reads, render the query, run it through the bridge,
//! normalize the reply, then populate or invalidate the cache. Whatever
//! happens, the caller gets an [`Envelope`].

mod args;
mod budget;
mod defs;
mod ritual;
#[cfg(test)]
mod testing;
mod timeline;
mod user;
mod vendor;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::bridge::{Executor, ProcessBridge};
use crate::cache::{CacheKey, Lookup, Scope, SessionCache};
use crate::config::FacadeConfig;
use crate::envelope::Envelope;
use crate::error::{ToolError, ToolResult};
use crate::normalize::{Normalized, Record, normalize};
use crate::quote::{Params, render};
use crate::records::EntityKind;
use crate::vector::{VectorSearch, vector_search};

pub use defs::{TOOL_NAMES, tool_definitions};

const DEFAULT_RITUAL_LIMIT: usize = 3;

pub struct ToolFacade {
    executor: Arc<dyn Executor>,
    vectors: Arc<dyn VectorSearch>,
    cache: SessionCache,
    ritual_limit: usize,
}

impl ToolFacade {
    pub fn new(executor: Arc<dyn Executor>, vectors: Arc<dyn VectorSearch>) -> Self {
        Self {
            executor,
            vectors,
            cache: SessionCache::new(),
            ritual_limit: DEFAULT_RITUAL_LIMIT,
        }
    }

    /// Wire the worker bridge and the vector backend described by `config`.
    /// Nothing is started until the first call needs it.
    pub fn from_config(config: &FacadeConfig) -> ToolResult<Self> {
        let bridge = Arc::new(ProcessBridge::new(config.worker.clone()));
        let vectors = vector_search(&config.vector)?;
        Ok(Self::new(bridge, vectors).with_ritual_limit(config.vector.limit))
    }

    pub fn with_ritual_limit(mut self, limit: usize) -> Self {
        self.ritual_limit = limit.max(1);
        self
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    /// Forget everything cached for `session`.
    pub fn end_session(&self, session: &str) -> bool {
        self.cache.end_session(session)
    }

    /// Run tool `name` with a JSON argument map on behalf of `session`.
    pub async fn execute_tool(&self, session: &str, name: &str, args: Value) -> Envelope {
        let started = Instant::now();
        let result = self.dispatch(session, name, args).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::info!(tool = name, session, status = "success", elapsed_ms, "tool call"),
            Err(e) => tracing::info!(
                tool = name,
                session,
                status = "error",
                kind = e.kind(),
                elapsed_ms,
                "tool call failed: {e}"
            ),
        }
        Envelope::from(result)
    }

    async fn dispatch(&self, session: &str, name: &str, args: Value) -> ToolResult<Value> {
        match name {
            "get_user_id" => user::get_user_id(self, session, parse(name, args)?).await,
            "get_user_data" => user::get_user_data(self, session, parse(name, args)?).await,
            "get_user_activities" => user::get_user_activities(self, session, parse(name, args)?).await,
            "update_user_data" => user::update_user_data(self, session, parse(name, args)?).await,
            "list_vendors" => vendor::list_vendors(self, session, parse(name, args)?).await,
            "get_vendor_details" => vendor::get_vendor_details(self, session, parse(name, args)?).await,
            "search_vendors" => vendor::search_vendors(self, session, parse(name, args)?).await,
            "get_vendor_availability" => vendor::get_vendor_availability(self, session, parse(name, args)?).await,
            "check_vendor_availability" => vendor::check_vendor_availability(parse(name, args)?),
            "add_budget_item" => budget::add_budget_item(self, session, parse(name, args)?).await,
            "get_budget_items" => budget::get_budget_items(self, session, parse(name, args)?).await,
            "update_budget_item" => budget::update_budget_item(self, session, parse(name, args)?).await,
            "delete_budget_item" => budget::delete_budget_item(self, session, parse(name, args)?).await,
            "get_budget_summary" => budget::get_budget_summary(self, session, parse(name, args)?).await,
            "get_budget_category_analysis" => {
                budget::get_budget_category_analysis(self, session, parse(name, args)?).await
            }
            "suggest_budget_allocations" => budget::suggest_budget_allocations(parse(name, args)?),
            "get_timeline_events" => timeline::get_timeline_events(self, session, parse(name, args)?).await,
            "create_timeline_event" => timeline::create_timeline_event(self, session, parse(name, args)?).await,
            "update_timeline_event" => timeline::update_timeline_event(self, session, parse(name, args)?).await,
            "delete_timeline_event" => timeline::delete_timeline_event(self, session, parse(name, args)?).await,
            "search_rituals" => ritual::search_rituals(self, session, parse(name, args)?).await,
            _ => Err(ToolError::validation(format!("unknown tool: {name}"))),
        }
    }

    /// Serve a read from the session cache, or fetch it and remember it.
    /// Failures are never cached.
    pub(crate) async fn cached_read<F, Fut>(
        &self,
        session: &str,
        operation: &str,
        key_args: Value,
        scope: Scope,
        fetch: F,
    ) -> ToolResult<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ToolResult<Value>>,
    {
        let key = CacheKey::new(operation, &key_args);
        let ticket = match self.cache.lookup(session, &key, scope).await {
            Lookup::Hit(value) => return Ok(value),
            Lookup::Miss(ticket) => ticket,
        };
        let value = fetch().await?;
        self.cache.put(session, key, ticket, value.clone()).await;
        Ok(value)
    }

    pub(crate) async fn invalidate(&self, session: &str, owner: Option<&str>, kinds: &[EntityKind]) {
        self.cache.invalidate(session, owner, kinds).await;
    }

    /// Render `template`, run it, and recover the records.
    pub(crate) async fn query(&self, template: &str, params: &Params) -> ToolResult<Normalized> {
        let sql = render(template, params)?;
        let raw = self.executor.execute(&sql).await?;
        let normalized = normalize(&raw)?;
        if let Normalized::One(record) = &normalized {
            if let Some(message) = error_record(record) {
                return Err(ToolError::transport(message));
            }
        }
        Ok(normalized)
    }

    pub(crate) fn vectors(&self) -> &dyn VectorSearch {
        self.vectors.as_ref()
    }

    pub(crate) fn ritual_limit(&self) -> usize {
        self.ritual_limit
    }
}

/// A reply of the form `{"error": ...}` is the worker reporting a failed
/// query, not a row.
fn error_record(record: &Record) -> Option<String> {
    if record.len() != 1 {
        return None;
    }
    match record.get("error")? {
        Value::String(message) => Some(message.clone()),
        Value::Object(detail) => Some(
            detail
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(detail.clone()).to_string()),
        ),
        other => Some(other.to_string()),
    }
}

fn parse<T: DeserializeOwned>(tool: &str, args: Value) -> ToolResult<T> {
    let args = match args {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    serde_json::from_value(args).map_err(|e| ToolError::validation(format!("invalid arguments for {tool}: {e}")))
}

/// A required string argument, rejected when blank.
pub(crate) fn required<'a>(value: &'a str, field: &str) -> ToolResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ToolError::validation(format!("{field} is required")));
    }
    Ok(trimmed)
}

/// The one record a single-row statement returned, or `missing` if none.
pub(crate) fn expect_one(normalized: Normalized, missing: impl FnOnce() -> ToolError) -> ToolResult<Record> {
    normalized.into_first().ok_or_else(missing)
}

pub(crate) fn records_value(records: Vec<Record>) -> Value {
    Value::Array(records.into_iter().map(Value::Object).collect())
}

/// Owner of a written row, taken from the row the worker returned.
pub(crate) fn owner_of(record: &Record) -> Option<String> {
    match record.get("user_id") {
        Some(Value::String(id)) => Some(id.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// `SET col = :col, ...` over whitelisted columns present in `data`.
/// Returns the clause and its parameters; unknown keys are ignored.
pub(crate) fn set_clause(data: &Map<String, Value>, allowed: &[&str]) -> (String, Params) {
    let mut parts = Vec::new();
    let mut params = Params::new();
    for column in allowed {
        if let Some(value) = data.get(*column) {
            parts.push(format!("{column} = :{column}"));
            params.insert(column, value.clone());
        }
    }
    (parts.join(", "), params)
}

#[cfg(test)]
mod tests {
    use super::testing::{BudgetTable, ScriptedExecutor, StaticVectors, facade_with};
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unknown_tool_is_validation_error() {
        let (facade, exec) = facade_with(ScriptedExecutor::new(vec![]));
        let env = facade.execute_tool("s", "drop_tables", json!({})).await;
        assert!(!env.is_success());
        assert_eq!(env.error.as_deref(), Some("unknown tool: drop_tables"));
        assert_eq!(exec.calls(), 0);
    }

    #[tokio::test]
    async fn missing_argument_never_reaches_worker() {
        let (facade, exec) = facade_with(ScriptedExecutor::new(vec![]));
        let env = facade.execute_tool("s", "get_user_data", json!({})).await;
        assert!(!env.is_success());
        assert!(env.error.unwrap().contains("missing field `user_id`"));
        assert_eq!(exec.calls(), 0);
    }

    #[tokio::test]
    async fn repeated_read_is_served_from_cache() {
        let (facade, exec) = facade_with(ScriptedExecutor::new(vec![Ok(
            r#"[{"item_id":"a","user_id":"U1","amount":5000}]"#.to_string(),
        )]));
        let first = facade.execute_tool("s", "get_budget_items", json!({ "user_id": "U1" })).await;
        let second = facade.execute_tool("s", "get_budget_items", json!({ "user_id": "U1" })).await;
        assert!(first.is_success());
        assert_eq!(first, second);
        assert_eq!(exec.calls(), 1);
    }

    #[tokio::test]
    async fn other_session_does_not_share_cache() {
        let reply = r#"[{"item_id":"a","user_id":"U1"}]"#.to_string();
        let (facade, exec) = facade_with(ScriptedExecutor::new(vec![Ok(reply.clone()), Ok(reply)]));
        facade.execute_tool("s1", "get_budget_items", json!({ "user_id": "U1" })).await;
        facade.execute_tool("s2", "get_budget_items", json!({ "user_id": "U1" })).await;
        assert_eq!(exec.calls(), 2);
    }

    #[tokio::test]
    async fn failed_read_is_not_cached() {
        let (facade, exec) = facade_with(ScriptedExecutor::new(vec![
            Err(ToolError::transport("connection reset")),
            Ok("[]".to_string()),
        ]));
        let first = facade.execute_tool("s", "get_budget_items", json!({ "user_id": "U1" })).await;
        assert_eq!(first.error.as_deref(), Some("connection reset"));
        let second = facade.execute_tool("s", "get_budget_items", json!({ "user_id": "U1" })).await;
        assert_eq!(second, Envelope::success(json!([])));
        assert_eq!(exec.calls(), 2);
    }

    #[tokio::test]
    async fn undecodable_reply_keeps_raw_text() {
        let (facade, _) = facade_with(ScriptedExecutor::new(vec![Ok("permission denied for table users".to_string())]));
        let env = facade.execute_tool("s", "get_user_data", json!({ "user_id": "U1" })).await;
        assert!(!env.is_success());
        assert_eq!(env.raw.as_deref(), Some("permission denied for table users"));
    }

    #[tokio::test]
    async fn error_object_from_worker_is_transport_error() {
        let (facade, _) = facade_with(ScriptedExecutor::new(vec![Ok(
            r#"{"error":{"message":"relation \"budget_itemz\" does not exist"}}"#.to_string(),
        )]));
        let env = facade.execute_tool("s", "get_budget_items", json!({ "user_id": "U1" })).await;
        assert_eq!(env.error.as_deref(), Some("relation \"budget_itemz\" does not exist"));
        assert!(env.raw.is_none());
    }

    #[tokio::test]
    async fn bridge_unavailable_surfaces_in_envelope() {
        let (facade, _) = facade_with(ScriptedExecutor::new(vec![Err(ToolError::BridgeUnavailable(
            "worker 'supabase': spawn: No such file or directory".to_string(),
        ))]));
        let env = facade.execute_tool("s", "get_timeline_events", json!({ "user_id": "U1" })).await;
        assert_eq!(
            env.to_value(),
            json!({
                "status": "error",
                "error": "worker unavailable: worker 'supabase': spawn: No such file or directory"
            })
        );
    }

    #[tokio::test]
    async fn budget_round_trip_against_fake_table() {
        let table = Arc::new(BudgetTable::default());
        let facade = ToolFacade::new(table.clone(), Arc::new(StaticVectors::default()));

        let added = facade
            .execute_tool(
                "s",
                "add_budget_item",
                json!({ "user_id": "U1", "item": { "item_name": "Venue", "category": "Venue", "amount": 5000 } }),
            )
            .await;
        assert!(added.is_success(), "{added:?}");
        let item = added.data.unwrap();
        assert_eq!(item["status"], "Pending");
        let item_id = item["item_id"].as_str().unwrap().to_string();

        let listed = facade.execute_tool("s", "get_budget_items", json!({ "user_id": "U1" })).await;
        assert_eq!(listed.data.unwrap().as_array().unwrap().len(), 1);

        let deleted = facade.execute_tool("s", "delete_budget_item", json!({ "item_id": item_id })).await;
        assert!(deleted.is_success(), "{deleted:?}");

        // the delete cleared the cached listing, so this goes back to the table
        let calls_before = table.calls();
        let listed = facade.execute_tool("s", "get_budget_items", json!({ "user_id": "U1" })).await;
        assert_eq!(listed, Envelope::success(json!([])));
        assert_eq!(table.calls(), calls_before + 1);

        let again = facade.execute_tool("s", "delete_budget_item", json!({ "item_id": item_id })).await;
        assert!(!again.is_success());
        assert!(again.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn end_session_drops_cached_reads() {
        let reply = r#"[{"event_id":"e1","user_id":"U1"}]"#.to_string();
        let (facade, exec) = facade_with(ScriptedExecutor::new(vec![Ok(reply.clone()), Ok(reply)]));
        facade.execute_tool("s", "get_timeline_events", json!({ "user_id": "U1" })).await;
        assert!(facade.end_session("s"));
        facade.execute_tool("s", "get_timeline_events", json!({ "user_id": "U1" })).await;
        assert_eq!(exec.calls(), 2);
    }

    #[test]
    fn set_clause_follows_whitelist_order() {
        let data = json!({ "status": "Paid", "amount": 4500, "user_id": "U2", "notes": "x" });
        let (clause, params) = set_clause(data.as_object().unwrap(), crate::records::BUDGET_UPDATE_COLUMNS);
        assert_eq!(clause, "amount = :amount, status = :status");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn error_record_needs_single_key() {
        let lone: Record = serde_json::from_value(json!({ "error": "boom" })).unwrap();
        assert_eq!(error_record(&lone).as_deref(), Some("boom"));
        let row: Record = serde_json::from_value(json!({ "error": "x", "id": 1 })).unwrap();
        assert!(error_record(&row).is_none());
    }
}
