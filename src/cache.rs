//! Per-session read cache with owner-scoped invalidation.
//!
//! Each conversation session owns its own map behind its own async lock, so
//! sessions never contend. A read takes a [`ReadTicket`] on miss and hands it
//! back to [`SessionCache::put`]; if a write invalidated the same owner and
//! kind in between, the populate is dropped instead of resurrecting stale
//! data.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value};
use tokio::sync::Mutex as AsyncMutex;

use crate::records::EntityKind;

/// Operation name plus a fingerprint of its canonical arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(operation: &str, args: &Value) -> Self {
        let canonical = canonical(args).to_string();
        let digest = blake3::hash(canonical.as_bytes());
        Self(format!("{operation}:{}", digest.to_hex()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonical(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

/// Who a cached value belongs to. `owner: None` marks shared data such as
/// the vendor catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub owner: Option<String>,
    pub kind: EntityKind,
}

impl Scope {
    pub fn owned(owner: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            owner: Some(owner.into()),
            kind,
        }
    }

    pub fn shared(kind: EntityKind) -> Self {
        Self { owner: None, kind }
    }
}

#[derive(Debug)]
pub struct ReadTicket {
    scope: Scope,
    generation: u64,
    owner_epoch: u64,
    kind_epoch: u64,
}

#[derive(Debug)]
pub enum Lookup {
    Hit(Value),
    Miss(ReadTicket),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    scope: Scope,
}

#[derive(Debug)]
struct SessionState {
    generation: u64,
    entries: HashMap<CacheKey, Entry>,
    owner_epochs: HashMap<Scope, u64>,
    // bumped by invalidations that name no owner
    kind_epochs: HashMap<EntityKind, u64>,
}

impl SessionState {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            entries: HashMap::new(),
            owner_epochs: HashMap::new(),
            kind_epochs: HashMap::new(),
        }
    }

    fn ticket(&self, scope: Scope) -> ReadTicket {
        ReadTicket {
            generation: self.generation,
            owner_epoch: self.owner_epochs.get(&scope).copied().unwrap_or(0),
            kind_epoch: self.kind_epochs.get(&scope.kind).copied().unwrap_or(0),
            scope,
        }
    }

    fn is_current(&self, ticket: &ReadTicket) -> bool {
        ticket.generation == self.generation
            && self.owner_epochs.get(&ticket.scope).copied().unwrap_or(0) == ticket.owner_epoch
            && self.kind_epochs.get(&ticket.scope.kind).copied().unwrap_or(0) == ticket.kind_epoch
    }
}

type SessionHandle = Arc<AsyncMutex<SessionState>>;

#[derive(Debug, Default)]
pub struct SessionCache {
    sessions: Mutex<HashMap<String, SessionHandle>>,
    generations: AtomicU64,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn session(&self, session: &str) -> SessionHandle {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions
            .entry(session.to_string())
            .or_insert_with(|| {
                let generation = self.generations.fetch_add(1, Ordering::Relaxed);
                Arc::new(AsyncMutex::new(SessionState::new(generation)))
            })
            .clone()
    }

    fn existing(&self, session: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.get(session).cloned()
    }

    pub async fn lookup(&self, session: &str, key: &CacheKey, scope: Scope) -> Lookup {
        let handle = self.session(session);
        let state = handle.lock().await;
        match state.entries.get(key) {
            Some(entry) => {
                tracing::debug!(session, cache = "hit", kind = entry.scope.kind.as_str(), key = key.as_str());
                Lookup::Hit(entry.value.clone())
            }
            None => {
                tracing::debug!(session, cache = "miss", kind = scope.kind.as_str(), key = key.as_str());
                Lookup::Miss(state.ticket(scope))
            }
        }
    }

    /// Store a read result. Returns false when the ticket went stale, or the
    /// session ended, while the read was in flight.
    pub async fn put(&self, session: &str, key: CacheKey, ticket: ReadTicket, value: Value) -> bool {
        let Some(handle) = self.existing(session) else {
            return false;
        };
        let mut state = handle.lock().await;
        if !state.is_current(&ticket) {
            tracing::debug!(session, cache = "stale", kind = ticket.scope.kind.as_str(), key = key.as_str());
            return false;
        }
        state.entries.insert(
            key,
            Entry {
                value,
                scope: ticket.scope,
            },
        );
        true
    }

    /// Drop every entry of `kinds` held for `owner`, or for every owner when
    /// `owner` is `None`. Returns how many entries were removed.
    pub async fn invalidate(&self, session: &str, owner: Option<&str>, kinds: &[EntityKind]) -> usize {
        let Some(handle) = self.existing(session) else {
            return 0;
        };
        let mut state = handle.lock().await;

        for kind in kinds {
            match owner {
                Some(owner) => {
                    let scope = Scope::owned(owner, *kind);
                    *state.owner_epochs.entry(scope).or_insert(0) += 1;
                }
                None => *state.kind_epochs.entry(*kind).or_insert(0) += 1,
            }
        }

        let before = state.entries.len();
        state.entries.retain(|_, entry| {
            let owner_matches = match owner {
                Some(owner) => entry.scope.owner.as_deref() == Some(owner),
                None => true,
            };
            !(owner_matches && kinds.contains(&entry.scope.kind))
        });
        let removed = before - state.entries.len();
        tracing::debug!(session, owner, removed, "cache invalidated");
        removed
    }

    pub fn end_session(&self, session: &str) -> bool {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.remove(session).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn fill(cache: &SessionCache, session: &str, key: &CacheKey, scope: Scope, value: Value) {
        match cache.lookup(session, key, scope).await {
            Lookup::Miss(ticket) => assert!(cache.put(session, key.clone(), ticket, value).await),
            Lookup::Hit(_) => panic!("expected miss"),
        }
    }

    fn is_hit(lookup: Lookup) -> bool {
        matches!(lookup, Lookup::Hit(_))
    }

    #[test]
    fn key_ignores_argument_order() {
        let a = CacheKey::new("get_budget_items", &json!({ "user_id": "U1", "x": { "b": 1, "a": 2 } }));
        let b = CacheKey::new("get_budget_items", &json!({ "x": { "a": 2, "b": 1 }, "user_id": "U1" }));
        assert_eq!(a, b);
        assert_ne!(a, CacheKey::new("get_timeline_events", &json!({ "user_id": "U1" })));
        assert_ne!(a, CacheKey::new("get_budget_items", &json!({ "user_id": "U2" })));
    }

    #[tokio::test]
    async fn hit_after_put() {
        let cache = SessionCache::new();
        let key = CacheKey::new("get_budget_items", &json!({ "user_id": "U1" }));
        let scope = Scope::owned("U1", EntityKind::BudgetItems);
        fill(&cache, "s1", &key, scope.clone(), json!([])).await;
        match cache.lookup("s1", &key, scope).await {
            Lookup::Hit(value) => assert_eq!(value, json!([])),
            Lookup::Miss(_) => panic!("expected hit"),
        }
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let cache = SessionCache::new();
        let key = CacheKey::new("get_user_data", &json!({ "user_id": "U1" }));
        let scope = Scope::owned("U1", EntityKind::UserProfile);
        fill(&cache, "s1", &key, scope.clone(), json!({ "user_id": "U1" })).await;
        assert!(!is_hit(cache.lookup("s2", &key, scope).await));
        assert_eq!(cache.session_count(), 2);
    }

    #[tokio::test]
    async fn invalidate_matches_owner_and_kind() {
        let cache = SessionCache::new();
        let items = CacheKey::new("get_budget_items", &json!({ "user_id": "U1" }));
        let other = CacheKey::new("get_budget_items", &json!({ "user_id": "U2" }));
        let events = CacheKey::new("get_timeline_events", &json!({ "user_id": "U1" }));
        fill(&cache, "s", &items, Scope::owned("U1", EntityKind::BudgetItems), json!([1])).await;
        fill(&cache, "s", &other, Scope::owned("U2", EntityKind::BudgetItems), json!([2])).await;
        fill(&cache, "s", &events, Scope::owned("U1", EntityKind::TimelineEvents), json!([3])).await;

        let removed = cache
            .invalidate("s", Some("U1"), &[EntityKind::BudgetItems, EntityKind::BudgetSummary])
            .await;
        assert_eq!(removed, 1);
        assert!(!is_hit(cache.lookup("s", &items, Scope::owned("U1", EntityKind::BudgetItems)).await));
        assert!(is_hit(cache.lookup("s", &other, Scope::owned("U2", EntityKind::BudgetItems)).await));
        assert!(is_hit(cache.lookup("s", &events, Scope::owned("U1", EntityKind::TimelineEvents)).await));
    }

    #[tokio::test]
    async fn ownerless_invalidate_clears_every_owner() {
        let cache = SessionCache::new();
        let a = CacheKey::new("get_budget_items", &json!({ "user_id": "U1" }));
        let b = CacheKey::new("get_budget_items", &json!({ "user_id": "U2" }));
        fill(&cache, "s", &a, Scope::owned("U1", EntityKind::BudgetItems), json!([])).await;
        fill(&cache, "s", &b, Scope::owned("U2", EntityKind::BudgetItems), json!([])).await;
        assert_eq!(cache.invalidate("s", None, &[EntityKind::BudgetItems]).await, 2);
    }

    #[tokio::test]
    async fn stale_populate_is_dropped() {
        let cache = SessionCache::new();
        let key = CacheKey::new("get_budget_items", &json!({ "user_id": "U1" }));
        let scope = Scope::owned("U1", EntityKind::BudgetItems);

        let Lookup::Miss(ticket) = cache.lookup("s", &key, scope.clone()).await else {
            panic!("expected miss");
        };
        // a write lands while the read is still talking to the worker
        cache.invalidate("s", Some("U1"), &[EntityKind::BudgetItems]).await;
        assert!(!cache.put("s", key.clone(), ticket, json!(["old"])).await);
        assert!(!is_hit(cache.lookup("s", &key, scope).await));
    }

    #[tokio::test]
    async fn unrelated_invalidate_keeps_ticket() {
        let cache = SessionCache::new();
        let key = CacheKey::new("get_budget_items", &json!({ "user_id": "U1" }));
        let Lookup::Miss(ticket) = cache
            .lookup("s", &key, Scope::owned("U1", EntityKind::BudgetItems))
            .await
        else {
            panic!("expected miss");
        };
        cache.invalidate("s", Some("U2"), &[EntityKind::BudgetItems]).await;
        cache.invalidate("s", Some("U1"), &[EntityKind::TimelineEvents]).await;
        assert!(cache.put("s", key, ticket, json!([])).await);
    }

    #[tokio::test]
    async fn end_session_drops_entries() {
        let cache = SessionCache::new();
        let key = CacheKey::new("get_user_data", &json!({ "user_id": "U1" }));
        let scope = Scope::owned("U1", EntityKind::UserProfile);
        fill(&cache, "s", &key, scope.clone(), json!({})).await;

        let Lookup::Hit(_) = cache.lookup("s", &key, scope.clone()).await else {
            panic!("expected hit");
        };
        assert!(cache.end_session("s"));
        assert!(!cache.end_session("s"));
        assert_eq!(cache.session_count(), 0);
        assert!(!is_hit(cache.lookup("s", &key, scope).await));
    }

    #[tokio::test]
    async fn ticket_from_ended_session_is_dropped() {
        let cache = SessionCache::new();
        let key = CacheKey::new("get_user_data", &json!({ "user_id": "U1" }));
        let scope = Scope::owned("U1", EntityKind::UserProfile);
        let Lookup::Miss(ticket) = cache.lookup("s", &key, scope.clone()).await else {
            panic!("expected miss");
        };
        cache.end_session("s");
        assert!(!cache.put("s", key.clone(), ticket, json!({})).await);

        // same id, fresh session
        let Lookup::Miss(_) = cache.lookup("s", &key, scope.clone()).await else {
            panic!("expected miss");
        };
        let Lookup::Miss(fresh) = cache.lookup("s", &key, scope).await else {
            panic!("expected miss");
        };
        assert!(cache.put("s", key, fresh, json!({})).await);
    }
}
