use serde_json::{Map, Value, json};

use super::ToolFacade;
use super::args::SearchRitualsArgs;
use crate::cache::Scope;
use crate::error::{ToolError, ToolResult};
use crate::records::EntityKind;
use crate::vector::VectorQuery;

const MAX_RITUAL_LIMIT: usize = 20;

pub(crate) async fn search_rituals(facade: &ToolFacade, session: &str, args: SearchRitualsArgs) -> ToolResult<Value> {
    let text = args.query.trim();
    if text.is_empty() {
        return Err(ToolError::validation("Query is required for ritual search."));
    }
    let mut filter = Map::new();
    for (field, value) in [("culture", &args.culture), ("region", &args.region)] {
        if let Some(v) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            filter.insert(field.to_string(), json!(v));
        }
    }
    let query = VectorQuery {
        text: text.to_string(),
        filter,
        limit: args.limit.unwrap_or(facade.ritual_limit()).clamp(1, MAX_RITUAL_LIMIT),
    };

    let key_args = json!({ "query": query.text, "filter": query.filter, "limit": query.limit });
    facade
        .cached_read(
            session,
            "search_rituals",
            key_args,
            Scope::shared(EntityKind::Rituals),
            || async move { Ok(Value::Array(facade.vectors().find(&query).await?)) },
        )
        .await
}
