use serde_json::{Value, json};

use super::args::{CreateTimelineEventArgs, EventIdArgs, UpdateTimelineEventArgs, UserIdArgs};
use super::{ToolFacade, expect_one, owner_of, records_value, required, set_clause};
use crate::cache::Scope;
use crate::error::{ToolError, ToolResult};
use crate::quote::Params;
use crate::records::{EntityKind, TIMELINE_UPDATE_COLUMNS, TIMELINE_WRITE_KINDS};

const SELECT_EVENTS: &str = "SELECT * FROM timeline_events WHERE user_id = :user_id ORDER BY event_date_time;";
const INSERT_EVENT: &str = "INSERT INTO timeline_events (user_id, event_name, event_date_time, description, location) \
     VALUES (:user_id, :event_name, :event_date_time, :description, :location) RETURNING *;";
const DELETE_EVENT: &str = "DELETE FROM timeline_events WHERE event_id = :event_id RETURNING event_id, user_id;";

pub(crate) async fn get_timeline_events(facade: &ToolFacade, session: &str, args: UserIdArgs) -> ToolResult<Value> {
    let user_id = required(&args.user_id, "user_id")?;
    facade
        .cached_read(
            session,
            "get_timeline_events",
            json!({ "user_id": user_id }),
            Scope::owned(user_id, EntityKind::TimelineEvents),
            || async move {
                let found = facade.query(SELECT_EVENTS, &Params::new().with("user_id", user_id)).await?;
                Ok(records_value(found.into_records()))
            },
        )
        .await
}

pub(crate) async fn create_timeline_event(
    facade: &ToolFacade,
    session: &str,
    args: CreateTimelineEventArgs,
) -> ToolResult<Value> {
    let missing = || ToolError::validation("Missing required fields for timeline event (user_id, event_name, event_date_time).");
    let user_id = required(&args.user_id, "user_id").map_err(|_| missing())?;
    let text = |key: &str| {
        args.event
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };
    let event_name = text("event_name").ok_or_else(missing)?;
    let event_date_time = text("event_date_time").ok_or_else(missing)?;

    let params = Params::new()
        .with("user_id", user_id)
        .with("event_name", event_name)
        .with("event_date_time", event_date_time)
        .with("description", text("description"))
        .with("location", text("location"));
    let created = expect_one(facade.query(INSERT_EVENT, &params).await?, || {
        ToolError::transport("Creating timeline event failed: no row returned.")
    })?;

    facade.invalidate(session, Some(user_id), TIMELINE_WRITE_KINDS).await;
    Ok(Value::Object(created))
}

pub(crate) async fn update_timeline_event(
    facade: &ToolFacade,
    session: &str,
    args: UpdateTimelineEventArgs,
) -> ToolResult<Value> {
    let event_id = required(&args.event_id, "event_id")?;
    let (assignments, mut params) = set_clause(&args.updates, TIMELINE_UPDATE_COLUMNS);
    if assignments.is_empty() {
        return Err(ToolError::validation("No valid fields to update."));
    }
    params.insert("event_id", event_id);

    let sql = format!("UPDATE timeline_events SET {assignments} WHERE event_id = :event_id RETURNING *;");
    let updated = expect_one(facade.query(&sql, &params).await?, || {
        ToolError::not_found(format!("Timeline event {event_id} not found or update failed."))
    })?;

    facade
        .invalidate(session, owner_of(&updated).as_deref(), TIMELINE_WRITE_KINDS)
        .await;
    Ok(Value::Object(updated))
}

pub(crate) async fn delete_timeline_event(facade: &ToolFacade, session: &str, args: EventIdArgs) -> ToolResult<Value> {
    let event_id = required(&args.event_id, "event_id")?;
    let deleted = expect_one(
        facade.query(DELETE_EVENT, &Params::new().with("event_id", event_id)).await?,
        || ToolError::not_found(format!("Timeline event {event_id} not found.")),
    )?;

    facade
        .invalidate(session, owner_of(&deleted).as_deref(), TIMELINE_WRITE_KINDS)
        .await;
    Ok(Value::Object(deleted))
}
