use serde_json::{Value, json};

use super::args::{GetUserIdArgs, UpdateUserDataArgs, UserIdArgs};
use super::{ToolFacade, expect_one, records_value, required};
use crate::cache::Scope;
use crate::error::{ToolError, ToolResult};
use crate::quote::Params;
use crate::records::{
    EntityKind, PROFILE_WRITE_KINDS, UserProfile, merge_preferences, split_profile_update,
};

const SELECT_USER_ID: &str = "SELECT user_id FROM users WHERE email = :email LIMIT 1;";
const SELECT_USER: &str = "SELECT * FROM users WHERE user_id = :user_id LIMIT 1;";
const SELECT_ACTIVITIES: &str = "SELECT cm.* FROM chat_sessions cs JOIN chat_messages cm ON cs.session_id = cm.session_id WHERE cs.user_id = :user_id ORDER BY cm.timestamp DESC;";
const SELECT_PREFERENCES: &str = "SELECT user_id, preferences FROM users WHERE user_id = :user_id LIMIT 1;";

pub(crate) async fn get_user_id(facade: &ToolFacade, session: &str, args: GetUserIdArgs) -> ToolResult<Value> {
    let email = required(&args.email, "email")?;
    facade
        .cached_read(
            session,
            "get_user_id",
            json!({ "email": email }),
            Scope::shared(EntityKind::UserLookup),
            || async move {
                let found = facade.query(SELECT_USER_ID, &Params::new().with("email", email)).await?;
                let record = expect_one(found, || ToolError::not_found(format!("No user found for email {email}.")))?;
                Ok(Value::Object(record))
            },
        )
        .await
}

pub(crate) async fn get_user_data(facade: &ToolFacade, session: &str, args: UserIdArgs) -> ToolResult<Value> {
    let user_id = required(&args.user_id, "user_id")?;
    facade
        .cached_read(
            session,
            "get_user_data",
            json!({ "user_id": user_id }),
            Scope::owned(user_id, EntityKind::UserProfile),
            || async move {
                let found = facade.query(SELECT_USER, &Params::new().with("user_id", user_id)).await?;
                let record = expect_one(found, || {
                    ToolError::not_found(format!("User data not found for user_id {user_id}."))
                })?;
                Ok(Value::Object(record))
            },
        )
        .await
}

/// Chat messages from every session the user owns. No tool writes chat
/// messages, so nothing invalidates these entries before the session ends.
pub(crate) async fn get_user_activities(
    facade: &ToolFacade,
    session: &str,
    args: UserIdArgs,
) -> ToolResult<Value> {
    let user_id = required(&args.user_id, "user_id")?;
    facade
        .cached_read(
            session,
            "get_user_activities",
            json!({ "user_id": user_id }),
            Scope::owned(user_id, EntityKind::UserActivities),
            || async move {
                let found = facade
                    .query(SELECT_ACTIVITIES, &Params::new().with("user_id", user_id))
                    .await?;
                Ok(records_value(found.into_records()))
            },
        )
        .await
}

/// Columns of `users` are set directly. Everything else lands in the
/// `preferences` bag, merged over what the row already holds.
pub(crate) async fn update_user_data(
    facade: &ToolFacade,
    session: &str,
    args: UpdateUserDataArgs,
) -> ToolResult<Value> {
    let user_id = required(&args.user_id, "user_id")?;
    let update = split_profile_update(args.data)?;

    let mut assignments = Vec::new();
    let mut params = Params::new().with("user_id", user_id);
    for (column, value) in update.columns.assignments() {
        assignments.push(format!("{column} = :{column}"));
        params.insert(column, value);
    }

    if !update.preferences.is_empty() {
        let found = facade
            .query(SELECT_PREFERENCES, &Params::new().with("user_id", user_id))
            .await?;
        let current = UserProfile::from_record(expect_one(found, || not_updated(user_id))?)?;
        let merged = merge_preferences(&current.preferences, &update.preferences);
        assignments.push("preferences = :preferences::jsonb".to_string());
        params.insert("preferences", Value::Object(merged));
    }

    let sql = format!(
        "UPDATE users SET {} WHERE user_id = :user_id RETURNING *;",
        assignments.join(", ")
    );
    let updated = expect_one(facade.query(&sql, &params).await?, || not_updated(user_id))?;

    facade.invalidate(session, Some(user_id), PROFILE_WRITE_KINDS).await;
    // email may have changed, and lookups are keyed by email
    facade.invalidate(session, None, &[EntityKind::UserLookup]).await;
    Ok(Value::Object(updated))
}

fn not_updated(user_id: &str) -> ToolError {
    ToolError::not_found(format!("User {user_id} not found or update failed."))
}
