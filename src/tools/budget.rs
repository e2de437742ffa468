use serde_json::{Map, Value, json};

use super::args::{AddBudgetItemArgs, ItemIdArgs, SuggestAllocationsArgs, UpdateBudgetItemArgs, UserIdArgs};
use super::{ToolFacade, expect_one, owner_of, records_value, required, set_clause};
use crate::cache::Scope;
use crate::error::{ToolError, ToolResult};
use crate::normalize::Record;
use crate::quote::Params;
use crate::records::{BUDGET_UPDATE_COLUMNS, BUDGET_WRITE_KINDS, DEFAULT_BUDGET_STATUS, EntityKind};

const INSERT_ITEM: &str = "INSERT INTO budget_items (user_id, item_name, category, amount, vendor_name, status) \
     VALUES (:user_id, :item_name, :category, :amount, :vendor_name, :status) RETURNING *;";
const SELECT_ITEMS: &str = "SELECT * FROM budget_items WHERE user_id = :user_id;";
const DELETE_ITEM: &str = "DELETE FROM budget_items WHERE item_id = :item_id RETURNING item_id, user_id;";
const SUMMARY_BY_STATUS: &str = "SELECT status, COUNT(*) AS item_count, COALESCE(SUM(amount), 0) AS total_amount \
     FROM budget_items WHERE user_id = :user_id GROUP BY status;";
const BY_CATEGORY: &str = "SELECT category, COUNT(*) AS item_count, COALESCE(SUM(amount), 0) AS total_amount \
     FROM budget_items WHERE user_id = :user_id GROUP BY category ORDER BY total_amount DESC;";

/// Default split of a total budget, in percent. Sums to 100.
const ALLOCATION_SPLITS: &[(&str, i64)] = &[
    ("Venue", 30),
    ("Catering", 20),
    ("Photography", 10),
    ("Decorations", 10),
    ("Attire", 10),
    ("Entertainment", 5),
    ("Miscellaneous", 15),
];

/// Largest total we split. Beyond this, cents no longer fit exactly in an f64.
const MAX_TOTAL_BUDGET: f64 = 1_000_000_000_000.0;

const MISSING_ITEM_FIELDS: &str = "Missing required fields for budget item (user_id, item_name, category, amount).";

pub(crate) async fn add_budget_item(facade: &ToolFacade, session: &str, args: AddBudgetItemArgs) -> ToolResult<Value> {
    let user_id = required(&args.user_id, "user_id").map_err(|_| ToolError::validation(MISSING_ITEM_FIELDS))?;
    // older callers send the name as `item`
    let item_name = text_field(&args.item, "item_name")
        .or_else(|| text_field(&args.item, "item"))
        .ok_or_else(|| ToolError::validation(MISSING_ITEM_FIELDS))?;
    let category = text_field(&args.item, "category").ok_or_else(|| ToolError::validation(MISSING_ITEM_FIELDS))?;
    let amount = args
        .item
        .get("amount")
        .filter(|v| !v.is_null())
        .ok_or_else(|| ToolError::validation(MISSING_ITEM_FIELDS))
        .and_then(amount_value)?;
    let status = args
        .status
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_BUDGET_STATUS);

    let params = Params::new()
        .with("user_id", user_id)
        .with("item_name", item_name)
        .with("category", category)
        .with("amount", amount)
        .with("vendor_name", args.vendor_name.clone())
        .with("status", status);
    let inserted = expect_one(facade.query(INSERT_ITEM, &params).await?, || {
        ToolError::transport("Adding budget item failed: no row returned.")
    })?;

    facade.invalidate(session, Some(user_id), BUDGET_WRITE_KINDS).await;
    Ok(Value::Object(inserted))
}

pub(crate) async fn get_budget_items(facade: &ToolFacade, session: &str, args: UserIdArgs) -> ToolResult<Value> {
    let user_id = required(&args.user_id, "user_id")?;
    facade
        .cached_read(
            session,
            "get_budget_items",
            json!({ "user_id": user_id }),
            Scope::owned(user_id, EntityKind::BudgetItems),
            || async move {
                let found = facade.query(SELECT_ITEMS, &Params::new().with("user_id", user_id)).await?;
                Ok(records_value(found.into_records()))
            },
        )
        .await
}

/// Only whitelisted columns are written; other keys are ignored.
pub(crate) async fn update_budget_item(
    facade: &ToolFacade,
    session: &str,
    args: UpdateBudgetItemArgs,
) -> ToolResult<Value> {
    let item_id = required(&args.item_id, "item_id")?;
    let mut data = args.data;
    if let Some(amount) = data.get("amount").filter(|v| !v.is_null()) {
        let amount = amount_value(amount)?;
        data.insert("amount".to_string(), amount);
    }
    let (assignments, mut params) = set_clause(&data, BUDGET_UPDATE_COLUMNS);
    if assignments.is_empty() {
        return Err(ToolError::validation("No valid fields to update."));
    }
    params.insert("item_id", item_id);

    let sql = format!("UPDATE budget_items SET {assignments} WHERE item_id = :item_id RETURNING *;");
    let updated = expect_one(facade.query(&sql, &params).await?, || {
        ToolError::not_found(format!("Budget item {item_id} not found or update failed."))
    })?;

    facade
        .invalidate(session, owner_of(&updated).as_deref(), BUDGET_WRITE_KINDS)
        .await;
    Ok(Value::Object(updated))
}

pub(crate) async fn delete_budget_item(facade: &ToolFacade, session: &str, args: ItemIdArgs) -> ToolResult<Value> {
    let item_id = required(&args.item_id, "item_id")?;
    let deleted = expect_one(
        facade.query(DELETE_ITEM, &Params::new().with("item_id", item_id)).await?,
        || ToolError::not_found(format!("Budget item {item_id} not found.")),
    )?;

    facade
        .invalidate(session, owner_of(&deleted).as_deref(), BUDGET_WRITE_KINDS)
        .await;
    Ok(Value::Object(deleted))
}

/// Total spend and item count, overall and per status.
pub(crate) async fn get_budget_summary(facade: &ToolFacade, session: &str, args: UserIdArgs) -> ToolResult<Value> {
    let user_id = required(&args.user_id, "user_id")?;
    facade
        .cached_read(
            session,
            "get_budget_summary",
            json!({ "user_id": user_id }),
            Scope::owned(user_id, EntityKind::BudgetSummary),
            || async move {
                let found = facade.query(SUMMARY_BY_STATUS, &Params::new().with("user_id", user_id)).await?;
                Ok(summarize(user_id, &found.into_records()))
            },
        )
        .await
}

/// Spend per category with each category's share of the total.
pub(crate) async fn get_budget_category_analysis(
    facade: &ToolFacade,
    session: &str,
    args: UserIdArgs,
) -> ToolResult<Value> {
    let user_id = required(&args.user_id, "user_id")?;
    facade
        .cached_read(
            session,
            "get_budget_category_analysis",
            json!({ "user_id": user_id }),
            Scope::owned(user_id, EntityKind::BudgetCategories),
            || async move {
                let found = facade.query(BY_CATEGORY, &Params::new().with("user_id", user_id)).await?;
                Ok(with_shares(found.into_records()))
            },
        )
        .await
}

/// Split a total across the default categories. Works in cents; the
/// rounding remainder goes to the largest category.
pub(crate) fn suggest_budget_allocations(args: SuggestAllocationsArgs) -> ToolResult<Value> {
    if !args.total_budget.is_finite() || args.total_budget <= 0.0 {
        return Err(ToolError::validation("Total budget must be positive."));
    }
    if args.total_budget > MAX_TOTAL_BUDGET {
        return Err(ToolError::validation(format!(
            "Total budget must not exceed {MAX_TOTAL_BUDGET:.0}."
        )));
    }
    let total_cents = (args.total_budget * 100.0).round() as i64;
    let mut cents: Vec<(&str, i64)> = ALLOCATION_SPLITS
        .iter()
        .map(|(category, pct)| {
            let share = (i128::from(total_cents) * i128::from(*pct) + 50) / 100;
            (*category, share as i64)
        })
        .collect();

    let drift = total_cents - cents.iter().map(|(_, c)| c).sum::<i64>();
    if drift != 0 {
        if let Some(largest) = cents.iter_mut().max_by_key(|(_, c)| *c) {
            largest.1 += drift;
        }
    }

    let allocations: Map<String, Value> = cents
        .iter()
        .map(|(category, c)| (category.to_string(), json!(to_amount(*c))))
        .collect();
    Ok(json!({ "allocations": allocations, "total_suggested": to_amount(total_cents) }))
}

fn to_amount(cents: i64) -> f64 {
    cents as f64 / 100.0
}

fn text_field<'a>(item: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    item.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Amounts arrive as numbers or numeric text; either is bound as a number.
fn amount_value(value: &Value) -> ToolResult<Value> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(n) if n.is_finite() && n >= 0.0 => Ok(match value {
            Value::Number(_) => value.clone(),
            _ => json!(n),
        }),
        _ => Err(ToolError::validation(format!("amount must be a non-negative number, got {value}"))),
    }
}

// numeric columns come back as numbers or as text, depending on the driver
fn number(record: &Record, key: &str) -> f64 {
    match record.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn summarize(user_id: &str, rows: &[Record]) -> Value {
    let mut by_status = Map::new();
    let mut total = 0.0;
    let mut count = 0i64;
    for row in rows {
        let status = row.get("status").and_then(|s| s.as_str()).unwrap_or("Unknown");
        let amount = number(row, "total_amount");
        let items = number(row, "item_count") as i64;
        total += amount;
        count += items;
        by_status.insert(
            status.to_string(),
            json!({ "item_count": items, "total_amount": round2(amount) }),
        );
    }
    json!({
        "user_id": user_id,
        "item_count": count,
        "total_amount": round2(total),
        "by_status": by_status,
    })
}

fn with_shares(rows: Vec<Record>) -> Value {
    let grand: f64 = rows.iter().map(|r| number(r, "total_amount")).sum();
    let rows = rows
        .into_iter()
        .map(|mut row| {
            let share = if grand > 0.0 {
                round2(number(&row, "total_amount") / grand * 100.0)
            } else {
                0.0
            };
            row.insert("share_percent".to_string(), json!(share));
            row
        })
        .collect();
    records_value(rows)
}

#[cfg(test)]
mod tests {
    use super::super::testing::{ScriptedExecutor, facade_with};
    use super::*;

    fn cents_of(value: &Value) -> i64 {
        (value.as_f64().unwrap() * 100.0).round() as i64
    }

    #[tokio::test]
    async fn missing_amount_never_reaches_worker() {
        let (facade, exec) = facade_with(ScriptedExecutor::new(vec![]));
        let env = facade
            .execute_tool(
                "s",
                "add_budget_item",
                json!({ "user_id": "U1", "item": { "item_name": "Venue", "category": "Venue" } }),
            )
            .await;
        assert_eq!(env.error.as_deref(), Some(MISSING_ITEM_FIELDS));
        assert_eq!(exec.calls(), 0);
    }

    #[tokio::test]
    async fn insert_renders_defaults_and_legacy_name() {
        let (facade, exec) = facade_with(ScriptedExecutor::new(vec![Ok(
            r#"[{"item_id":"b1","user_id":"U1","item_name":"DJ","status":"Pending"}]"#.into(),
        )]));
        let env = facade
            .execute_tool(
                "s",
                "add_budget_item",
                json!({ "user_id": "U1", "item": { "item": "DJ", "category": "Entertainment", "amount": "1200" } }),
            )
            .await;
        assert!(env.is_success(), "{env:?}");
        assert_eq!(
            exec.queries(),
            vec![
                "INSERT INTO budget_items (user_id, item_name, category, amount, vendor_name, status) \
                 VALUES ('U1', 'DJ', 'Entertainment', 1200.0, NULL, 'Pending') RETURNING *;"
            ]
        );
    }

    #[tokio::test]
    async fn update_invalidates_owner_from_returned_row() {
        let (facade, exec) = facade_with(ScriptedExecutor::new(vec![
            Ok(r#"[{"item_id":"b1","user_id":"U1","amount":100}]"#.into()),
            Ok(r#"[{"item_id":"b1","user_id":"U1","amount":250}]"#.into()),
            Ok(r#"[{"item_id":"b1","user_id":"U1","amount":250}]"#.into()),
        ]));
        facade.execute_tool("s", "get_budget_items", json!({ "user_id": "U1" })).await;
        let updated = facade
            .execute_tool("s", "update_budget_item", json!({ "item_id": "b1", "data": { "amount": 250, "color": "red" } }))
            .await;
        assert!(updated.is_success());
        assert_eq!(
            exec.queries()[1],
            "UPDATE budget_items SET amount = 250 WHERE item_id = 'b1' RETURNING *;"
        );
        let listed = facade.execute_tool("s", "get_budget_items", json!({ "user_id": "U1" })).await;
        assert_eq!(listed.data.unwrap()[0]["amount"], 250);
        assert_eq!(exec.calls(), 3);
    }

    #[tokio::test]
    async fn update_with_no_known_columns_is_rejected() {
        let (facade, exec) = facade_with(ScriptedExecutor::new(vec![]));
        let env = facade
            .execute_tool("s", "update_budget_item", json!({ "item_id": "b1", "data": { "item_id": "b2" } }))
            .await;
        assert_eq!(env.error.as_deref(), Some("No valid fields to update."));
        assert_eq!(exec.calls(), 0);
    }

    #[tokio::test]
    async fn update_matching_no_row_is_not_found() {
        let (facade, _) = facade_with(ScriptedExecutor::new(vec![Ok("[]".into())]));
        let env = facade
            .execute_tool("s", "update_budget_item", json!({ "item_id": "b9", "data": { "status": "Paid" } }))
            .await;
        assert_eq!(env.error.as_deref(), Some("Budget item b9 not found or update failed."));
    }

    #[tokio::test]
    async fn summary_totals_statuses() {
        let (facade, _) = facade_with(ScriptedExecutor::new(vec![Ok(
            r#"[{"status":"Paid","item_count":2,"total_amount":"1500.50"},{"status":"Pending","item_count":1,"total_amount":499.5}]"#.into(),
        )]));
        let env = facade.execute_tool("s", "get_budget_summary", json!({ "user_id": "U1" })).await;
        let data = env.data.unwrap();
        assert_eq!(data["item_count"], 3);
        assert_eq!(data["total_amount"], 2000.0);
        assert_eq!(data["by_status"]["Paid"]["total_amount"], 1500.5);
    }

    #[tokio::test]
    async fn category_analysis_adds_shares() {
        let (facade, _) = facade_with(ScriptedExecutor::new(vec![Ok(
            r#"[{"category":"Venue","item_count":1,"total_amount":3000},{"category":"Attire","item_count":2,"total_amount":1000}]"#.into(),
        )]));
        let env = facade
            .execute_tool("s", "get_budget_category_analysis", json!({ "user_id": "U1" }))
            .await;
        let data = env.data.unwrap();
        assert_eq!(data[0]["share_percent"], 75.0);
        assert_eq!(data[1]["share_percent"], 25.0);
    }

    #[test]
    fn allocations_sum_to_total() {
        for total in [10_000.0, 12_345.67, 0.07, 999_999.99, 1.0] {
            let out = suggest_budget_allocations(SuggestAllocationsArgs { total_budget: total }).unwrap();
            let allocations = out["allocations"].as_object().unwrap();
            assert_eq!(allocations.len(), 7);
            let sum: i64 = allocations.values().map(cents_of).sum();
            assert_eq!(sum, (total * 100.0_f64).round() as i64, "total {total}");
        }
    }

    #[test]
    fn allocations_use_fixed_splits() {
        let out = suggest_budget_allocations(SuggestAllocationsArgs { total_budget: 10_000.0 }).unwrap();
        assert_eq!(out["allocations"]["Venue"], 3000.0);
        assert_eq!(out["allocations"]["Entertainment"], 500.0);
        assert_eq!(out["allocations"]["Miscellaneous"], 1500.0);
        assert_eq!(out["total_suggested"], 10_000.0);
    }

    #[test]
    fn allocations_reject_non_positive_total() {
        for total in [0.0, -5.0, f64::NAN] {
            let err = suggest_budget_allocations(SuggestAllocationsArgs { total_budget: total }).unwrap_err();
            assert_eq!(err, ToolError::validation("Total budget must be positive."));
        }
    }

    #[test]
    fn allocations_reject_totals_past_the_cap() {
        for total in [1e17, MAX_TOTAL_BUDGET * 2.0, f64::MAX] {
            let err = suggest_budget_allocations(SuggestAllocationsArgs { total_budget: total }).unwrap_err();
            assert_eq!(err.kind(), "validation", "total {total}");
        }
    }

    #[test]
    fn allocations_at_the_cap_still_sum() {
        let out = suggest_budget_allocations(SuggestAllocationsArgs { total_budget: MAX_TOTAL_BUDGET }).unwrap();
        let sum: i64 = out["allocations"].as_object().unwrap().values().map(cents_of).sum();
        assert_eq!(sum, 100_000_000_000_000);
        assert_eq!(out["allocations"]["Venue"], 300_000_000_000.0);
    }

    #[tokio::test]
    async fn huge_total_is_an_error_envelope() {
        let (facade, _) = facade_with(ScriptedExecutor::new(vec![]));
        let env = facade
            .execute_tool("s", "suggest_budget_allocations", json!({ "total_budget": 1e17 }))
            .await;
        assert!(!env.is_success());
        assert!(env.error.unwrap().starts_with("Total budget must not exceed"));
    }
}
