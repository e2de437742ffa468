use chrono::NaiveDate;
use serde_json::{Value, json};
use uuid::Uuid;

use super::args::{CheckAvailabilityArgs, ListVendorsArgs, SearchVendorsArgs, VendorIdArgs};
use super::{ToolFacade, expect_one, records_value, required};
use crate::cache::Scope;
use crate::error::{ToolError, ToolResult};
use crate::quote::Params;
use crate::records::{EntityKind, VENDOR_FILTER_KEYS};

const SELECT_VENDOR: &str = "SELECT * FROM vendors WHERE vendor_id = :vendor_id LIMIT 1;";
const SELECT_AVAILABILITY: &str = "SELECT available_date, status FROM vendor_availability \
     WHERE vendor_id = :vendor_id AND available_date >= :today ORDER BY available_date;";

pub(crate) async fn list_vendors(facade: &ToolFacade, session: &str, args: ListVendorsArgs) -> ToolResult<Value> {
    let filters = args.filters.unwrap_or_default();
    let mut clauses = Vec::new();
    let mut params = Params::new();
    for (key, value) in &filters {
        if !VENDOR_FILTER_KEYS.contains(&key.as_str()) {
            return Err(ToolError::validation(format!(
                "unsupported vendor filter '{key}' (allowed: {})",
                VENDOR_FILTER_KEYS.join(", ")
            )));
        }
        let text = match value {
            Value::String(s) if !s.trim().is_empty() => s.trim(),
            Value::Null => continue,
            _ => return Err(ToolError::validation(format!("vendor filter '{key}' must be text"))),
        };
        let column = match key.as_str() {
            "city" => "address->>'city'",
            _ => "vendor_category",
        };
        clauses.push(format!("{column} ILIKE :{key}"));
        params.insert(key, format!("%{text}%"));
    }
    let sql = select_vendors(&clauses);

    facade
        .cached_read(
            session,
            "list_vendors",
            json!({ "filters": filters }),
            Scope::shared(EntityKind::Vendors),
            || async move { Ok(records_value(facade.query(&sql, &params).await?.into_records())) },
        )
        .await
}

pub(crate) async fn get_vendor_details(facade: &ToolFacade, session: &str, args: VendorIdArgs) -> ToolResult<Value> {
    let vendor_id = required(&args.vendor_id, "vendor_id")?;
    facade
        .cached_read(
            session,
            "get_vendor_details",
            json!({ "vendor_id": vendor_id }),
            Scope::shared(EntityKind::Vendors),
            || async move {
                let found = facade.query(SELECT_VENDOR, &Params::new().with("vendor_id", vendor_id)).await?;
                let record = expect_one(found, || ToolError::not_found(format!("Vendor {vendor_id} not found.")))?;
                Ok(Value::Object(record))
            },
        )
        .await
}

pub(crate) async fn search_vendors(facade: &ToolFacade, session: &str, args: SearchVendorsArgs) -> ToolResult<Value> {
    let mut clauses = Vec::new();
    let mut params = Params::new();
    let mut bind = |clause: &str, value: Value| {
        let name = format!("p{}", params.len());
        clauses.push(clause.replace("{}", &format!(":{name}")));
        params.insert(&name, value);
    };

    if let Some(category) = non_blank(&args.category) {
        bind("vendor_category ILIKE {}", json!(format!("%{category}%")));
    }
    if let Some(location) = non_blank(&args.location) {
        bind("address->>'city' ILIKE {}", json!(format!("%{location}%")));
    }
    if let Some(range) = &args.budget_range {
        if let Some(min) = range.min {
            bind("price >= {}", json!(min));
        }
        if let Some(max) = range.max {
            bind("price <= {}", json!(max));
        }
    }
    if let Some(rating) = args.ratings {
        bind("rating >= {}", json!(rating));
    }
    if let Some(terms) = tsquery_terms(args.keywords.as_deref().unwrap_or_default()) {
        bind("fts_data @@ to_tsquery('english', {})", json!(terms));
    }
    let sql = select_vendors(&clauses);

    let key_args = json!({
        "category": args.category,
        "location": args.location,
        "budget_range": args.budget_range.as_ref().map(|r| json!({ "min": r.min, "max": r.max })),
        "ratings": args.ratings,
        "keywords": args.keywords,
    });
    facade
        .cached_read(
            session,
            "search_vendors",
            key_args,
            Scope::shared(EntityKind::Vendors),
            || async move { Ok(records_value(facade.query(&sql, &params).await?.into_records())) },
        )
        .await
}

/// Upcoming availability rows, from today on.
pub(crate) async fn get_vendor_availability(
    facade: &ToolFacade,
    session: &str,
    args: VendorIdArgs,
) -> ToolResult<Value> {
    let vendor_id = valid_vendor_id(&args.vendor_id)?;
    let today = chrono::Local::now().date_naive().format("%Y-%m-%d").to_string();
    let params = Params::new().with("vendor_id", vendor_id.as_str()).with("today", today.as_str());

    facade
        .cached_read(
            session,
            "get_vendor_availability",
            json!({ "vendor_id": vendor_id, "today": today }),
            Scope::owned(vendor_id.as_str(), EntityKind::VendorAvailability),
            || async move {
                let found = facade.query(SELECT_AVAILABILITY, &params).await?;
                Ok(records_value(found.into_records()))
            },
        )
        .await
}

/// Answer from availability rows the caller already holds. A date with no
/// row counts as available.
pub(crate) fn check_vendor_availability(args: CheckAvailabilityArgs) -> ToolResult<Value> {
    valid_vendor_id(&args.vendor_id)?;
    let date = args.date.trim();
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| ToolError::validation("Invalid date format for date_to_check. Use YYYY-MM-DD."))?;

    let entry = args.availability_data.iter().find(|row| {
        row.get("available_date")
            .and_then(|d| d.as_str())
            .is_some_and(|d| d.get(..10) == Some(date))
    });
    let available = match entry {
        Some(row) => row.get("status").and_then(|s| s.as_str()) == Some("available"),
        None => true,
    };
    Ok(json!({ "vendor_id": args.vendor_id.trim(), "date": date, "available": available }))
}

fn valid_vendor_id(raw: &str) -> ToolResult<String> {
    Uuid::parse_str(raw.trim())
        .map(|id| id.to_string())
        .map_err(|_| ToolError::validation("Invalid vendor_id format."))
}

fn select_vendors(clauses: &[String]) -> String {
    if clauses.is_empty() {
        "SELECT * FROM vendors;".to_string()
    } else {
        format!("SELECT * FROM vendors WHERE {};", clauses.join(" AND "))
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// AND together the keyword words. Operators and punctuation are dropped so
/// caller text can never make `to_tsquery` fail to parse.
fn tsquery_terms(keywords: &[String]) -> Option<String> {
    let words: Vec<String> = keywords
        .iter()
        .flat_map(|k| k.split_whitespace())
        .map(|w| w.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        .filter(|w| !w.is_empty())
        .collect();
    (!words.is_empty()).then(|| words.join(" & "))
}
