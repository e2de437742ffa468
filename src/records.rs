//! Entity kinds and the table shapes the tools write into.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{ToolError, ToolResult};
use crate::normalize::Record;

/// What a cached read holds. Writes name the kinds they make stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    UserProfile,
    UserLookup,
    UserActivities,
    Vendors,
    VendorAvailability,
    BudgetItems,
    BudgetSummary,
    BudgetCategories,
    TimelineEvents,
    Rituals,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserProfile => "user_profile",
            Self::UserLookup => "user_lookup",
            Self::UserActivities => "user_activities",
            Self::Vendors => "vendors",
            Self::VendorAvailability => "vendor_availability",
            Self::BudgetItems => "budget_items",
            Self::BudgetSummary => "budget_summary",
            Self::BudgetCategories => "budget_categories",
            Self::TimelineEvents => "timeline_events",
            Self::Rituals => "rituals",
        }
    }
}

/// Email lookups are shared entries, so a profile write clears
/// [`EntityKind::UserLookup`] for every owner on top of these.
pub const PROFILE_WRITE_KINDS: &[EntityKind] = &[EntityKind::UserProfile];
pub const BUDGET_WRITE_KINDS: &[EntityKind] = &[
    EntityKind::BudgetItems,
    EntityKind::BudgetSummary,
    EntityKind::BudgetCategories,
];
pub const TIMELINE_WRITE_KINDS: &[EntityKind] = &[EntityKind::TimelineEvents];

/// `users` columns the database maintains. Profile updates never set them.
pub const READ_ONLY_USER_COLUMNS: &[&str] = &["user_id", "supabase_auth_uid", "created_at", "updated_at"];

pub const BUDGET_UPDATE_COLUMNS: &[&str] = &["item_name", "category", "amount", "vendor_name", "status"];

pub const TIMELINE_UPDATE_COLUMNS: &[&str] = &["event_name", "event_date_time", "description", "location"];

pub const VENDOR_FILTER_KEYS: &[&str] = &["vendor_category", "city"];

pub const DEFAULT_BUDGET_STATUS: &str = "Pending";

/// The `users` columns a profile update may set. Absent fields are left as
/// they are.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileColumns {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wedding_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wedding_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wedding_tradition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,
}

impl ProfileColumns {
    pub const NAMES: &'static [&'static str] = &[
        "email",
        "display_name",
        "wedding_date",
        "wedding_location",
        "wedding_tradition",
        "user_type",
    ];

    /// `(column, value)` for every field that is set, in column order.
    pub fn assignments(&self) -> Vec<(&'static str, &str)> {
        [
            ("email", &self.email),
            ("display_name", &self.display_name),
            ("wedding_date", &self.wedding_date),
            ("wedding_location", &self.wedding_location),
            ("wedding_tradition", &self.wedding_tradition),
            ("user_type", &self.user_type),
        ]
        .into_iter()
        .filter_map(|(column, value)| value.as_deref().map(|v| (column, v)))
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments().is_empty()
    }
}

/// A `users` row: the fixed columns, plus the free-form `preferences` bag
/// that holds everything else.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub supabase_auth_uid: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(flatten)]
    pub columns: ProfileColumns,
    #[serde(default, deserialize_with = "preferences_bag")]
    pub preferences: Map<String, Value>,
}

impl UserProfile {
    pub fn from_record(record: Record) -> ToolResult<Self> {
        serde_json::from_value(Value::Object(record))
            .map_err(|e| ToolError::transport(format!("unreadable user record: {e}")))
    }
}

// The column is jsonb but older rows hold it as JSON text, or NULL.
fn preferences_bag<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(preferences_from_value(value).unwrap_or_default())
}

fn preferences_from_value(value: Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        Value::String(text) => match serde_json::from_str(&text) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

/// A profile update split into real columns and preference-bag entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    pub columns: ProfileColumns,
    pub preferences: Map<String, Value>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.preferences.is_empty()
    }
}

/// Fields outside the `users` columns are folded into the preference bag,
/// never rejected and never dropped. Read-only columns such as `user_id`
/// are ignored.
pub fn split_profile_update(data: Map<String, Value>) -> ToolResult<ProfileUpdate> {
    let mut columns = Map::new();
    let mut preferences = Map::new();
    let mut extras = Map::new();

    for (key, value) in data {
        match key.as_str() {
            k if READ_ONLY_USER_COLUMNS.contains(&k) => {}
            "preferences" => match value {
                Value::Null => {}
                other => {
                    let bag = preferences_from_value(other).ok_or_else(|| {
                        ToolError::validation("preferences must be an object")
                    })?;
                    preferences.extend(bag);
                }
            },
            k if ProfileColumns::NAMES.contains(&k) => {
                columns.insert(key, value);
            }
            _ => {
                extras.insert(key, value);
            }
        }
    }
    preferences.extend(extras);

    let update = ProfileUpdate {
        columns: serde_json::from_value(Value::Object(columns))
            .map_err(|e| ToolError::validation(format!("invalid profile field: {e}")))?,
        preferences,
    };
    if update.is_empty() {
        return Err(ToolError::validation("No valid data provided for update."));
    }
    Ok(update)
}

/// Shallow merge: keys in `update` replace the stored ones.
pub fn merge_preferences(current: &Map<String, Value>, update: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = current.clone();
    for (key, value) in update {
        merged.insert(key.clone(), value.clone());
    }
    merged
}
