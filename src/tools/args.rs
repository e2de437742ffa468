use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub(crate) struct GetUserIdArgs {
    pub(crate) email: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserIdArgs {
    pub(crate) user_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateUserDataArgs {
    pub(crate) user_id: String,
    pub(crate) data: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListVendorsArgs {
    #[serde(default)]
    pub(crate) filters: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VendorIdArgs {
    pub(crate) vendor_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct BudgetRange {
    #[serde(default)]
    pub(crate) min: Option<f64>,
    #[serde(default)]
    pub(crate) max: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchVendorsArgs {
    #[serde(default)]
    pub(crate) category: Option<String>,
    #[serde(default)]
    pub(crate) location: Option<String>,
    #[serde(default)]
    pub(crate) budget_range: Option<BudgetRange>,
    #[serde(default)]
    pub(crate) ratings: Option<f64>,
    #[serde(default)]
    pub(crate) keywords: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CheckAvailabilityArgs {
    pub(crate) vendor_id: String,
    #[serde(alias = "date_to_check", alias = "date_to_check_str")]
    pub(crate) date: String,
    #[serde(default)]
    pub(crate) availability_data: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AddBudgetItemArgs {
    pub(crate) user_id: String,
    pub(crate) item: Map<String, Value>,
    #[serde(default)]
    pub(crate) vendor_name: Option<String>,
    #[serde(default)]
    pub(crate) status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateBudgetItemArgs {
    pub(crate) item_id: String,
    pub(crate) data: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ItemIdArgs {
    pub(crate) item_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SuggestAllocationsArgs {
    pub(crate) total_budget: f64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateTimelineEventArgs {
    pub(crate) user_id: String,
    pub(crate) event: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateTimelineEventArgs {
    pub(crate) event_id: String,
    pub(crate) updates: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventIdArgs {
    pub(crate) event_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchRitualsArgs {
    #[serde(alias = "question")]
    pub(crate) query: String,
    #[serde(default)]
    pub(crate) culture: Option<String>,
    #[serde(default)]
    pub(crate) region: Option<String>,
    #[serde(default)]
    pub(crate) limit: Option<usize>,
}
