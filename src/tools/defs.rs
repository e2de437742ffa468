use serde_json::{Value, json};

/// Every tool the facade dispatches, in listing order.
pub const TOOL_NAMES: &[&str] = &[
    "get_user_id",
    "get_user_data",
    "get_user_activities",
    "update_user_data",
    "list_vendors",
    "get_vendor_details",
    "search_vendors",
    "get_vendor_availability",
    "check_vendor_availability",
    "add_budget_item",
    "get_budget_items",
    "update_budget_item",
    "delete_budget_item",
    "get_budget_summary",
    "get_budget_category_analysis",
    "suggest_budget_allocations",
    "get_timeline_events",
    "create_timeline_event",
    "update_timeline_event",
    "delete_timeline_event",
    "search_rituals",
];

fn user_id_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "user_id": { "type": "string" }
        },
        "required": ["user_id"]
    })
}

/// MCP `tools/list` entries for every tool.
pub fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "get_user_id",
            "description": "Look up a user's id by email address.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "email": { "type": "string" }
                },
                "required": ["email"]
            }
        }),
        json!({
            "name": "get_user_data",
            "description": "Fetch a user's profile and preferences.",
            "inputSchema": user_id_schema()
        }),
        json!({
            "name": "get_user_activities",
            "description": "A user's chat messages across all sessions, newest first.",
            "inputSchema": user_id_schema()
        }),
        json!({
            "name": "update_user_data",
            "description": "Update profile columns; any other keys are merged into preferences.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "user_id": { "type": "string" },
                    "data": { "type": "object" }
                },
                "required": ["user_id", "data"]
            }
        }),
        json!({
            "name": "list_vendors",
            "description": "List vendors, optionally filtered by city or vendor_category.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "filters": {
                        "type": "object",
                        "properties": {
                            "city": { "type": "string" },
                            "vendor_category": { "type": "string" }
                        },
                        "additionalProperties": false
                    }
                }
            }
        }),
        json!({
            "name": "get_vendor_details",
            "description": "Fetch one vendor by id.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "vendor_id": { "type": "string" }
                },
                "required": ["vendor_id"]
            }
        }),
        json!({
            "name": "search_vendors",
            "description": "Search vendors by category, location, price range, rating and keywords.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "category": { "type": "string" },
                    "location": { "type": "string" },
                    "budget_range": {
                        "type": "object",
                        "properties": {
                            "min": { "type": "number" },
                            "max": { "type": "number" }
                        }
                    },
                    "ratings": { "type": "number" },
                    "keywords": { "type": "array", "items": { "type": "string" } }
                }
            }
        }),
        json!({
            "name": "get_vendor_availability",
            "description": "Upcoming availability rows for a vendor, from today on.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "vendor_id": { "type": "string", "format": "uuid" }
                },
                "required": ["vendor_id"]
            }
        }),
        json!({
            "name": "check_vendor_availability",
            "description": "Decide whether a vendor is free on a date (YYYY-MM-DD) from availability rows already fetched.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "vendor_id": { "type": "string", "format": "uuid" },
                    "date": { "type": "string" },
                    "availability_data": { "type": "array", "items": { "type": "object" } }
                },
                "required": ["vendor_id", "date"]
            }
        }),
        json!({
            "name": "add_budget_item",
            "description": "Add a budget item. The item needs item_name, category and amount.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "user_id": { "type": "string" },
                    "item": {
                        "type": "object",
                        "properties": {
                            "item_name": { "type": "string" },
                            "category": { "type": "string" },
                            "amount": { "type": "number" }
                        },
                        "required": ["item_name", "category", "amount"]
                    },
                    "vendor_name": { "type": "string" },
                    "status": { "type": "string" }
                },
                "required": ["user_id", "item"]
            }
        }),
        json!({
            "name": "get_budget_items",
            "description": "All budget items for a user.",
            "inputSchema": user_id_schema()
        }),
        json!({
            "name": "update_budget_item",
            "description": "Update a budget item's item_name, category, amount, vendor_name or status.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "item_id": { "type": "string" },
                    "data": { "type": "object" }
                },
                "required": ["item_id", "data"]
            }
        }),
        json!({
            "name": "delete_budget_item",
            "description": "Delete a budget item.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "item_id": { "type": "string" }
                },
                "required": ["item_id"]
            }
        }),
        json!({
            "name": "get_budget_summary",
            "description": "Total spend and item count for a user, overall and per status.",
            "inputSchema": user_id_schema()
        }),
        json!({
            "name": "get_budget_category_analysis",
            "description": "Spend per category with each category's share of the total.",
            "inputSchema": user_id_schema()
        }),
        json!({
            "name": "suggest_budget_allocations",
            "description": "Split a total budget across the usual wedding categories.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "total_budget": { "type": "number" }
                },
                "required": ["total_budget"]
            }
        }),
        json!({
            "name": "get_timeline_events",
            "description": "A user's timeline events, earliest first.",
            "inputSchema": user_id_schema()
        }),
        json!({
            "name": "create_timeline_event",
            "description": "Create a timeline event. The event needs event_name and event_date_time.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "user_id": { "type": "string" },
                    "event": {
                        "type": "object",
                        "properties": {
                            "event_name": { "type": "string" },
                            "event_date_time": { "type": "string" },
                            "description": { "type": "string" },
                            "location": { "type": "string" }
                        },
                        "required": ["event_name", "event_date_time"]
                    }
                },
                "required": ["user_id", "event"]
            }
        }),
        json!({
            "name": "update_timeline_event",
            "description": "Update a timeline event's name, time, description or location.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "event_id": { "type": "string" },
                    "updates": { "type": "object" }
                },
                "required": ["event_id", "updates"]
            }
        }),
        json!({
            "name": "delete_timeline_event",
            "description": "Delete a timeline event.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "event_id": { "type": "string" }
                },
                "required": ["event_id"]
            }
        }),
        json!({
            "name": "search_rituals",
            "description": "Semantic search over wedding ritual notes, optionally narrowed by culture or region.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "culture": { "type": "string" },
                    "region": { "type": "string" },
                    "limit": { "type": "integer", "minimum": 1, "maximum": 20 }
                },
                "required": ["query"]
            }
        }),
    ]
}
