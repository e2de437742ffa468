//! Client-side parameter binding.
//!
//! The worker accepts exactly one query string per call, so values are
//! inlined as SQL literals. Doubling embedded single quotes is the only
//! injection defense; callers pass raw values, never pre-quoted fragments,
//! and identifiers always come from fixed per-table whitelists.

use serde_json::{Map, Value};

use crate::error::{ToolError, ToolResult};

/// Render a value as SQL literal text. Total: every JSON value has a form.
pub fn quote(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote_text(s),
        Value::Array(_) | Value::Object(_) => quote_text(&value.to_string()),
    }
}

fn quote_text(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Named parameters for a query template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Map<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<Value>) {
        self.0.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Replace every `:name` placeholder in `template` with the quoted value.
///
/// `::type` casts and text inside quoted literals or quoted identifiers are
/// left alone. A placeholder without a parameter is a validation error.
pub fn render(template: &str, params: &Params) -> ToolResult<String> {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::with_capacity(template.len() + params.len() * 8);
    let mut quote_char: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote_char {
            out.push(c);
            if c == q {
                quote_char = None;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' => {
                quote_char = Some(c);
                out.push(c);
                i += 1;
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                out.push_str("::");
                i += 2;
            }
            ':' if chars.get(i + 1).is_some_and(|n| n.is_ascii_alphabetic() || *n == '_') => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                let value = params.get(&name).ok_or_else(|| {
                    ToolError::validation(format!("missing value for placeholder :{name}"))
                })?;
                out.push_str(&quote(value));
                i = end;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    Ok(out)
}
