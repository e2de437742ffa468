//! Recover records from worker output.
//!
//! The worker's reply is free text: sometimes a JSON document, sometimes a
//! JSON array wrapped in an explanatory sentence (often string-escaped),
//! sometimes a language-literal dump. Strategies run in order and the first
//! one that yields records wins. A failure is reported with the raw text and
//! is never turned into an empty result.

use std::borrow::Cow;

use serde_json::{Map, Number, Value};

use crate::error::{ToolError, ToolResult};

pub type Record = Map<String, Value>;

const MAX_FRAGMENT_CANDIDATES: usize = 16;
const MAX_LITERAL_DEPTH: usize = 128;

#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    One(Record),
    Many(Vec<Record>),
}

impl Normalized {
    pub fn into_records(self) -> Vec<Record> {
        match self {
            Self::One(record) => vec![record],
            Self::Many(records) => records,
        }
    }

    pub fn into_first(self) -> Option<Record> {
        self.into_records().into_iter().next()
    }

    pub fn into_value(self) -> Value {
        match self {
            Self::One(record) => Value::Object(record),
            Self::Many(records) => Value::Array(records.into_iter().map(Value::Object).collect()),
        }
    }
}

pub fn normalize(raw: &str) -> ToolResult<Normalized> {
    run_strategies(raw, true).map_err(|detail| ToolError::Decode {
        detail,
        raw: raw.to_string(),
    })
}

fn run_strategies(raw: &str, allow_nested: bool) -> Result<Normalized, String> {
    let mut failures = Vec::with_capacity(3);

    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(Value::String(inner)) if allow_nested => match run_strategies(&inner, false) {
            Ok(found) => return Ok(found),
            Err(e) => failures.push(format!("json string: {e}")),
        },
        Ok(value) => match shape(value) {
            Ok(found) => return Ok(found),
            Err(e) => failures.push(format!("json: {e}")),
        },
        Err(e) => failures.push(format!("json: {e}")),
    }

    match decode_embedded(raw) {
        Ok(found) => return Ok(found),
        Err(e) => failures.push(format!("embedded: {e}")),
    }

    match decode_literal(raw).and_then(shape) {
        Ok(found) => return Ok(found),
        Err(e) => failures.push(format!("literal: {e}")),
    }

    Err(failures.join("; "))
}

/// Accept a decoded value only if it is a record or a list of records.
/// `{"rows": [...]}` wrappers are unwrapped.
fn shape(value: Value) -> Result<Normalized, String> {
    match value {
        Value::Object(mut obj) => match obj.remove("rows") {
            Some(rows @ Value::Array(_)) => shape(rows),
            Some(other) => {
                obj.insert("rows".to_string(), other);
                Ok(Normalized::One(obj))
            }
            None => Ok(Normalized::One(obj)),
        },
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(obj) => Ok(obj),
                other => Err(format!("array holds a non-record {}", type_name(&other))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Normalized::Many),
        other => Err(format!("expected records, found {}", type_name(&other))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn decode_embedded(raw: &str) -> Result<Normalized, String> {
    let mut passes: Vec<Cow<'_, str>> = vec![Cow::Borrowed(raw)];
    if raw.contains("\\\"") {
        passes.push(Cow::Owned(unescape_once(raw)));
    }

    let mut last_err = "no bracketed fragment".to_string();
    for text in &passes {
        let starts = text
            .char_indices()
            .filter(|(_, c)| *c == '[' || *c == '{')
            .map(|(idx, _)| idx)
            .take(MAX_FRAGMENT_CANDIDATES);
        for start in starts {
            let Some(end) = balanced_end(text, start) else {
                continue;
            };
            let fragment = &text[start..=end];
            let fragment = if fragment.contains("\\\"") {
                Cow::Owned(unescape_once(fragment))
            } else {
                Cow::Borrowed(fragment)
            };
            match serde_json::from_str::<Value>(&fragment) {
                Ok(value) => match shape(value) {
                    Ok(found) => return Ok(found),
                    Err(e) => last_err = e,
                },
                Err(e) => last_err = e.to_string(),
            }
        }
    }
    Err(last_err)
}

/// Byte index of the bracket closing the one at `start`, ignoring brackets
/// inside double-quoted strings.
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' => stack.push(']'),
            '{' => stack.push('}'),
            ']' | '}' => {
                if stack.pop() != Some(c) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Undo one level of JSON string escaping.
fn unescape_once(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            _ => {
                out.push('\\');
                continue;
            }
        }
        chars.next();
    }
    out
}

/// Permissive literal decode: a JSON superset with single-quoted strings,
/// trailing commas, `( )` tuples, and the `True`/`False`/`None`/`NULL`
/// keywords.
///
/// Single-quoted strings are read as SQL literals first, where `''` is the
/// only escape and a backslash is an ordinary character. Text that does not
/// parse that way is retried with backslash escapes (`\'`, `\n`, ...) as a
/// language repr would write them.
pub fn decode_literal(text: &str) -> Result<Value, String> {
    LiteralParser::parse(text, false).or_else(|sql_err| {
        LiteralParser::parse(text, true).map_err(|_| sql_err)
    })
}

struct LiteralParser {
    chars: Vec<char>,
    pos: usize,
    /// Backslash escapes inside single-quoted strings.
    single_quote_escapes: bool,
}

impl LiteralParser {
    fn parse(text: &str, single_quote_escapes: bool) -> Result<Value, String> {
        let mut parser = LiteralParser {
            chars: text.chars().collect(),
            pos: 0,
            single_quote_escapes,
        };
        let value = parser.value(0)?;
        parser.skip_ws();
        if parser.pos < parser.chars.len() {
            return Err(format!("trailing characters at offset {}", parser.pos));
        }
        Ok(value)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn value(&mut self, depth: usize) -> Result<Value, String> {
        if depth > MAX_LITERAL_DEPTH {
            return Err("nesting too deep".to_string());
        }
        self.skip_ws();
        match self.peek() {
            None => Err("unexpected end of input".to_string()),
            Some('{') => self.object(depth),
            Some('[') => self.sequence(']', depth),
            Some('(') => self.sequence(')', depth),
            Some(q @ ('\'' | '"')) => self.string(q).map(Value::String),
            Some(c) if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => self.number(),
            Some(c) if c.is_alphabetic() => self.keyword(),
            Some(c) => Err(format!("unexpected '{c}' at offset {}", self.pos)),
        }
    }

    fn object(&mut self, depth: usize) -> Result<Value, String> {
        self.pos += 1;
        let mut map = Map::new();
        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.pos += 1;
                return Ok(Value::Object(map));
            }
            let key = match self.value(depth + 1)? {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                other => return Err(format!("unsupported key {other}")),
            };
            self.skip_ws();
            if self.peek() != Some(':') {
                return Err(format!("expected ':' at offset {}", self.pos));
            }
            self.pos += 1;
            let value = self.value(depth + 1)?;
            map.insert(key, value);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some('}') => {}
                _ => return Err(format!("expected ',' or '}}' at offset {}", self.pos)),
            }
        }
    }

    fn sequence(&mut self, close: char, depth: usize) -> Result<Value, String> {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok(Value::Array(items));
            }
            items.push(self.value(depth + 1)?);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(c) if c == close => {}
                _ => return Err(format!("expected ',' or '{close}' at offset {}", self.pos)),
            }
        }
    }

    fn string(&mut self, quote: char) -> Result<String, String> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(format!("unterminated string starting at offset {start}"));
            };
            self.pos += 1;
            if c == quote {
                // SQL-style doubled quote inside a single-quoted string.
                if quote == '\'' && self.peek() == Some('\'') {
                    self.pos += 1;
                    out.push('\'');
                    continue;
                }
                return Ok(out);
            }
            if c != '\\' || (quote == '\'' && !self.single_quote_escapes) {
                out.push(c);
                continue;
            }
            let Some(esc) = self.peek() else {
                return Err(format!("unterminated string starting at offset {start}"));
            };
            self.pos += 1;
            match esc {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                'b' => out.push('\u{0008}'),
                'f' => out.push('\u{000c}'),
                '0' => out.push('\0'),
                'u' => {
                    let hex: String = self.chars.iter().skip(self.pos).take(4).collect();
                    let code = u32::from_str_radix(&hex, 16)
                        .map_err(|_| format!("bad unicode escape at offset {}", self.pos))?;
                    out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
                    self.pos += 4;
                }
                '\'' | '"' | '\\' | '/' => out.push(esc),
                other => {
                    out.push('\\');
                    out.push(other);
                }
            }
        }
    }

    fn number(&mut self) -> Result<Value, String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E' | '_'))
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().filter(|c| **c != '_').collect();
        let text = text.strip_prefix('+').unwrap_or(&text);
        if let Ok(i) = text.parse::<i64>() {
            return Ok(Value::Number(i.into()));
        }
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("invalid number '{text}' at offset {start}"))
    }

    fn keyword(&mut self) -> Result<Value, String> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        match word.as_str() {
            "True" | "true" | "TRUE" => Ok(Value::Bool(true)),
            "False" | "false" | "FALSE" => Ok(Value::Bool(false)),
            "None" | "null" | "NULL" => Ok(Value::Null),
            _ => Err(format!("unknown identifier '{word}' at offset {start}")),
        }
    }
}
