//! Find and decode the `<function_calls>` block embedded in backend text.
//!
//! The block is JSON wrapped in a sentinel tag, not XML: the first opening
//! tag and the first closing tag after it delimit the payload. The payload is
//! either an array of call objects or a single call object.

use serde_json::{Map, Value};

use super::diagnostics::{Diagnostic, Diagnostics};

pub const OPEN_TAG: &str = "<function_calls>";
pub const CLOSE_TAG: &str = "</function_calls>";

/// Arguments as found in a raw entry, before any repair.
#[derive(Debug, Clone, PartialEq)]
pub enum RawArguments {
    Absent,
    Map(Map<String, Value>),
    Text(String),
    Other(Value),
}

impl From<Option<&Value>> for RawArguments {
    fn from(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => RawArguments::Absent,
            Some(Value::Object(map)) => RawArguments::Map(map.clone()),
            Some(Value::String(s)) => RawArguments::Text(s.clone()),
            Some(other) => RawArguments::Other(other.clone()),
        }
    }
}

/// A loosely-typed call entry. Either `name` or `function_name` may be set;
/// canonical-shaped entries (`{"function": {"name": ..}}`) fill `function_name`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCallEntry {
    pub id: Option<String>,
    pub name: Option<String>,
    pub function_name: Option<String>,
    pub arguments: RawArguments,
}

impl RawCallEntry {
    /// Read an entry from a JSON value. Returns `None` for non-objects.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let function = obj.get("function").and_then(Value::as_object);

        let arguments = function
            .and_then(|f| f.get("arguments"))
            .or_else(|| {
                ["arguments", "parameters", "input", "args"]
                    .iter()
                    .find_map(|key| obj.get(*key))
            });

        Some(Self {
            id: obj.get("id").and_then(Value::as_str).map(str::to_string),
            name: obj.get("name").and_then(Value::as_str).map(str::to_string),
            function_name: function
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string),
            arguments: RawArguments::from(arguments),
        })
    }
}

/// Locate the payload between the first opening tag and the next closing tag.
pub fn find_tagged_block(text: &str) -> Option<&str> {
    let start = text.find(OPEN_TAG)? + OPEN_TAG.len();
    let len = text[start..].find(CLOSE_TAG)?;
    Some(text[start..start + len].trim())
}

/// Decode the tagged block in `text` into raw call entries.
///
/// Text without a complete tagged block yields no entries and no diagnostic.
/// A block that is not JSON gets exactly one trailing-comma repair pass; if
/// that still fails the result is empty and a [`Diagnostic::ParseFailed`] is
/// recorded.
pub fn parse(text: &str, diagnostics: &mut Diagnostics) -> Vec<RawCallEntry> {
    let Some(block) = find_tagged_block(text) else {
        return Vec::new();
    };

    let value = match serde_json::from_str::<Value>(block) {
        Ok(v) => v,
        Err(strict_err) => match serde_json::from_str::<Value>(&strip_trailing_commas(block)) {
            Ok(v) => {
                diagnostics.record(Diagnostic::ParseRepaired);
                v
            }
            Err(_) => {
                diagnostics.record(Diagnostic::ParseFailed {
                    reason: strict_err.to_string(),
                });
                return Vec::new();
            }
        },
    };

    let candidates = match value {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        other => {
            diagnostics.record(Diagnostic::ParseFailed {
                reason: format!("expected an object or array, got {}", json_kind(&other)),
            });
            return Vec::new();
        }
    };

    candidates
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            let entry = RawCallEntry::from_value(item);
            if entry.is_none() {
                diagnostics.record(Diagnostic::EntryNotObject { index });
            }
            entry
        })
        .collect()
}

/// Drop commas that are directly followed (modulo whitespace) by `]` or `}`.
/// Commas inside string literals are left alone.
fn strip_trailing_commas(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in input.char_indices() {
        if in_string {
            out.push(c);
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
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' if closes_next(&input[i + 1..]) => {}
            _ => out.push(c),
        }
    }

    out
}

fn closes_next(rest: &str) -> bool {
    matches!(rest.trim_start().chars().next(), Some(']' | '}'))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
