//! Coerce raw call entries into canonical, compliant tool calls.

use serde_json::{json, Value};
use std::collections::HashSet;
use uuid::Uuid;

use super::diagnostics::{Diagnostic, Diagnostics};
use super::parse::{RawArguments, RawCallEntry};
use super::DeclaredTool;
use crate::translate::openai_types::{ChatToolCall, ChatToolCallFunction};

/// Prefix of every id this module generates.
pub const CALL_ID_PREFIX: &str = "call_";

/// Decides the name of an entry that carries none.
///
/// Whatever a policy returns is client-visible, so the repairer logs every
/// adoption as a [`Diagnostic::NameAdopted`].
pub trait NamePolicy: Send + Sync {
    fn fallback_name(&self, declared: &[DeclaredTool]) -> Option<String>;
}

/// Adopt the declared tool's name when exactly one tool is declared.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleDeclaredTool;

impl NamePolicy for SingleDeclaredTool {
    fn fallback_name(&self, declared: &[DeclaredTool]) -> Option<String> {
        match declared {
            [only] if !only.name.trim().is_empty() => Some(only.name.clone()),
            _ => None,
        }
    }
}

/// Never invent a name; nameless entries are always dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNameFallback;

impl NamePolicy for NoNameFallback {
    fn fallback_name(&self, _declared: &[DeclaredTool]) -> Option<String> {
        None
    }
}

/// Repair every entry, dropping the ones that cannot be made compliant.
pub fn repair(
    entries: &[RawCallEntry],
    declared: &[DeclaredTool],
    policy: &dyn NamePolicy,
    diagnostics: &mut Diagnostics,
) -> Vec<ChatToolCall> {
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut calls = Vec::with_capacity(entries.len());

    for (index, entry) in entries.iter().enumerate() {
        let Some(name) = resolve_name(index, entry, declared, policy, diagnostics) else {
            continue;
        };

        let (arguments, lossy) = normalize_arguments(&entry.arguments);
        if lossy {
            diagnostics.record(Diagnostic::ArgumentsWrapped {
                index,
                name: name.clone(),
            });
        }

        let id = match entry.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() && !seen_ids.contains(id) => id.to_string(),
            supplied => {
                if let Some(previous) = supplied {
                    diagnostics.record(Diagnostic::IdRegenerated {
                        index,
                        previous: previous.to_string(),
                    });
                }
                generate_call_id(index, &name, &arguments, &seen_ids)
            }
        };

        let call = ChatToolCall {
            id,
            call_type: "function".to_string(),
            function: ChatToolCallFunction { name, arguments },
        };

        if let Err(reason) = check_compliance(&call) {
            diagnostics.record(Diagnostic::NonCompliant { index, reason });
            continue;
        }

        seen_ids.insert(call.id.clone());
        calls.push(call);
    }

    calls
}

fn resolve_name(
    index: usize,
    entry: &RawCallEntry,
    declared: &[DeclaredTool],
    policy: &dyn NamePolicy,
    diagnostics: &mut Diagnostics,
) -> Option<String> {
    let explicit = entry
        .function_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .or_else(|| entry.name.as_deref().map(str::trim).filter(|n| !n.is_empty()));

    if let Some(name) = explicit {
        return Some(name.to_string());
    }

    match policy.fallback_name(declared) {
        Some(name) => {
            diagnostics.record(Diagnostic::NameAdopted {
                index,
                name: name.clone(),
            });
            Some(name)
        }
        None => {
            diagnostics.record(Diagnostic::NameUnresolved { index });
            None
        }
    }
}

/// Returns the JSON text and whether the conversion was lossy.
fn normalize_arguments(arguments: &RawArguments) -> (String, bool) {
    match arguments {
        RawArguments::Absent => ("{}".to_string(), false),
        RawArguments::Map(map) => (Value::Object(map.clone()).to_string(), false),
        RawArguments::Text(text) if text.trim().is_empty() => ("{}".to_string(), false),
        RawArguments::Text(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(_)) => (text.clone(), false),
            // Valid JSON but not an object: wrap the decoded value, not the text
            Ok(other) => (json!({ "value": other }).to_string(), true),
            Err(_) => (json!({ "value": text }).to_string(), true),
        },
        RawArguments::Other(value) => (json!({ "value": value }).to_string(), true),
    }
}

/// Ids are derived from the call's position and content so normalizing the
/// same response twice yields the same ids.
fn generate_call_id(index: usize, name: &str, arguments: &str, taken: &HashSet<String>) -> String {
    (0u32..)
        .map(|attempt| {
            let key = format!("{index}:{attempt}:{name}:{arguments}");
            format!(
                "{CALL_ID_PREFIX}{}",
                Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).simple()
            )
        })
        .find(|id| !taken.contains(id))
        .unwrap_or_else(|| format!("{CALL_ID_PREFIX}{}", Uuid::new_v4().simple()))
}

/// Strict structural check applied to every call before it is emitted.
pub fn check_compliance(call: &ChatToolCall) -> Result<(), String> {
    if call.id.is_empty() {
        return Err("empty id".to_string());
    }
    if call.call_type != "function" {
        return Err(format!("type is '{}'", call.call_type));
    }
    if call.function.name.trim().is_empty() {
        return Err("empty function name".to_string());
    }
    match serde_json::from_str::<Value>(&call.function.arguments) {
        Ok(Value::Object(_)) => Ok(()),
        Ok(_) => Err("arguments are not a JSON object".to_string()),
        Err(e) => Err(format!("arguments are not JSON: {e}")),
    }
}
