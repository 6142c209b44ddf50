//! Backend-native fields: structured tool calls, usage counters, stop reasons.

use serde_json::Value;

use super::diagnostics::{Diagnostic, Diagnostics};
use super::parse::{RawArguments, RawCallEntry};
use crate::translate::openai_types::{ChatUsage, FinishReason};

/// Structured tool calls supplied by the backend itself, if any.
///
/// Covers OpenAI `tool_calls` (and the legacy `function_call`), Anthropic
/// `tool_use` content blocks and Gemini `functionCall` parts.
pub fn tool_calls(raw: &Value, diagnostics: &mut Diagnostics) -> Option<Vec<RawCallEntry>> {
    let entries = openai_tool_calls(raw, diagnostics)
        .or_else(|| anthropic_tool_uses(raw))
        .or_else(|| gemini_function_calls(raw))?;
    (!entries.is_empty()).then_some(entries)
}

fn openai_tool_calls(raw: &Value, diagnostics: &mut Diagnostics) -> Option<Vec<RawCallEntry>> {
    let message = raw.pointer("/choices/0/message")?;

    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        let entries = calls
            .iter()
            .enumerate()
            .filter_map(|(index, call)| {
                let entry = RawCallEntry::from_value(call);
                if entry.is_none() {
                    diagnostics.record(Diagnostic::EntryNotObject { index });
                }
                entry
            })
            .collect();
        return Some(entries);
    }

    message
        .get("function_call")
        .and_then(RawCallEntry::from_value)
        .map(|entry| vec![entry])
}

fn anthropic_tool_uses(raw: &Value) -> Option<Vec<RawCallEntry>> {
    let blocks = raw.get("content")?.as_array()?;
    let entries: Vec<_> = blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("tool_use"))
        .map(|b| RawCallEntry {
            id: b.get("id").and_then(Value::as_str).map(str::to_string),
            name: b.get("name").and_then(Value::as_str).map(str::to_string),
            function_name: None,
            arguments: RawArguments::from(b.get("input")),
        })
        .collect();
    (!entries.is_empty()).then_some(entries)
}

fn gemini_function_calls(raw: &Value) -> Option<Vec<RawCallEntry>> {
    let parts = raw.pointer("/candidates/0/content/parts")?.as_array()?;
    let entries: Vec<_> = parts
        .iter()
        .filter_map(|p| p.get("functionCall"))
        .map(|call| RawCallEntry {
            id: call.get("id").and_then(Value::as_str).map(str::to_string),
            name: call.get("name").and_then(Value::as_str).map(str::to_string),
            function_name: None,
            arguments: RawArguments::from(call.get("args")),
        })
        .collect();
    (!entries.is_empty()).then_some(entries)
}

const PROMPT_COUNTERS: &[&str] = &[
    "/usage/prompt_tokens",
    "/usage/input_tokens",
    "/usage/inputTokens",
    "/usageMetadata/promptTokenCount",
    "/llm_output/token_usage/prompt_tokens",
];

const COMPLETION_COUNTERS: &[&str] = &[
    "/usage/completion_tokens",
    "/usage/output_tokens",
    "/usage/outputTokens",
    "/usageMetadata/candidatesTokenCount",
    "/llm_output/token_usage/completion_tokens",
];

const TOTAL_COUNTERS: &[&str] = &[
    "/usage/total_tokens",
    "/usage/totalTokens",
    "/usageMetadata/totalTokenCount",
    "/llm_output/token_usage/total_tokens",
];

/// Map whatever usage counters the backend reports onto the canonical triple.
/// Missing counters are zero; a missing total is the sum of the other two.
pub fn usage(raw: &Value) -> ChatUsage {
    let prompt_tokens = first_counter(raw, PROMPT_COUNTERS).unwrap_or(0);
    let completion_tokens = first_counter(raw, COMPLETION_COUNTERS).unwrap_or(0);
    let total_tokens = first_counter(raw, TOTAL_COUNTERS)
        .unwrap_or_else(|| prompt_tokens.saturating_add(completion_tokens));

    ChatUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
    }
}

fn first_counter(raw: &Value, pointers: &[&str]) -> Option<u64> {
    pointers
        .iter()
        .find_map(|p| raw.pointer(p).and_then(Value::as_u64))
}

const FINISH_FIELDS: &[&str] = &[
    "/choices/0/finish_reason",
    "/stop_reason",
    "/stopReason",
    "/candidates/0/finishReason",
    "/generations/0/0/generation_info/finish_reason",
    "/generations/0/generation_info/finish_reason",
    "/generation_info/finish_reason",
    "/finish_reason",
];

/// The backend's own stop indicator, mapped into [`FinishReason`].
pub fn finish_reason(raw: &Value) -> Option<FinishReason> {
    FINISH_FIELDS
        .iter()
        .find_map(|p| raw.pointer(p).and_then(Value::as_str))
        .map(map_backend_finish_reason)
}

/// Map a backend-specific stop indicator. Unknown values count as `stop`.
pub fn map_backend_finish_reason(reason: &str) -> FinishReason {
    match reason.to_ascii_lowercase().as_str() {
        "length" | "max_tokens" => FinishReason::Length,
        "tool_calls" | "function_call" | "tool_use" => FinishReason::ToolCalls,
        "content_filter" | "safety" | "recitation" | "blocklist" | "prohibited_content"
        | "spii" | "refusal" | "guardrail_intervened" | "content_filtered" => {
            FinishReason::ContentFilter
        }
        "error" | "malformed_function_call" => FinishReason::Error,
        _ => FinishReason::Stop,
    }
}

/// Number of alternative choices beyond the first one.
pub fn extra_choices(raw: &Value) -> usize {
    ["/choices", "/candidates", "/generations/0"]
        .iter()
        .filter_map(|p| raw.pointer(p).and_then(Value::as_array))
        .map(|choices| choices.len().saturating_sub(1))
        .next()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_openai_native_calls() {
        let raw = json!({"choices": [{"message": {"content": null, "tool_calls": [
            {"id": "call_1", "type": "function", "function": {"name": "f", "arguments": "{}"}}
        ]}}]});
        let mut diagnostics = Diagnostics::default();
        let entries = tool_calls(&raw, &mut diagnostics).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].function_name.as_deref(), Some("f"));
        assert_eq!(entries[0].id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_anthropic_and_gemini_native_calls() {
        let mut diagnostics = Diagnostics::default();
        let anthropic = json!({"content": [
            {"type": "text", "text": "checking"},
            {"type": "tool_use", "id": "toolu_1", "name": "lookup", "input": {"q": "x"}}
        ]});
        let entries = tool_calls(&anthropic, &mut diagnostics).unwrap();
        assert_eq!(entries[0].name.as_deref(), Some("lookup"));
        assert!(matches!(entries[0].arguments, RawArguments::Map(_)));

        let gemini = json!({"candidates": [{"content": {"parts": [
            {"functionCall": {"name": "search", "args": {"term": "rust"}}}
        ]}}]});
        let entries = tool_calls(&gemini, &mut diagnostics).unwrap();
        assert_eq!(entries[0].name.as_deref(), Some("search"));
    }

    #[test]
    fn test_no_native_calls() {
        let mut diagnostics = Diagnostics::default();
        assert!(tool_calls(&json!({"choices": [{"message": {"content": "hi", "tool_calls": []}}]}), &mut diagnostics).is_none());
        assert!(tool_calls(&json!({"text": "hi"}), &mut diagnostics).is_none());
    }

    #[test]
    fn test_usage_shapes() {
        let openai = usage(&json!({"usage": {"prompt_tokens": 3, "completion_tokens": 4, "total_tokens": 7}}));
        assert_eq!((openai.prompt_tokens, openai.completion_tokens, openai.total_tokens), (3, 4, 7));

        let anthropic = usage(&json!({"usage": {"input_tokens": 10, "output_tokens": 5}}));
        assert_eq!(anthropic.total_tokens, 15);

        let gemini = usage(&json!({"usageMetadata": {"promptTokenCount": 2, "candidatesTokenCount": 1, "totalTokenCount": 9}}));
        assert_eq!(gemini.total_tokens, 9);

        assert_eq!(usage(&json!({})), ChatUsage::default());
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(finish_reason(&json!({"stop_reason": "max_tokens"})), Some(FinishReason::Length));
        assert_eq!(finish_reason(&json!({"candidates": [{"finishReason": "SAFETY"}]})), Some(FinishReason::ContentFilter));
        assert_eq!(finish_reason(&json!({"choices": [{"finish_reason": "stop"}]})), Some(FinishReason::Stop));
        assert_eq!(map_backend_finish_reason("end_turn"), FinishReason::Stop);
        assert_eq!(map_backend_finish_reason("something_new"), FinishReason::Stop);
        assert_eq!(finish_reason(&json!({})), None);
    }

    #[test]
    fn test_extra_choices() {
        assert_eq!(extra_choices(&json!({"choices": [{}, {}, {}]})), 2);
        assert_eq!(extra_choices(&json!({"candidates": [{}]})), 0);
        assert_eq!(extra_choices(&json!({"text": "x"})), 0);
    }
}
