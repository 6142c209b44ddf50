//! Pull the assistant text out of a backend response of unknown shape.
//!
//! Extraction is an ordered list of [`Strategy`]s, each a pure function of the
//! response. The first one yielding a non-empty string wins. Supporting a new
//! backend shape means appending a strategy.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionResult {
    pub text: String,
    pub success: bool,
    /// Name of the strategy that produced `text`, or `"none"`.
    pub path: &'static str,
    /// Why extraction failed, when it did.
    pub error_message: Option<String>,
    /// The text came from an error field rather than generated output.
    pub from_error_field: bool,
}

impl ExtractionResult {
    fn failed(reason: &str) -> Self {
        Self {
            text: String::new(),
            success: false,
            path: "none",
            error_message: Some(reason.to_string()),
            from_error_field: false,
        }
    }
}

struct Strategy {
    path: &'static str,
    error_field: bool,
    extract: fn(&Value) -> Option<String>,
}

const STRATEGIES: &[Strategy] = &[
    Strategy {
        path: "generations[0][0].text",
        error_field: false,
        extract: |v| string_at(v, "/generations/0/0/text"),
    },
    Strategy {
        path: "generations[0].text",
        error_field: false,
        extract: |v| string_at(v, "/generations/0/text"),
    },
    Strategy {
        path: "generation.text",
        error_field: false,
        extract: |v| string_at(v, "/generation/text"),
    },
    Strategy {
        path: "generatedText",
        error_field: false,
        extract: |v| string_at(v, "/generatedText"),
    },
    Strategy {
        path: "generated_text",
        error_field: false,
        extract: |v| string_at(v, "/generated_text"),
    },
    Strategy {
        path: "text",
        error_field: false,
        extract: |v| string_at(v, "/text"),
    },
    Strategy {
        path: "choices[0].message.content",
        error_field: false,
        extract: |v| string_at(v, "/choices/0/message/content"),
    },
    Strategy {
        path: "content[].text",
        error_field: false,
        extract: anthropic_content_text,
    },
    Strategy {
        path: "candidates[0].content.parts[].text",
        error_field: false,
        extract: gemini_parts_text,
    },
    Strategy {
        path: "error.message",
        error_field: true,
        extract: |v| string_at(v, "/error/message"),
    },
    Strategy {
        path: "message",
        error_field: true,
        extract: |v| string_at(v, "/message"),
    },
];

/// Run the extraction strategies in order against `response`.
pub fn extract(response: &Value) -> ExtractionResult {
    if !response.is_object() {
        return ExtractionResult::failed("response is not a JSON object");
    }

    STRATEGIES
        .iter()
        .find_map(|strategy| {
            (strategy.extract)(response).map(|text| ExtractionResult {
                text,
                success: true,
                path: strategy.path,
                error_message: None,
                from_error_field: strategy.error_field,
            })
        })
        .unwrap_or_else(|| ExtractionResult::failed("no candidate path yielded text"))
}

fn string_at(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn join_non_empty(parts: Vec<&str>) -> Option<String> {
    let joined = parts.concat();
    (!joined.is_empty()).then_some(joined)
}

/// Anthropic / Bedrock: `content` is a string or a list of typed blocks.
fn anthropic_content_text(value: &Value) -> Option<String> {
    match value.get("content")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(blocks) => join_non_empty(
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str).map_or(true, |t| t == "text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect(),
        ),
        _ => None,
    }
}

/// Vertex / Gemini: text parts of the first candidate, skipping thought parts.
fn gemini_parts_text(value: &Value) -> Option<String> {
    let parts = value.pointer("/candidates/0/content/parts")?.as_array()?;
    join_non_empty(
        parts
            .iter()
            .filter(|p| !p.get("thought").and_then(Value::as_bool).unwrap_or(false))
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect(),
    )
}
