//! Response normalization and tool-call reconciliation.
//!
//! Turns an arbitrarily-shaped backend response into one canonical
//! chat-completion response:
//!
//! ```text
//! raw response ─► extract ─► parse ─► repair ─► normalized response
//!                   │                    ▲
//!                   └─ native tool calls ┘
//! ```
//!
//! Every stage is a pure function of its input. Nothing here returns an
//! error: problems are repaired or dropped and recorded as [`Diagnostic`]s.

pub mod diagnostics;
pub mod extract;
pub mod native;
pub mod parse;
pub mod repair;

pub use diagnostics::{Diagnostic, Diagnostics};
pub use extract::{extract, ExtractionResult};
pub use parse::{parse, RawArguments, RawCallEntry};
pub use repair::{repair, NamePolicy, NoNameFallback, SingleDeclaredTool};

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::translate::anthropic_types::Tool;
use crate::translate::openai_types::{
    ChatCompletionResponse, ChatTool, ChatToolCall, Choice, ChoiceMessage, FinishReason,
};

pub type NormalizedResponse = ChatCompletionResponse;
pub type NormalizedMessage = ChoiceMessage;
pub type ToolCall = ChatToolCall;

/// A tool the client declared on its request. Only used as a repair hint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeclaredTool {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Value,
}

impl From<&ChatTool> for DeclaredTool {
    fn from(tool: &ChatTool) -> Self {
        Self {
            name: tool.function.name.clone(),
            description: tool.function.description.clone(),
            parameters: tool.function.parameters.clone(),
        }
    }
}

impl From<&Tool> for DeclaredTool {
    fn from(tool: &Tool) -> Self {
        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.input_schema.clone(),
        }
    }
}

/// What happened while normalizing one response.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizationReport {
    pub extraction_path: &'static str,
    pub native_tool_calls: bool,
    pub tool_calls: usize,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone)]
pub struct Normalized {
    pub response: NormalizedResponse,
    pub report: NormalizationReport,
}

/// Normalizes backend responses with a configurable [`NamePolicy`].
#[derive(Clone)]
pub struct Normalizer {
    name_policy: Arc<dyn NamePolicy>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::with_name_policy(SingleDeclaredTool)
    }
}

impl std::fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Normalizer").finish_non_exhaustive()
    }
}

impl Normalizer {
    pub fn with_name_policy(policy: impl NamePolicy + 'static) -> Self {
        Self {
            name_policy: Arc::new(policy),
        }
    }

    /// Normalize `raw` into a single-choice chat-completion response.
    ///
    /// `requested_model` is echoed back as the response model. Only `id` and
    /// `created` differ between two calls with the same arguments.
    pub fn normalize(
        &self,
        raw: &Value,
        requested_model: &str,
        declared_tools: &[DeclaredTool],
    ) -> Normalized {
        let mut diagnostics = Diagnostics::default();

        let extraction = extract(raw);
        if !extraction.success {
            diagnostics.record(Diagnostic::ExtractionFailed {
                reason: extraction.error_message.clone().unwrap_or_default(),
            });
        }

        let native_calls = native::tool_calls(raw, &mut diagnostics);
        let used_native = native_calls.is_some();
        let entries = match native_calls {
            Some(entries) => entries,
            None => parse(&extraction.text, &mut diagnostics),
        };
        let tool_calls = repair(
            &entries,
            declared_tools,
            self.name_policy.as_ref(),
            &mut diagnostics,
        );

        let discarded = native::extra_choices(raw);
        if discarded > 0 {
            diagnostics.record(Diagnostic::ChoicesDiscarded { count: discarded });
        }

        let backend_finish = if extraction.from_error_field {
            FinishReason::Error
        } else {
            native::finish_reason(raw).unwrap_or(FinishReason::Stop)
        };

        let tool_call_count = tool_calls.len();
        let (message, finish_reason) = if tool_calls.is_empty() {
            let finish = match backend_finish {
                FinishReason::ToolCalls => FinishReason::Stop,
                other => other,
            };
            (
                ChoiceMessage {
                    role: "assistant".to_string(),
                    content: extraction.text,
                    tool_calls: None,
                },
                finish,
            )
        } else {
            (
                ChoiceMessage {
                    role: "assistant".to_string(),
                    content: String::new(),
                    tool_calls: Some(tool_calls),
                },
                FinishReason::ToolCalls,
            )
        };

        let response = ChatCompletionResponse {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            object: "chat.completion".to_string(),
            created: unix_now(),
            model: requested_model.to_string(),
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason,
            }],
            usage: native::usage(raw),
        };

        Normalized {
            response,
            report: NormalizationReport {
                extraction_path: extraction.path,
                native_tool_calls: used_native,
                tool_calls: tool_call_count,
                diagnostics: diagnostics.into_vec(),
            },
        }
    }
}

/// Normalize with the default name policy, discarding the report.
pub fn normalize(
    raw: &Value,
    requested_model: &str,
    declared_tools: &[DeclaredTool],
) -> NormalizedResponse {
    Normalizer::default()
        .normalize(raw, requested_model, declared_tools)
        .response
}

fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}
