use super::anthropic_types::{MessagesResponse, ResponseContentBlock, Usage};
use super::openai_types::{ChatCompletionResponse, FinishReason};

/// Re-express a normalized response for an Anthropic-dialect caller.
/// `model` already echoes what the caller requested.
pub fn to_messages_response(resp: &ChatCompletionResponse) -> MessagesResponse {
    let choice = resp.choices.first();

    let mut content: Vec<ResponseContentBlock> = Vec::new();

    if let Some(c) = choice {
        if !c.message.content.is_empty() {
            content.push(ResponseContentBlock::Text {
                text: c.message.content.clone(),
            });
        }

        for tc in c.message.tool_calls.iter().flatten() {
            // Arguments passed the compliance check, so they always decode
            let input: serde_json::Value = serde_json::from_str(&tc.function.arguments)
                .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));

            content.push(ResponseContentBlock::ToolUse {
                id: tc.id.clone(),
                name: tc.function.name.clone(),
                input,
            });
        }
    }

    // Anthropic clients expect at least one content block
    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    let stop_reason = choice.map_or(FinishReason::Stop, |c| c.finish_reason);

    MessagesResponse {
        id: anthropic_message_id(&resp.id),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: resp.model.clone(),
        stop_reason: Some(anthropic_stop_reason(stop_reason).to_string()),
        stop_sequence: None,
        usage: Usage {
            input_tokens: resp.usage.prompt_tokens,
            output_tokens: resp.usage.completion_tokens,
        },
    }
}

/// `chatcmpl-<hex>` becomes `msg_<hex>`.
pub fn anthropic_message_id(id: &str) -> String {
    format!("msg_{}", id.trim_start_matches("chatcmpl-"))
}

/// Map a canonical finish reason to an Anthropic `stop_reason`.
pub fn anthropic_stop_reason(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop | FinishReason::ContentFilter | FinishReason::Error => "end_turn",
        FinishReason::Length => "max_tokens",
        FinishReason::ToolCalls => "tool_use",
    }
}
