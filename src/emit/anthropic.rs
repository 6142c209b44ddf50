//! Anthropic Messages SSE frames.
//!
//! Order: `message_start`, one block per piece of content (`content_block_start`,
//! deltas, `content_block_stop`), `message_delta`, `message_stop`. A text block
//! is emitted unless the message carries only tool calls; each tool call
//! becomes a `tool_use` block whose input arrives in a single
//! `input_json_delta`.

use std::iter;

use super::{chunk_text, json_data, EmitOptions, StreamFrame};
use crate::normalize::NormalizedResponse;
use crate::translate::anthropic_types::{
    Delta, DeltaUsage, MessageDeltaBody, MessagesResponse, ResponseContentBlock, StreamEvent, Usage,
};
use crate::translate::openai_types::{ChatToolCall, FinishReason};
use crate::translate::response::{anthropic_message_id, anthropic_stop_reason};

pub fn frames(
    response: &NormalizedResponse,
    options: EmitOptions,
) -> impl Iterator<Item = StreamFrame> + Send + '_ {
    let choice = response.choices.first();
    let content = choice.map_or("", |c| c.message.content.as_str());
    let tool_calls: &[ChatToolCall] = choice
        .and_then(|c| c.message.tool_calls.as_deref())
        .unwrap_or_default();
    let finish_reason = choice.map_or(FinishReason::Stop, |c| c.finish_reason);

    let has_text_block = !content.is_empty() || tool_calls.is_empty();
    let text_blocks = usize::from(has_text_block);

    let start = iter::once_with(move || {
        event_frame(&StreamEvent::MessageStart {
            message: MessagesResponse {
                id: anthropic_message_id(&response.id),
                response_type: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: response.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: Usage {
                    input_tokens: response.usage.prompt_tokens,
                    output_tokens: 0,
                },
            },
        })
    });

    let text = has_text_block
        .then(|| text_block(content, options))
        .into_iter()
        .flatten();

    let tools = tool_calls
        .iter()
        .enumerate()
        .flat_map(move |(i, call)| tool_use_block(text_blocks + i, call));

    let end = iter::once_with(move || {
        event_frame(&StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(anthropic_stop_reason(finish_reason).to_string()),
                stop_sequence: None,
            },
            usage: DeltaUsage {
                output_tokens: response.usage.completion_tokens,
            },
        })
    })
    .chain(iter::once_with(|| event_frame(&StreamEvent::MessageStop)));

    start.chain(text).chain(tools).chain(end)
}

fn text_block(content: &str, options: EmitOptions) -> impl Iterator<Item = StreamFrame> + Send + '_ {
    iter::once_with(|| {
        event_frame(&StreamEvent::ContentBlockStart {
            index: 0,
            content_block: ResponseContentBlock::Text {
                text: String::new(),
            },
        })
    })
    .chain(chunk_text(content, options.chunk_chars).map(|piece| {
        event_frame(&StreamEvent::ContentBlockDelta {
            index: 0,
            delta: Delta::TextDelta {
                text: piece.to_string(),
            },
        })
    }))
    .chain(iter::once_with(|| {
        event_frame(&StreamEvent::ContentBlockStop { index: 0 })
    }))
}

fn tool_use_block(index: usize, call: &ChatToolCall) -> [StreamFrame; 3] {
    [
        event_frame(&StreamEvent::ContentBlockStart {
            index,
            content_block: ResponseContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.function.name.clone(),
                input: serde_json::Value::Object(serde_json::Map::new()),
            },
        }),
        event_frame(&StreamEvent::ContentBlockDelta {
            index,
            delta: Delta::InputJsonDelta {
                partial_json: call.function.arguments.clone(),
            },
        }),
        event_frame(&StreamEvent::ContentBlockStop { index }),
    ]
}

fn event_frame(event: &StreamEvent) -> StreamFrame {
    StreamFrame::event(event.event_name(), json_data(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use serde_json::{json, Value};

    fn names(frames: &[StreamFrame]) -> Vec<&str> {
        frames.iter().filter_map(|f| f.event.as_deref()).collect()
    }

    #[test]
    fn test_text_message_order() {
        let raw = json!({"text": "Hello world", "usage": {"input_tokens": 7, "output_tokens": 2}});
        let response = normalize(&raw, "claude-test", &[]);
        let frames: Vec<StreamFrame> = frames(&response, EmitOptions { chunk_chars: 4 }).collect();

        assert_eq!(
            names(&frames),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        let start: Value = serde_json::from_str(&frames[0].data).unwrap();
        assert_eq!(start["message"]["usage"]["input_tokens"], 7);
        assert_eq!(start["message"]["model"], "claude-test");
        assert!(start["message"]["id"].as_str().unwrap().starts_with("msg_"));

        let delta: Value = serde_json::from_str(&frames[6].data).unwrap();
        assert_eq!(delta["delta"]["stop_reason"], "end_turn");
        assert_eq!(delta["usage"]["output_tokens"], 2);

        for frame in &frames {
            let wire = frame.to_wire();
            let lines: Vec<&str> = wire.split('\n').collect();
            assert_eq!(lines.len(), 4, "frame must be event line, data line, blank line");
            assert!(lines[0].starts_with("event: "));
            assert!(lines[1].starts_with("data: "));
            assert!(lines[2].is_empty() && lines[3].is_empty());
        }
    }

    #[test]
    fn test_tool_calls_become_tool_use_blocks() {
        let raw = json!({"text": "<function_calls>{\"name\":\"lookup\",\"arguments\":{\"q\":\"rust\"}}</function_calls>"});
        let response = normalize(&raw, "m", &[]);
        let frames: Vec<StreamFrame> = frames(&response, EmitOptions::default()).collect();

        assert_eq!(
            names(&frames),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        let block: Value = serde_json::from_str(&frames[1].data).unwrap();
        assert_eq!(block["index"], 0);
        assert_eq!(block["content_block"]["type"], "tool_use");
        assert_eq!(block["content_block"]["name"], "lookup");

        let delta: Value = serde_json::from_str(&frames[2].data).unwrap();
        assert_eq!(delta["delta"]["type"], "input_json_delta");
        assert_eq!(delta["delta"]["partial_json"], "{\"q\":\"rust\"}");

        let end: Value = serde_json::from_str(&frames[4].data).unwrap();
        assert_eq!(end["delta"]["stop_reason"], "tool_use");
    }

    #[test]
    fn test_empty_message_still_has_one_text_block() {
        let response = normalize(&json!({}), "m", &[]);
        let frames: Vec<StreamFrame> = frames(&response, EmitOptions::default()).collect();
        assert_eq!(
            names(&frames),
            vec![
                "message_start",
                "content_block_start",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
    }
}
