//! OpenAI chat-completion chunk frames.
//!
//! Order: role announcement, content deltas, one atomic tool-call delta (if
//! any), the finish frame carrying finish reason and usage, then `[DONE]`.

use std::iter;

use super::{chunk_text, json_data, EmitOptions, StreamFrame};
use crate::normalize::NormalizedResponse;
use crate::translate::openai_types::{
    ChatCompletionChunk, ChatToolCall, ChatUsage, ChunkChoice, ChunkDelta, ChunkToolCall,
    FinishReason,
};

pub const DONE_SENTINEL: &str = "[DONE]";

pub fn frames(
    response: &NormalizedResponse,
    options: EmitOptions,
) -> impl Iterator<Item = StreamFrame> + Send + '_ {
    let choice = response.choices.first();
    let content = choice.map_or("", |c| c.message.content.as_str());
    let tool_calls = choice
        .and_then(|c| c.message.tool_calls.as_deref())
        .filter(|calls| !calls.is_empty());
    let finish_reason = choice.map_or(FinishReason::Stop, |c| c.finish_reason);

    let role = iter::once_with(move || {
        chunk_frame(
            response,
            ChunkDelta {
                role: Some("assistant".to_string()),
                content: Some(String::new()),
                tool_calls: None,
            },
            None,
            None,
        )
    });

    let deltas = chunk_text(content, options.chunk_chars).map(move |piece| {
        chunk_frame(
            response,
            ChunkDelta {
                content: Some(piece.to_string()),
                ..ChunkDelta::default()
            },
            None,
            None,
        )
    });

    let tools = tool_calls.into_iter().map(move |calls| {
        chunk_frame(
            response,
            ChunkDelta {
                tool_calls: Some(tool_call_deltas(calls)),
                ..ChunkDelta::default()
            },
            None,
            None,
        )
    });

    let finish = iter::once_with(move || {
        chunk_frame(
            response,
            ChunkDelta::default(),
            Some(finish_reason),
            Some(response.usage),
        )
    });

    let done = iter::once_with(|| StreamFrame::data(DONE_SENTINEL));

    role.chain(deltas).chain(tools).chain(finish).chain(done)
}

fn tool_call_deltas(calls: &[ChatToolCall]) -> Vec<ChunkToolCall> {
    calls
        .iter()
        .zip(0u32..)
        .map(|(call, index)| ChunkToolCall {
            index,
            id: call.id.clone(),
            call_type: call.call_type.clone(),
            function: call.function.clone(),
        })
        .collect()
}

fn chunk_frame(
    response: &NormalizedResponse,
    delta: ChunkDelta,
    finish_reason: Option<FinishReason>,
    usage: Option<ChatUsage>,
) -> StreamFrame {
    let chunk = ChatCompletionChunk {
        id: response.id.clone(),
        object: "chat.completion.chunk".to_string(),
        created: response.created,
        model: response.model.clone(),
        choices: vec![ChunkChoice {
            index: 0,
            delta,
            finish_reason,
        }],
        usage,
    };
    StreamFrame::data(json_data(&chunk))
}
