//! Shape inbound requests for the backend.
//!
//! Anthropic Messages requests are translated into chat-completion requests.
//! For backends without native tool support, declared tools are moved out of
//! the request and described in a system prompt that asks the model to answer
//! with a `<function_calls>` block, and prior tool traffic in the history is
//! rewritten into plain text in the same convention.

use super::anthropic_types::{
    ContentBlock, Message, MessagesRequest, Role, ToolChoice, ToolChoiceAuto, ToolChoiceSpecific,
    ToolResultContent,
};
use super::openai_types::{
    ChatCompletionRequest, ChatContent, ChatFunction, ChatMessage, ChatTool, ChatToolCall,
    ChatToolCallFunction, ChatToolChoice, ChatToolChoiceFunction, ChatToolChoiceSpecific,
    ContentPart, ImageUrlDetail,
};
use crate::normalize::parse::{CLOSE_TAG, OPEN_TAG};

/// Translate an Anthropic Messages request into a chat-completion request
/// addressed to `target_model`.
pub fn anthropic_to_chat(req: &MessagesRequest, target_model: &str) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(ref system) = req.system {
        messages.push(ChatMessage::text("system", system.as_text()));
    }

    for msg in &req.messages {
        messages.extend(translate_message(msg));
    }

    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|t| ChatTool {
                tool_type: "function".to_string(),
                function: ChatFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                },
            })
            .collect()
    });

    ChatCompletionRequest {
        model: target_model.to_string(),
        messages,
        max_tokens: Some(req.max_tokens),
        temperature: req.temperature,
        top_p: req.top_p,
        // The relay always makes one complete backend call
        stream: None,
        tools,
        tool_choice: req.tool_choice.as_ref().map(translate_tool_choice),
        stop: req
            .stop_sequences
            .as_ref()
            .map(|s| serde_json::Value::from(s.clone())),
        user: req.metadata.as_ref().and_then(|m| m.user_id.clone()),
        extra: Default::default(),
    }
}

/// Prepare an OpenAI-dialect request for the backend: retarget the model and
/// clear the streaming flag.
pub fn chat_to_backend(req: &ChatCompletionRequest, target_model: &str) -> ChatCompletionRequest {
    let mut out = req.clone();
    out.model = target_model.to_string();
    out.stream = None;
    out.extra.remove("stream_options");
    out
}

/// Rewrite `req` for a backend that cannot take `tools` natively.
///
/// No-op when the request declares no tools.
pub fn inject_tool_prompt(req: &mut ChatCompletionRequest) {
    let Some(tools) = req.tools.take().filter(|t| !t.is_empty()) else {
        return;
    };
    let choice = req.tool_choice.take();

    let prompt = tool_instructions(&tools, choice.as_ref());
    let history = std::mem::take(&mut req.messages);

    let mut messages = Vec::with_capacity(history.len() + 1);
    let mut system_done = false;

    for msg in history {
        match msg.role.as_str() {
            "system" if !system_done => {
                let existing = msg.content.as_ref().map(ChatContent::as_text).unwrap_or_default();
                messages.push(ChatMessage::text("system", format!("{existing}\n\n{prompt}")));
                system_done = true;
            }
            "assistant" if msg.tool_calls.is_some() => messages.push(flatten_tool_calls(msg)),
            "tool" => messages.push(flatten_tool_result(msg)),
            _ => messages.push(msg),
        }
    }

    if !system_done {
        messages.insert(0, ChatMessage::text("system", prompt));
    }

    req.messages = messages;
}

fn tool_instructions(tools: &[ChatTool], choice: Option<&ChatToolChoice>) -> String {
    let mut out = String::from("You can call the following tools.\n\n");

    for tool in tools {
        let f = &tool.function;
        out.push_str(&format!("## {}\n", f.name));
        if let Some(ref desc) = f.description {
            out.push_str(desc.trim());
            out.push('\n');
        }
        if !f.parameters.is_null() {
            out.push_str(&format!("Parameters (JSON Schema): {}\n", f.parameters));
        }
        out.push('\n');
    }

    out.push_str(&format!(
        "To call tools, reply with only a JSON array of calls wrapped in {OPEN_TAG} and {CLOSE_TAG}, \
         each call an object with \"name\" and \"arguments\":\n\
         {OPEN_TAG}[{{\"name\": \"tool_name\", \"arguments\": {{\"param\": \"value\"}}}}]{CLOSE_TAG}\n\
         Do not add any other text when calling tools."
    ));

    match choice {
        Some(ChatToolChoice::String(s)) if s == "required" => {
            out.push_str("\nYou must call at least one tool.");
        }
        Some(ChatToolChoice::String(s)) if s == "none" => {
            out.push_str("\nDo not call any tool for this reply.");
        }
        Some(ChatToolChoice::Specific(named)) => {
            out.push_str(&format!("\nYou must call the tool \"{}\".", named.function.name));
        }
        _ => {}
    }

    out
}

/// Assistant turn with native tool calls → text in the embedded convention.
fn flatten_tool_calls(msg: ChatMessage) -> ChatMessage {
    let calls: Vec<serde_json::Value> = msg
        .tool_calls
        .iter()
        .flatten()
        .map(|tc| {
            let args = serde_json::from_str::<serde_json::Value>(&tc.function.arguments)
                .unwrap_or_else(|_| serde_json::Value::String(tc.function.arguments.clone()));
            serde_json::json!({ "name": tc.function.name, "arguments": args })
        })
        .collect();

    let mut text = msg.content.as_ref().map(ChatContent::as_text).unwrap_or_default();
    if !text.is_empty() {
        text.push('\n');
    }
    text.push_str(OPEN_TAG);
    text.push_str(&serde_json::Value::from(calls).to_string());
    text.push_str(CLOSE_TAG);

    ChatMessage::text("assistant", text)
}

fn flatten_tool_result(msg: ChatMessage) -> ChatMessage {
    let body = msg.content.as_ref().map(ChatContent::as_text).unwrap_or_default();
    let id = msg.tool_call_id.as_deref().unwrap_or("unknown");
    ChatMessage::text("user", format!("Result of tool call {id}:\n{body}"))
}

/// A single Anthropic message can expand to multiple chat messages
/// (a user message with `tool_result` blocks becomes separate tool-role messages).
fn translate_message(msg: &Message) -> Vec<ChatMessage> {
    let blocks = msg.content.blocks();

    match msg.role {
        Role::User => translate_user_message(&blocks),
        Role::Assistant => translate_assistant_message(&blocks),
    }
}

fn translate_user_message(blocks: &[ContentBlock]) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    let mut content_parts: Vec<ContentPart> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                content_parts.push(ContentPart::Text { text: text.clone() });
            }
            ContentBlock::Image { source } => {
                content_parts.push(ContentPart::ImageUrl {
                    image_url: ImageUrlDetail {
                        url: format!("data:{};base64,{}", source.media_type, source.data),
                        detail: None,
                    },
                });
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                // Keep ordering: text before the result goes first
                if !content_parts.is_empty() {
                    messages.push(user_message(&content_parts));
                    content_parts.clear();
                }

                messages.push(ChatMessage {
                    role: "tool".to_string(),
                    content: Some(ChatContent::Text(tool_result_to_string(
                        content.as_ref(),
                        *is_error,
                    ))),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id.clone()),
                    name: None,
                });
            }
            ContentBlock::Thinking { .. } | ContentBlock::ToolUse { .. } => {}
        }
    }

    if !content_parts.is_empty() || messages.is_empty() {
        messages.push(user_message(&content_parts));
    }

    messages
}

fn user_message(parts: &[ContentPart]) -> ChatMessage {
    ChatMessage {
        role: "user".to_string(),
        content: Some(collapse_content_parts(parts)),
        tool_calls: None,
        tool_call_id: None,
        name: None,
    }
}

fn translate_assistant_message(blocks: &[ContentBlock]) -> Vec<ChatMessage> {
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<ChatToolCall> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => text_parts.push(text),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ChatToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: ChatToolCallFunction {
                        name: name.clone(),
                        arguments: input.to_string(),
                    },
                });
            }
            ContentBlock::Thinking { .. }
            | ContentBlock::Image { .. }
            | ContentBlock::ToolResult { .. } => {}
        }
    }

    vec![ChatMessage {
        role: "assistant".to_string(),
        content: (!text_parts.is_empty()).then(|| ChatContent::Text(text_parts.concat())),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
        name: None,
    }]
}

fn collapse_content_parts(parts: &[ContentPart]) -> ChatContent {
    match parts {
        [] => ChatContent::Text(String::new()),
        [ContentPart::Text { text }] => ChatContent::Text(text.clone()),
        _ => ChatContent::Parts(parts.to_vec()),
    }
}

fn tool_result_to_string(content: Option<&ToolResultContent>, is_error: Option<bool>) -> String {
    let prefix = if is_error == Some(true) { "ERROR: " } else { "" };

    match content {
        Some(ToolResultContent::Text(t)) => format!("{prefix}{t}"),
        Some(ToolResultContent::Blocks(blocks)) => {
            let text = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            format!("{prefix}{text}")
        }
        None => format!("{prefix}(no content)"),
    }
}

fn translate_tool_choice(tc: &ToolChoice) -> ChatToolChoice {
    match tc {
        ToolChoice::Auto(ToolChoiceAuto { choice_type }) => match choice_type.as_str() {
            "any" => ChatToolChoice::String("required".to_string()),
            "none" => ChatToolChoice::String("none".to_string()),
            _ => ChatToolChoice::String("auto".to_string()),
        },
        ToolChoice::Specific(ToolChoiceSpecific { name, .. }) => {
            ChatToolChoice::Specific(ChatToolChoiceSpecific {
                choice_type: "function".to_string(),
                function: ChatToolChoiceFunction { name: name.clone() },
            })
        }
    }
}
