use async_trait::async_trait;
use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tool_relay::backend::Backend;
use tool_relay::capabilities::{BackendKind, Capability, CapabilityCache, CapabilitySource, StaticSource};
use tool_relay::config::{GatewayConfig, ModelConfig};
use tool_relay::emit::{deliver, emit, with_heartbeat, EmitOptions, Protocol, HEARTBEAT};
use tool_relay::normalize::{normalize, DeclaredTool, NormalizedResponse, Normalizer};
use tool_relay::translate::anthropic_types::ResponseContentBlock;
use tool_relay::translate::openai_types::{ChatCompletionRequest, FinishReason};
use tool_relay::translate::response::to_messages_response;
use tool_relay::{build_router, AppState, Result, SharedJournal};

fn research_agent() -> Vec<DeclaredTool> {
    vec![DeclaredTool {
        name: "Research_Agent".to_string(),
        description: Some("Delegate research".to_string()),
        parameters: json!({"type": "object", "properties": {"System_Message": {"type": "string"}}}),
    }]
}

fn text_response(text: &str) -> Value {
    json!({ "generated_text": text })
}

fn decoded_arguments(response: &NormalizedResponse) -> Vec<(String, Value)> {
    response.choices[0]
        .message
        .tool_calls
        .iter()
        .flatten()
        .map(|tc| {
            (
                tc.function.name.clone(),
                serde_json::from_str(&tc.function.arguments).unwrap(),
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Normalization scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_scenario_array_form() {
    let raw = text_response(
        r#"<function_calls>[{"name":"Research_Agent","arguments":{"System_Message":"x"}}]</function_calls>"#,
    );
    let response = normalize(&raw, "relay-model", &research_agent());
    let choice = &response.choices[0];

    assert_eq!(
        decoded_arguments(&response),
        vec![("Research_Agent".to_string(), json!({"System_Message": "x"}))]
    );
    assert_eq!(choice.message.content, "");
    assert_eq!(choice.finish_reason, FinishReason::ToolCalls);
    assert_eq!(response.model, "relay-model");
}

#[test]
fn test_scenario_single_object_matches_array() {
    let array = normalize(
        &text_response(r#"<function_calls>[{"name":"Research_Agent","arguments":{"System_Message":"x"}}]</function_calls>"#),
        "m",
        &research_agent(),
    );
    let object = normalize(
        &text_response(r#"<function_calls>{"name":"Research_Agent","arguments":{"System_Message":"x"}}</function_calls>"#),
        "m",
        &research_agent(),
    );

    assert_eq!(array.choices[0].message, object.choices[0].message);
    assert_eq!(array.choices[0].finish_reason, object.choices[0].finish_reason);
}

#[test]
fn test_scenario_plain_text() {
    let response = normalize(&text_response("Hello there"), "m", &research_agent());
    let choice = &response.choices[0];

    assert!(choice.message.tool_calls.is_none());
    assert_eq!(choice.message.content, "Hello there");
    assert_eq!(choice.finish_reason, FinishReason::Stop);
}

#[test]
fn test_scenario_trailing_comma_repaired() {
    let clean = normalize(
        &text_response(r#"<function_calls>[{"name":"Research_Agent","arguments":{"System_Message":"x"}}]</function_calls>"#),
        "m",
        &research_agent(),
    );
    let trailing = normalize(
        &text_response(r#"<function_calls>[{"name":"Research_Agent","arguments":{"System_Message":"x"}},]</function_calls>"#),
        "m",
        &research_agent(),
    );
    assert_eq!(clean.choices[0].message, trailing.choices[0].message);

    let text = r#"<function_calls>[{"name":"a" "arguments":{}},]</function_calls>"#;
    let broken = normalize(&text_response(text), "m", &research_agent());
    assert!(broken.choices[0].message.tool_calls.is_none());
    assert_eq!(broken.choices[0].message.content, text);
    assert_eq!(broken.choices[0].finish_reason, FinishReason::Stop);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[test]
fn test_arguments_round_trip() {
    let mappings = [
        json!({}),
        json!({"q": "rust", "limit": 10}),
        json!({"nested": {"list": [1, 2, {"deep": null}]}, "unicode": "héllo ✓"}),
    ];

    for args in mappings {
        let text = format!(
            "<function_calls>{}</function_calls>",
            json!({"name": "search", "arguments": args})
        );
        let response = normalize(&text_response(&text), "m", &[]);
        assert_eq!(decoded_arguments(&response), vec![("search".to_string(), args)]);
    }
}

#[test]
fn test_non_object_arguments_reach_anthropic_callers_as_objects() {
    for arguments in ["null", "[1,2]", "42"] {
        let raw = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{"id": "call_1", "type": "function", "function": {"name": "f", "arguments": arguments}}]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let response = normalize(&raw, "m", &[]);

        let message = to_messages_response(&response);
        match &message.content[..] {
            [ResponseContentBlock::ToolUse { input, .. }] => {
                assert!(input.is_object(), "{arguments} -> {input}");
                assert_eq!(input["value"], serde_json::from_str::<Value>(arguments).unwrap());
            }
            other => panic!("{arguments}: unexpected blocks {other:?}"),
        }

        for frame in emit(&response, Protocol::Anthropic, EmitOptions::default()) {
            let event: Value = serde_json::from_str(&frame.data).unwrap();
            if let Some(partial) = event["delta"]["partial_json"].as_str() {
                assert!(serde_json::from_str::<Value>(partial).unwrap().is_object());
            }
        }
    }
}

#[test]
fn test_normalization_is_idempotent() {
    let raw = json!({
        "choices": [{"message": {"content": "<function_calls>[{\"name\":\"a\",\"arguments\":{}},{\"name\":\"b\",\"arguments\":\"{\\\"k\\\":1}\"}]</function_calls>"}}]
    });
    let normalizer = Normalizer::default();

    let first = normalizer.normalize(&raw, "m", &[]).response;
    let second = normalizer.normalize(&raw, "m", &[]).response;

    assert_eq!(first.choices[0].message, second.choices[0].message);
    assert_eq!(first.choices[0].message.tool_calls.as_ref().unwrap().len(), 2);
}

#[test]
fn test_content_and_tool_calls_never_co_occur() {
    let inputs = [
        text_response("Sure, calling now. <function_calls>{\"name\":\"a\",\"arguments\":{}}</function_calls>"),
        text_response("just text"),
        text_response("<function_calls>not json</function_calls>"),
        json!({"content": [{"type": "text", "text": "hi"}, {"type": "tool_use", "id": "toolu_1", "name": "x", "input": {}}]}),
        json!({"error": {"message": "rate limited"}}),
        json!(42),
    ];

    for raw in &inputs {
        let response = normalize(raw, "m", &[]);
        let message = &response.choices[0].message;
        let has_calls = message.tool_calls.as_ref().is_some_and(|c| !c.is_empty());
        assert!(
            !(has_calls && !message.content.is_empty()),
            "content and tool calls together for {raw}"
        );
        // Always serializes to valid JSON
        assert!(serde_json::to_value(&response).is_ok());
    }
}

#[test]
fn test_malformed_blocks_never_panic() {
    let garbage = [
        "<function_calls>",
        "<function_calls></function_calls>",
        "<function_calls>[[[</function_calls>",
        "<function_calls>{\"name\": }</function_calls>",
        "<function_calls>\"just a string\"</function_calls>",
        "<function_calls>[1, 2, 3]</function_calls>",
        "</function_calls><function_calls>",
    ];

    for text in garbage {
        let response = normalize(&text_response(text), "m", &[]);
        assert!(response.choices[0].message.tool_calls.is_none(), "{text}");
        assert_eq!(response.choices[0].message.content, text);
    }
}

#[test]
fn test_openai_deltas_reproduce_content() {
    let content = "Rust ownership: each value has one owner, and when it goes, so does the value. 🦀";
    let response = normalize(&text_response(content), "m", &[]);

    for chunk_chars in [1, 3, 24, 1000] {
        let text: String = emit(&response, Protocol::OpenAi, EmitOptions { chunk_chars })
            .filter(|f| f.data != "[DONE]")
            .filter_map(|f| {
                let v: Value = serde_json::from_str(&f.data).unwrap();
                v["choices"][0]["delta"]["content"].as_str().map(str::to_string)
            })
            .collect();
        assert_eq!(text, content, "chunk_chars={chunk_chars}");
    }
}

// ---------------------------------------------------------------------------
// Wire framing
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_heartbeats_are_ignored_by_sse_parser() {
    let response = normalize(&text_response("Hello world"), "claude-test", &[]);
    let frames: Vec<Bytes> = emit(&response, Protocol::Anthropic, EmitOptions::default())
        .map(|f| f.to_bytes())
        .collect();
    let expected = frames.len();

    let pending = async move {
        tokio::time::sleep(Duration::from_secs(35)).await;
        frames
    };
    let wire: Vec<Bytes> = with_heartbeat(pending, Duration::from_secs(15)).collect().await;

    assert_eq!(wire[0], Bytes::from_static(HEARTBEAT.as_bytes()));
    assert_eq!(wire[1], Bytes::from_static(HEARTBEAT.as_bytes()));
    assert!(wire[2..].iter().all(|b| b.as_ref() != HEARTBEAT.as_bytes()));

    let events: Vec<_> = futures::stream::iter(wire.into_iter().map(Ok::<_, std::io::Error>))
        .eventsource()
        .map(|e| e.unwrap())
        .collect()
        .await;

    assert_eq!(events.len(), expected);
    assert_eq!(events[0].event, "message_start");
    assert_eq!(events.last().unwrap().event, "message_stop");
    for event in &events {
        let data: Value = serde_json::from_str(&event.data).unwrap();
        assert_eq!(data["type"], event.event.as_str());
    }
}

#[test]
fn test_delivery_blocking_into_channel() {
    let response = normalize(&text_response("abc"), "m", &[]);
    let frames: Vec<Bytes> = emit(&response, Protocol::OpenAi, EmitOptions::default())
        .map(|f| f.to_bytes())
        .collect();
    let count = frames.len();
    let (tx, rx) = futures::channel::mpsc::unbounded::<Bytes>();

    let delivered = tokio_test::assert_ok!(tokio_test::block_on(deliver(futures::stream::iter(frames), tx)));

    assert_eq!(delivered, count);
    let received: Vec<Bytes> = tokio_test::block_on(rx.collect());
    assert_eq!(received.last().unwrap().as_ref(), b"data: [DONE]\n\n");
}

// ---------------------------------------------------------------------------
// Server roundtrip with a mock backend
// ---------------------------------------------------------------------------

struct MockBackend {
    reply: Value,
    delay: Duration,
    seen: Mutex<Vec<(Capability, ChatCompletionRequest)>>,
}

impl MockBackend {
    fn new(reply: Value) -> Arc<Self> {
        Self::delayed(reply, Duration::ZERO)
    }

    fn delayed(reply: Value, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply,
            delay,
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn complete(&self, capability: &Capability, request: &ChatCompletionRequest) -> Result<Value> {
        self.seen
            .lock()
            .unwrap()
            .push((capability.clone(), request.clone()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.reply.clone())
    }
}

struct ListedModels(Vec<String>);

#[async_trait]
impl CapabilitySource for ListedModels {
    async fn list_models(&self) -> Result<Option<Vec<String>>> {
        Ok(Some(self.0.clone()))
    }
}

async fn spawn_server(
    backend: Arc<dyn Backend>,
    config: GatewayConfig,
    source: Arc<dyn CapabilitySource>,
) -> String {
    let state = Arc::new(AppState {
        capabilities: CapabilityCache::new(config.models.clone(), source, Duration::from_secs(60)),
        config,
        backend,
        normalizer: Normalizer::default(),
        journal: SharedJournal::in_memory(),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });
    format!("http://{addr}")
}

fn config_with_prompted_model() -> GatewayConfig {
    let mut models = HashMap::new();
    models.insert(
        "plain-model".to_string(),
        ModelConfig {
            backend: BackendKind::Vertex,
            target: Some("gemini-1.0-pro".to_string()),
            native_tools: false,
        },
    );
    GatewayConfig {
        models,
        ..GatewayConfig::default()
    }
}

#[tokio::test]
async fn test_chat_completions_roundtrip() {
    let backend = MockBackend::new(json!({
        "choices": [{"message": {"role": "assistant", "content": "Hi from the backend"}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 5, "completion_tokens": 4, "total_tokens": 9}
    }));
    let base = spawn_server(backend.clone(), GatewayConfig::default(), Arc::new(StaticSource)).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hello"}]}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], "gpt-4o");
    assert_eq!(body["choices"][0]["message"]["content"], "Hi from the backend");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["usage"]["total_tokens"], 9);

    let seen = backend.seen.lock().unwrap();
    assert_eq!(seen[0].0.backend, BackendKind::OpenAi);
    assert_eq!(seen[0].1.model, "gpt-4o");
}

#[tokio::test]
async fn test_messages_with_prompted_tools() {
    let backend = MockBackend::new(json!({
        "generated_text": "<function_calls>{\"arguments\":{\"city\":\"Paris\"}}</function_calls>"
    }));
    let base = spawn_server(backend.clone(), config_with_prompted_model(), Arc::new(StaticSource)).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/v1/messages"))
        .json(&json!({
            "model": "plain-model",
            "max_tokens": 100,
            "messages": [{"role": "user", "content": "Weather in Paris?"}],
            "tools": [{"name": "get_weather", "input_schema": {"type": "object"}}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "message");
    assert_eq!(body["model"], "plain-model");
    assert_eq!(body["stop_reason"], "tool_use");
    assert_eq!(body["content"][0]["type"], "tool_use");
    assert_eq!(body["content"][0]["name"], "get_weather");
    assert_eq!(body["content"][0]["input"]["city"], "Paris");
    assert!(body["content"][0]["id"].as_str().unwrap().starts_with("call_"));

    let seen = backend.seen.lock().unwrap();
    let (capability, request) = &seen[0];
    assert_eq!(capability.backend, BackendKind::Vertex);
    assert_eq!(request.model, "gemini-1.0-pro");
    assert!(request.tools.is_none());
    let system = request.messages[0].content.as_ref().unwrap().as_text();
    assert!(system.contains("<function_calls>"));
    assert!(system.contains("get_weather"));
}

#[tokio::test]
async fn test_streaming_chat_with_heartbeat() {
    let backend = MockBackend::delayed(json!({"text": "streamed answer"}), Duration::from_millis(1500));
    let mut config = GatewayConfig::default();
    config.streaming.heartbeat_secs = 1;
    config.streaming.openai_chunk_chars = 4;
    let base = spawn_server(backend, config, Arc::new(StaticSource)).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({"model": "gpt-4o", "stream": true, "messages": [{"role": "user", "content": "go"}]}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "text/event-stream");

    let raw = resp.bytes().await.unwrap();
    let text = std::str::from_utf8(&raw).unwrap();
    assert!(text.starts_with(HEARTBEAT));
    assert!(text.ends_with("data: [DONE]\n\n"));

    let events: Vec<_> = futures::stream::iter([Ok::<_, std::io::Error>(raw.clone())])
        .eventsource()
        .map(|e| e.unwrap())
        .collect()
        .await;
    let content: String = events
        .iter()
        .filter(|e| e.data != "[DONE]")
        .filter_map(|e| {
            let v: Value = serde_json::from_str(&e.data).unwrap();
            v["choices"][0]["delta"]["content"].as_str().map(str::to_string)
        })
        .collect();
    assert_eq!(content, "streamed answer");
}

#[tokio::test]
async fn test_streaming_messages_frames() {
    let backend = MockBackend::new(json!({"content": [{"type": "text", "text": "Bonjour"}], "stop_reason": "end_turn"}));
    let base = spawn_server(backend, GatewayConfig::default(), Arc::new(StaticSource)).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/v1/messages"))
        .json(&json!({
            "model": "claude-3-haiku",
            "max_tokens": 10,
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();

    let names: Vec<String> = resp
        .bytes_stream()
        .eventsource()
        .map(|e| e.unwrap().event)
        .collect()
        .await;

    assert_eq!(
        names,
        vec![
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );
}

#[tokio::test]
async fn test_errors_use_caller_dialect() {
    let backend = MockBackend::new(json!({"text": "unused"}));
    let source = Arc::new(ListedModels(vec!["gpt-4o".to_string()]));
    let base = spawn_server(backend, GatewayConfig::default(), source).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({"model": "no-such-model", "messages": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "not_found_error");

    let resp = client
        .post(format!("{base}/v1/messages"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_diagnostics_and_models_endpoints() {
    let backend = MockBackend::new(json!({"text": "<function_calls>[{\"arguments\":{}}]</function_calls>"}));
    let base = spawn_server(backend, config_with_prompted_model(), Arc::new(StaticSource)).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "x"}]}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    // Nameless entry with no declared tools is dropped
    assert!(body["choices"][0]["message"].get("tool_calls").is_none());

    let diag: Value = client
        .get(format!("{base}/v1/diagnostics?limit=1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let entries = diag["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["component"], "normalize");
    assert_eq!(entries[0]["level"], "warn");
    assert_eq!(entries[0]["context"]["diagnostics"][0]["kind"], "name_unresolved");

    let models: Value = client
        .get(format!("{base}/v1/models"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(models["data"][0]["id"], "plain-model");

    let health: Value = client
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
}
