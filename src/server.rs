use crate::backend::Backend;
use crate::capabilities::{Capability, CapabilityCache};
use crate::config::GatewayConfig;
use crate::emit::{deliver, emit, openai::DONE_SENTINEL, with_heartbeat, Protocol, StreamFrame};
use crate::error::{GatewayError, Result};
use crate::logging::SharedJournal;
use crate::normalize::{DeclaredTool, Normalized, NormalizedResponse, Normalizer};
use crate::translate::anthropic_types::{ErrorResponse, MessagesRequest};
use crate::translate::openai_types::{ChatCompletionRequest, ChatErrorResponse};
use crate::translate::request::{anthropic_to_chat, chat_to_backend, inject_tool_prompt};
use crate::translate::response::to_messages_response;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Frames buffered between the delivery task and the response body.
const STREAM_BUFFER: usize = 16;

pub struct AppState {
    pub config: GatewayConfig,
    pub backend: Arc<dyn Backend>,
    pub capabilities: CapabilityCache,
    pub normalizer: Normalizer,
    pub journal: SharedJournal,
}

/// Everything the backend call and the normalizer need, resolved up front.
struct Prepared {
    protocol: Protocol,
    requested_model: String,
    capability: Capability,
    request: ChatCompletionRequest,
    declared: Vec<DeclaredTool>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/v1/messages", post(handle_messages))
        .route("/v1/models", get(handle_models))
        .route("/v1/diagnostics", get(handle_diagnostics))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_chat_completions(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let protocol = Protocol::OpenAi;

    let req: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return reject(&state, protocol, GatewayError::bad_request(format!("Invalid request body: {e}"))),
    };
    let streaming = req.stream.unwrap_or(false);

    let capability = match state.capabilities.lookup(&req.model).await {
        Ok(c) => c,
        Err(e) => return reject(&state, protocol, e),
    };

    let declared = req.tools.iter().flatten().map(DeclaredTool::from).collect();
    let mut request = chat_to_backend(&req, &capability.backend_model);
    if !capability.native_tools {
        inject_tool_prompt(&mut request);
    }

    let prepared = Prepared {
        protocol,
        requested_model: req.model,
        capability,
        request,
        declared,
    };
    respond(state, prepared, streaming).await
}

async fn handle_messages(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let protocol = Protocol::Anthropic;

    let req: MessagesRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return reject(&state, protocol, GatewayError::bad_request(format!("Invalid request body: {e}"))),
    };
    let streaming = req.stream.unwrap_or(false);

    let capability = match state.capabilities.lookup(&req.model).await {
        Ok(c) => c,
        Err(e) => return reject(&state, protocol, e),
    };

    let declared = req.tools.iter().flatten().map(DeclaredTool::from).collect();
    let mut request = anthropic_to_chat(&req, &capability.backend_model);
    if !capability.native_tools {
        inject_tool_prompt(&mut request);
    }

    let prepared = Prepared {
        protocol,
        requested_model: req.model,
        capability,
        request,
        declared,
    };
    respond(state, prepared, streaming).await
}

async fn respond(state: Arc<AppState>, prepared: Prepared, streaming: bool) -> Response {
    state.journal.info(
        "server",
        format!(
            "Request: model={} backend={} native_tools={} streaming={} messages={}",
            prepared.requested_model,
            prepared.capability.backend.as_str(),
            prepared.capability.native_tools,
            streaming,
            prepared.request.messages.len()
        ),
    );

    if streaming {
        return stream_response(state, prepared);
    }

    match run_pipeline(&state, &prepared).await {
        Ok(response) => match prepared.protocol {
            Protocol::OpenAi => Json(response).into_response(),
            Protocol::Anthropic => Json(to_messages_response(&response)).into_response(),
        },
        Err(e) => reject(&state, prepared.protocol, e),
    }
}

/// Backend call, then normalization. The only suspension point is the call.
async fn run_pipeline(state: &AppState, prepared: &Prepared) -> Result<NormalizedResponse> {
    let raw = state.backend.complete(&prepared.capability, &prepared.request).await?;

    let Normalized { response, report } =
        state
            .normalizer
            .normalize(&raw, &prepared.requested_model, &prepared.declared);

    tracing::info!(
        model = %prepared.requested_model,
        path = report.extraction_path,
        native = report.native_tool_calls,
        tool_calls = report.tool_calls,
        finish = response.choices.first().map_or("stop", |c| c.finish_reason.as_str()),
        diagnostics = report.diagnostics.len(),
        "normalized response"
    );
    state.journal.normalization(&prepared.requested_model, &report);

    Ok(response)
}

/// Heartbeats while the backend call is pending, then the full frame
/// sequence. A failed write to the client ends the task and drops the call.
fn stream_response(state: Arc<AppState>, prepared: Prepared) -> Response {
    let interval = state.config.streaming.heartbeat_interval();
    let options = match prepared.protocol {
        Protocol::OpenAi => state.config.streaming.openai_options(),
        Protocol::Anthropic => state.config.streaming.anthropic_options(),
    };

    let (tx, rx) = futures::channel::mpsc::channel::<Bytes>(STREAM_BUFFER);

    let pending = async move {
        match run_pipeline(&state, &prepared).await {
            Ok(response) => emit(&response, prepared.protocol, options)
                .map(|frame| frame.to_bytes())
                .collect::<Vec<_>>(),
            Err(e) => {
                tracing::error!(error = %e, "streaming request failed");
                state.journal.error("server", format!("Streaming error: {e}"));
                error_frames(prepared.protocol, &e)
                    .iter()
                    .map(StreamFrame::to_bytes)
                    .collect()
            }
        }
    };

    tokio::spawn(async move {
        match deliver(with_heartbeat(pending, interval), tx).await {
            Ok(frames) => tracing::debug!(frames, "stream delivered"),
            Err(_) => tracing::debug!("client disconnected, stream abandoned"),
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(rx.map(Ok::<_, Infallible>)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// In-band error once the stream has started.
fn error_frames(protocol: Protocol, err: &GatewayError) -> Vec<StreamFrame> {
    match protocol {
        Protocol::OpenAi => {
            let body = ChatErrorResponse::new(err.error_type(), err.to_string());
            vec![
                StreamFrame::data(serde_json::to_string(&body).unwrap_or_default()),
                StreamFrame::data(DONE_SENTINEL),
            ]
        }
        Protocol::Anthropic => {
            let body = ErrorResponse::new(err.error_type(), err.to_string());
            vec![StreamFrame::event(
                "error",
                serde_json::to_string(&body).unwrap_or_default(),
            )]
        }
    }
}

/// Error body in the caller's dialect, with the mapped status.
fn reject(state: &AppState, protocol: Protocol, err: GatewayError) -> Response {
    tracing::warn!(error = %err, "request failed");
    state.journal.warn("server", err.to_string());

    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);
    match protocol {
        Protocol::OpenAi => (
            status,
            Json(ChatErrorResponse::new(err.error_type(), err.to_string())),
        )
            .into_response(),
        Protocol::Anthropic => (
            status,
            Json(ErrorResponse::new(err.error_type(), err.to_string())),
        )
            .into_response(),
    }
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let models: Vec<serde_json::Value> = state
        .capabilities
        .models()
        .await
        .into_iter()
        .map(|id| {
            serde_json::json!({
                "id": id,
                "object": "model",
                "owned_by": "tool-relay",
            })
        })
        .collect();

    Json(serde_json::json!({ "data": models, "object": "list" }))
}

#[derive(Debug, Deserialize)]
struct DiagnosticsQuery {
    #[serde(default = "default_diagnostics_limit")]
    limit: usize,
}

fn default_diagnostics_limit() -> usize {
    100
}

async fn handle_diagnostics(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DiagnosticsQuery>,
) -> Json<serde_json::Value> {
    let entries = state.journal.recent(query.limit);
    Json(serde_json::json!({ "entries": entries }))
}
