//! Backend transport: one complete chat request in, one raw JSON response out.
//!
//! The response is returned undecoded. Its shape depends on which family the
//! backend emulates for the model and is sorted out by the normalizer.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::capabilities::{BackendKind, Capability};
use crate::config::{BackendPaths, GatewayConfig};
use crate::error::{GatewayError, Result};
use crate::translate::openai_types::ChatCompletionRequest;

#[async_trait]
pub trait Backend: Send + Sync {
    async fn complete(&self, capability: &Capability, request: &ChatCompletionRequest) -> Result<Value>;
}

/// `POST {base_url}{path}` over reqwest. No retries.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    paths: BackendPaths,
    api_key: Option<String>,
}

impl HttpBackend {
    pub fn new(client: reqwest::Client, base_url: &str, paths: BackendPaths, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            paths,
            api_key,
        }
    }

    pub fn from_config(config: &GatewayConfig, client: reqwest::Client) -> Result<Self> {
        Ok(Self::new(
            client,
            &config.backend.base_url,
            config.backend.paths.clone(),
            config.resolve_api_key()?,
        ))
    }

    pub fn url_for(&self, kind: BackendKind) -> String {
        let path = match kind {
            BackendKind::OpenAi => &self.paths.openai,
            BackendKind::Anthropic => &self.paths.anthropic,
            BackendKind::Vertex => &self.paths.vertex,
        };
        format!("{}{}", self.base_url, path)
    }
}

/// Shared client with the configured request timeout. The timeout is the
/// only cancellation of an in-flight backend call.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

#[async_trait]
impl Backend for HttpBackend {
    async fn complete(&self, capability: &Capability, request: &ChatCompletionRequest) -> Result<Value> {
        let url = self.url_for(capability.backend);

        tracing::info!(
            url = %url,
            model = %request.model,
            backend = capability.backend.as_str(),
            "POST backend"
        );

        let mut builder = self.client.post(&url).json(request);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| GatewayError::backend(format!("Request failed: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::backend(format!("Failed to read response body: {e}")))?;

        tracing::debug!(status, body_len = body.len(), "backend response");

        if status >= 400 {
            return Err(GatewayError::backend(format!(
                "Backend returned status {status}: {}",
                truncate(&body, 500)
            )));
        }

        serde_json::from_str(&body).map_err(|e| {
            GatewayError::backend(format!(
                "Backend response is not JSON: {e}. Body: {}",
                truncate(&body, 300)
            ))
        })
    }
}

/// Cut `s` to at most `max` bytes without splitting a character.
pub fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_per_kind() {
        let backend = HttpBackend::new(
            reqwest::Client::new(),
            "http://backend:9000/v1/",
            BackendPaths::default(),
            None,
        );
        assert_eq!(
            backend.url_for(BackendKind::OpenAi),
            "http://backend:9000/v1/chat/completions"
        );
        assert_eq!(
            backend.url_for(BackendKind::Vertex),
            "http://backend:9000/v1/vertex/chat/completions"
        );
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 3), "hel");
        assert_eq!(truncate("héllo", 2), "h");
    }
}
