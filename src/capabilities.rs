//! Capability registry: which backend kind serves a model, under what id,
//! and whether it takes `tools` natively.
//!
//! Configured models come from `[models."<id>"]`. Anything else is inferred
//! from the model name. When discovery is on, the backend's `/models` list is
//! cached for one TTL and models missing from it are refused.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::config::{GatewayConfig, ModelConfig};
use crate::error::{GatewayError, Result};

/// Response shape family the backend emulates for a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    OpenAi,
    Anthropic,
    Vertex,
}

impl BackendKind {
    /// Guess the kind from a model name.
    pub fn infer(model: &str) -> Self {
        let lower = model.to_ascii_lowercase();
        if lower.starts_with("claude") || lower.contains("anthropic") {
            BackendKind::Anthropic
        } else if lower.starts_with("gemini") || lower.contains("vertex") {
            BackendKind::Vertex
        } else {
            BackendKind::OpenAi
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::OpenAi => "openai",
            BackendKind::Anthropic => "anthropic",
            BackendKind::Vertex => "vertex",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capability {
    pub backend: BackendKind,
    /// Model id sent to the backend.
    pub backend_model: String,
    pub native_tools: bool,
}

/// Where the list of models the backend serves comes from.
#[async_trait]
pub trait CapabilitySource: Send + Sync {
    /// `None` means the source has no list and every model is allowed.
    async fn list_models(&self) -> Result<Option<Vec<String>>>;
}

/// No discovery: every model is allowed.
#[derive(Debug, Default)]
pub struct StaticSource;

#[async_trait]
impl CapabilitySource for StaticSource {
    async fn list_models(&self) -> Result<Option<Vec<String>>> {
        Ok(None)
    }
}

/// OpenAI-compatible `GET {base_url}/models`.
#[derive(Debug, Clone)]
pub struct HttpCapabilitySource {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

impl HttpCapabilitySource {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client,
            url: format!("{}/models", base_url.trim_end_matches('/')),
            api_key,
        }
    }
}

#[async_trait]
impl CapabilitySource for HttpCapabilitySource {
    async fn list_models(&self) -> Result<Option<Vec<String>>> {
        let mut builder = self.client.get(&self.url);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| GatewayError::backend(format!("Failed to fetch models: {e}")))?;

        let status = response.status().as_u16();
        if status >= 400 {
            return Err(GatewayError::backend(format!(
                "Backend returned status {status} when fetching models"
            )));
        }

        let parsed: ModelList = response
            .json()
            .await
            .map_err(|e| GatewayError::backend(format!("Failed to parse models response: {e}")))?;

        Ok(Some(parsed.data.into_iter().map(|m| m.id).collect()))
    }
}

struct Snapshot {
    fetched_at: Instant,
    verified: Option<HashSet<String>>,
}

/// Read-mostly capability lookup shared by all requests.
///
/// The verified list is refreshed at most once per TTL. Once a list exists,
/// refreshes run in the background and readers keep the stale list until the
/// new one is installed. Only the very first fetch is awaited inline.
pub struct CapabilityCache {
    configured: HashMap<String, ModelConfig>,
    source: Arc<dyn CapabilitySource>,
    ttl: Duration,
    snapshot: Arc<RwLock<Option<Snapshot>>>,
    /// Held by whoever is fetching. Readers never take it.
    refreshing: Arc<Mutex<()>>,
}

impl std::fmt::Debug for CapabilityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityCache")
            .field("configured", &self.configured.len())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl CapabilityCache {
    pub fn new(
        configured: HashMap<String, ModelConfig>,
        source: Arc<dyn CapabilitySource>,
        ttl: Duration,
    ) -> Self {
        Self {
            configured,
            source,
            ttl,
            snapshot: Arc::new(RwLock::new(None)),
            refreshing: Arc::new(Mutex::new(())),
        }
    }

    /// Build the cache the config asks for.
    pub fn from_config(config: &GatewayConfig, client: reqwest::Client) -> Result<Self> {
        let source: Arc<dyn CapabilitySource> = if config.capabilities.discover {
            Arc::new(HttpCapabilitySource::new(
                client,
                &config.backend.base_url,
                config.resolve_api_key()?,
            ))
        } else {
            Arc::new(StaticSource)
        };

        Ok(Self::new(config.models.clone(), source, config.capability_ttl()))
    }

    /// Resolve `model` to a capability.
    ///
    /// # Errors
    /// `UnknownModel` if the backend publishes a model list that lacks the
    /// target model.
    pub async fn lookup(&self, model: &str) -> Result<Capability> {
        let capability = match self.configured.get(model) {
            Some(entry) => Capability {
                backend: entry.backend,
                backend_model: entry.target.clone().unwrap_or_else(|| model.to_string()),
                native_tools: entry.native_tools,
            },
            None => Capability {
                backend: BackendKind::infer(model),
                backend_model: model.to_string(),
                native_tools: true,
            },
        };

        self.refresh_if_stale().await;

        let snapshot = self.snapshot.read().await;
        if let Some(verified) = snapshot.as_ref().and_then(|s| s.verified.as_ref()) {
            if !verified.contains(&capability.backend_model) {
                return Err(GatewayError::unknown_model(model));
            }
        }

        Ok(capability)
    }

    /// Every model id callers can ask for: configured aliases plus whatever the
    /// backend lists.
    pub async fn models(&self) -> Vec<String> {
        self.refresh_if_stale().await;

        let mut ids: Vec<String> = self.configured.keys().cloned().collect();
        if let Some(verified) = self.snapshot.read().await.as_ref().and_then(|s| s.verified.as_ref()) {
            ids.extend(verified.iter().cloned());
        }
        ids.sort();
        ids.dedup();
        ids
    }

    async fn refresh_if_stale(&self) {
        let has_snapshot = match self.snapshot.read().await.as_ref() {
            Some(s) if s.fetched_at.elapsed() < self.ttl => return,
            Some(_) => true,
            None => false,
        };

        if has_snapshot {
            // Stale: serve the old list and refresh behind it, once
            let Ok(permit) = self.refreshing.clone().try_lock_owned() else {
                return;
            };
            let source = Arc::clone(&self.source);
            let snapshot = Arc::clone(&self.snapshot);
            tokio::spawn(async move {
                let fetched = source.list_models().await;
                install(&snapshot, fetched).await;
                drop(permit);
            });
            return;
        }

        let _permit = self.refreshing.lock().await;
        // Another request may have done the first fetch while we waited
        if self.snapshot.read().await.is_some() {
            return;
        }
        let fetched = self.source.list_models().await;
        install(&self.snapshot, fetched).await;
    }
}

/// Swap a fetch result in. The write lock is only held for the swap.
async fn install(snapshot: &RwLock<Option<Snapshot>>, fetched: Result<Option<Vec<String>>>) {
    let fresh = match fetched {
        Ok(list) => {
            if let Some(ref ids) = list {
                tracing::debug!(count = ids.len(), "refreshed model list");
            }
            Ok(list.map(|ids| ids.into_iter().collect::<HashSet<_>>()))
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to refresh model list, keeping previous");
            Err(())
        }
    };

    let mut guard = snapshot.write().await;
    let verified = match fresh {
        Ok(verified) => verified,
        Err(()) => guard.as_mut().and_then(|s| s.verified.take()),
    };
    *guard = Some(Snapshot {
        fetched_at: Instant::now(),
        verified,
    });
}
