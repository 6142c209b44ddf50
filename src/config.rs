use crate::emit::heartbeat::DEFAULT_HEARTBEAT_INTERVAL;
use crate::emit::EmitOptions;
use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,
    #[serde(default)]
    pub models: HashMap<String, ModelConfig>,
    /// JSONL journal file. Journal stays in memory only when unset. The file
    /// is compacted to the most recent 10 000 entries whenever it doubles that.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding the bearer key, if the backend wants one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub paths: BackendPaths,
}

/// Request path per backend kind, appended to `base_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendPaths {
    #[serde(default = "default_openai_path")]
    pub openai: String,
    #[serde(default = "default_anthropic_path")]
    pub anthropic: String,
    #[serde(default = "default_vertex_path")]
    pub vertex: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    #[serde(default = "default_chunk_chars")]
    pub openai_chunk_chars: usize,
    #[serde(default = "default_chunk_chars")]
    pub anthropic_chunk_chars: usize,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Fetch `{base_url}/models` and refuse models the backend doesn't list.
    #[serde(default)]
    pub discover: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub backend: crate::capabilities::BackendKind,
    /// Model id sent to the backend. Defaults to the requested id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default = "default_native_tools")]
    pub native_tools: bool,
}

fn default_port() -> u16 {
    4222
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_openai_path() -> String {
    "/chat/completions".to_string()
}

fn default_anthropic_path() -> String {
    "/anthropic/chat/completions".to_string()
}

fn default_vertex_path() -> String {
    "/vertex/chat/completions".to_string()
}

fn default_chunk_chars() -> usize {
    24
}

fn default_heartbeat_secs() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL.as_secs()
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_native_tools() -> bool {
    true
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            backend: BackendConfig::default(),
            streaming: StreamingConfig::default(),
            capabilities: CapabilitiesConfig::default(),
            models: HashMap::new(),
            journal_path: None,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: None,
            timeout_secs: default_timeout_secs(),
            paths: BackendPaths::default(),
        }
    }
}

impl Default for BackendPaths {
    fn default() -> Self {
        Self {
            openai: default_openai_path(),
            anthropic: default_anthropic_path(),
            vertex: default_vertex_path(),
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            openai_chunk_chars: default_chunk_chars(),
            anthropic_chunk_chars: default_chunk_chars(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            discover: false,
        }
    }
}

impl StreamingConfig {
    pub fn openai_options(&self) -> EmitOptions {
        EmitOptions {
            chunk_chars: self.openai_chunk_chars,
        }
    }

    pub fn anthropic_options(&self) -> EmitOptions {
        EmitOptions {
            chunk_chars: self.anthropic_chunk_chars,
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}

impl GatewayConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir. With no file anywhere
    /// the defaults are used.
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(&candidate);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Resolve the backend bearer key, if one is configured.
    pub fn resolve_api_key(&self) -> Result<Option<String>> {
        match self.backend.api_key_env {
            None => Ok(None),
            Some(ref var) => std::env::var(var).map(Some).map_err(|_| {
                GatewayError::config(format!(
                    "Environment variable '{var}' not set. Set it to the backend API key."
                ))
            }),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.backend.timeout_secs)
    }

    pub fn capability_ttl(&self) -> Duration {
        Duration::from_secs(self.capabilities.ttl_secs)
    }

    fn validate(&self) -> Result<()> {
        if !self.backend.base_url.starts_with("http://") && !self.backend.base_url.starts_with("https://") {
            return Err(GatewayError::config(format!(
                "backend.base_url must be an http(s) URL, got '{}'",
                self.backend.base_url
            )));
        }
        Ok(())
    }
}

/// Candidate config files in priority order.
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("tool-relay.toml")];

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("tool-relay").join("config.toml"));
    }

    if let Some(home) = home_dir() {
        paths.push(home.join(".config").join("tool-relay").join("config.toml"));
        paths.push(home.join(".tool-relay.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
