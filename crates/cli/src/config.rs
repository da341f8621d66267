//! Configuration loading from concierge.toml.

use runtime::{ProviderKind, ProviderSettings, RetryPolicy};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// LLM provider selection and credentials.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Session store selection.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Rate-limit retry tuning.
    #[serde(default)]
    pub retry: RetryConfig,

    /// MCP tool servers to spawn at startup, declared as `[[tool_server]]`
    /// tables.
    #[serde(default, rename = "tool_server")]
    pub tool_servers: Vec<ToolServerConfig>,
}

/// LLM provider configuration.
#[derive(Debug, Deserialize)]
pub struct ProviderConfig {
    /// Provider name: "openai", "claude", or "ollama".
    #[serde(default = "default_provider")]
    pub name: String,

    /// API key. Falls back to the provider's conventional environment
    /// variable (OPENAI_API_KEY / ANTHROPIC_API_KEY) when unset.
    pub api_key: Option<String>,

    /// Model override; each provider has its own default.
    pub model: Option<String>,

    /// Base URL override, e.g. for proxies or a remote Ollama host.
    pub base_url: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider(),
            api_key: None,
            model: None,
            base_url: None,
        }
    }
}

fn default_provider() -> String {
    "ollama".to_string()
}

impl ProviderConfig {
    pub fn kind(&self) -> Result<ProviderKind, ConfigError> {
        ProviderKind::parse(&self.name)
            .ok_or_else(|| ConfigError::UnknownProvider(self.name.clone()))
    }

    pub fn settings(&self) -> Result<ProviderSettings, ConfigError> {
        let env_key = match self.kind()? {
            ProviderKind::OpenAi => std::env::var("OPENAI_API_KEY").ok(),
            ProviderKind::Claude => std::env::var("ANTHROPIC_API_KEY").ok(),
            ProviderKind::Ollama => None,
        };
        Ok(ProviderSettings {
            api_key: self.api_key.clone().or(env_key),
            model: self.model.clone(),
            base_url: self.base_url.clone(),
        })
    }
}

/// Session store configuration.
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// Store backend: "sqlite" or "memory".
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// SQLite database path; defaults to a per-user data directory.
    pub path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: None,
        }
    }
}

fn default_storage_backend() -> String {
    "sqlite".to_string()
}

/// Rate-limit retry configuration.
///
/// The detection markers are configurable because providers phrase their
/// rate/size rejections differently across versions.
#[derive(Debug, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_markers")]
    pub markers: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            markers: default_markers(),
        }
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_markers() -> Vec<String> {
    vec!["rate".to_string(), "token".to_string()]
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: Duration::from_millis(self.backoff_ms),
            markers: self.markers.clone(),
        }
    }
}

/// One MCP tool server to spawn at startup.
#[derive(Debug, Deserialize)]
pub struct ToolServerConfig {
    /// Display name used in logs.
    pub name: String,
    /// Executable to spawn.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables, typically upstream API keys.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory; tool servers often resolve data files relative to
    /// their own location.
    pub cwd: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("unknown provider '{0}': expected openai, claude, or ollama")]
    UnknownProvider(String),

    #[error("unknown storage backend '{0}': expected sqlite or memory")]
    UnknownStorageBackend(String),
}
