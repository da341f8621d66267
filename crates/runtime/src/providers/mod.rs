//! LLM provider adapters.
//!
//! Each provider implements [`LlmBackend`] for its specific API; the
//! [`LlmProvider`] enum carries whichever one the configuration selected.

mod claude;
mod ollama;
mod openai;

pub use claude::{ClaudeBackend, ClaudeBackendBuilder};
pub use ollama::{OllamaBackend, OllamaBackendBuilder};
pub use openai::{OpenAiBackend, OpenAiBackendBuilder};

use crate::llm::{LlmBackend, LlmRequest, LlmResponse};
use crate::{Error, Result};

/// Which provider to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Claude,
    Ollama,
}

impl ProviderKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "openai" => Some(Self::OpenAi),
            "claude" => Some(Self::Claude),
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Claude => "claude",
            Self::Ollama => "ollama",
        }
    }
}

/// Settings for constructing a provider, typically read from config.
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

/// A provider selected at runtime.
pub enum LlmProvider {
    OpenAi(OpenAiBackend),
    Claude(ClaudeBackend),
    Ollama(OllamaBackend),
}

impl LlmProvider {
    /// Build the selected provider from its settings.
    ///
    /// OpenAI and Claude require an API key; Ollama does not.
    pub fn from_settings(kind: ProviderKind, settings: ProviderSettings) -> Result<Self> {
        match kind {
            ProviderKind::OpenAi => {
                let api_key = settings
                    .api_key
                    .ok_or_else(|| Error::Config("openai requires an api key".into()))?;
                let mut builder = OpenAiBackend::builder(api_key);
                if let Some(model) = settings.model {
                    builder = builder.model(model);
                }
                if let Some(base_url) = settings.base_url {
                    builder = builder.base_url(base_url);
                }
                Ok(Self::OpenAi(builder.build()))
            }
            ProviderKind::Claude => {
                let api_key = settings
                    .api_key
                    .ok_or_else(|| Error::Config("claude requires an api key".into()))?;
                let mut builder = ClaudeBackend::builder(api_key);
                if let Some(model) = settings.model {
                    builder = builder.model(model);
                }
                if let Some(base_url) = settings.base_url {
                    builder = builder.base_url(base_url);
                }
                Ok(Self::Claude(builder.build()))
            }
            ProviderKind::Ollama => {
                let mut builder = OllamaBackend::builder();
                if let Some(model) = settings.model {
                    builder = builder.model(model);
                }
                if let Some(base_url) = settings.base_url {
                    builder = builder.base_url(base_url);
                }
                Ok(Self::Ollama(builder.build()))
            }
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi(b) => b.fmt(f),
            Self::Claude(b) => b.fmt(f),
            Self::Ollama(b) => b.fmt(f),
        }
    }
}

impl LlmBackend for LlmProvider {
    async fn chat(&self, request: LlmRequest<'_>) -> Result<LlmResponse> {
        match self {
            Self::OpenAi(b) => b.chat(request).await,
            Self::Claude(b) => b.chat(request).await,
            Self::Ollama(b) => b.chat(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parse_round_trip() {
        for kind in [ProviderKind::OpenAi, ProviderKind::Claude, ProviderKind::Ollama] {
            assert_eq!(ProviderKind::parse(kind.as_str()), Some(kind));
        }
        assert!(ProviderKind::parse("gemini").is_none());
    }

    #[test]
    fn openai_without_key_is_a_config_error() {
        let err =
            LlmProvider::from_settings(ProviderKind::OpenAi, ProviderSettings::default());
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn ollama_needs_no_key() {
        let provider =
            LlmProvider::from_settings(ProviderKind::Ollama, ProviderSettings::default());
        assert!(provider.is_ok());
    }
}
