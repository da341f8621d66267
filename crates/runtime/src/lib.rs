//! Concierge runtime — conversation orchestration over LLM providers and
//! MCP tool servers.
//!
//! # Overview
//!
//! The runtime is organized around these concepts:
//!
//! - **Agent**: drives one user turn through the call/act/observe loop,
//!   persisting conversation state through a [`SessionStore`].
//! - **LlmBackend**: a trait abstracting chat providers (OpenAI, Claude,
//!   Ollama), selected at runtime via [`LlmProvider`].
//! - **ToolRegistry**: routes tool calls to MCP servers spawned as child
//!   processes.
//!
//! # Example
//!
//! ```ignore
//! use runtime::{Agent, LlmProvider, McpClient, ProviderKind, ProviderSettings, ToolRegistry};
//! use std::sync::Arc;
//! use storage::MemoryStore;
//!
//! # async fn example() -> runtime::Result<()> {
//! let provider = LlmProvider::from_settings(
//!     ProviderKind::Ollama,
//!     ProviderSettings::default(),
//! )?;
//!
//! let mut registry = ToolRegistry::new();
//! let client = McpClient::spawn("uv", ["run", "python", "hotel_server.py"])
//!     .await
//!     .map_err(|e| runtime::Error::Tool(e.to_string()))?;
//! registry.register_server(client).await
//!     .map_err(|e| runtime::Error::Tool(e.to_string()))?;
//!
//! let agent = Agent::new(provider, registry, Arc::new(MemoryStore::new()));
//! let answer = agent.process_message("conn-1", "Find me a hotel in Paris").await;
//! println!("{answer}");
//! # Ok(())
//! # }
//! ```
//!
//! [`SessionStore`]: storage::SessionStore

mod agent;
pub mod budget;
mod error;
pub mod extract;
pub mod llm;
mod mcp;
pub mod prompt;
mod providers;
mod registry;
pub mod sanitize;

// Orchestration
pub use agent::{Agent, RetryPolicy};

// LLM core types (provider-agnostic)
pub use llm::{FinishReason, LlmBackend, LlmRequest, LlmResponse, ToolSpec};

// Provider selection
pub use providers::{
    ClaudeBackend, ClaudeBackendBuilder, LlmProvider, OllamaBackend, OllamaBackendBuilder,
    OpenAiBackend, OpenAiBackendBuilder, ProviderKind, ProviderSettings,
};

// Error types
pub use error::{Error, Result};

// MCP client and tool routing
pub use mcp::{McpClient, McpError};
pub use registry::{ToolHost, ToolRegistry};
