//! LLM backend abstraction.
//!
//! Provides a trait for LLM backends, allowing the orchestration loop to
//! drive OpenAI, Claude, or Ollama through a unified interface. The shared
//! message shape lives in the storage crate so persisted history and wire
//! requests stay structurally identical.

use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use storage::{ChatMessage, ToolCallRequest};

/// A tool definition exposed to the model, provider-agnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON-schema-like parameter description.
    pub parameters: Value,
}

/// Request to send to an LLM backend.
#[derive(Debug, Clone, Copy)]
pub struct LlmRequest<'a> {
    pub messages: &'a [ChatMessage],
    pub tools: &'a [ToolSpec],
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FinishReason {
    /// Natural end of response.
    #[default]
    Stop,
    /// Model wants to call tools.
    ToolCalls,
    /// Hit token limit.
    Length,
    /// Provider reported an error condition.
    Error,
}

/// Response from an LLM backend.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish_reason: FinishReason,
}

/// Trait for LLM backends.
///
/// Implementations handle the specifics of communicating with different
/// providers (wire formats, auth, tool-call encoding).
pub trait LlmBackend: Send + Sync {
    /// Send a chat request and get a response.
    fn chat(&self, request: LlmRequest<'_>) -> impl Future<Output = Result<LlmResponse>> + Send;
}
