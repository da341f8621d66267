//! Anthropic Claude backend.
//!
//! Claude takes the system prompt as a top-level field and encodes tool
//! traffic as content blocks: `tool_use` on assistant turns, `tool_result`
//! inside user turns.

use crate::llm::{FinishReason, LlmBackend, LlmRequest, LlmResponse};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use storage::{ChatMessage, Role, ToolCallRequest};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiTool<'a>>>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: ApiContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Blocks(Vec<ApiBlock>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
struct ApiTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ResponseBlock>,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

/// Builder for creating a Claude backend.
#[derive(Debug, Clone)]
pub struct ClaudeBackendBuilder {
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
}

impl ClaudeBackendBuilder {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: ANTHROPIC_API_URL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn build(self) -> ClaudeBackend {
        ClaudeBackend {
            client: reqwest::Client::new(),
            api_key: self.api_key,
            model: self.model,
            base_url: self.base_url,
            max_tokens: self.max_tokens,
        }
    }
}

/// Anthropic API backend.
pub struct ClaudeBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
}

impl ClaudeBackend {
    pub fn builder(api_key: impl Into<String>) -> ClaudeBackendBuilder {
        ClaudeBackendBuilder::new(api_key)
    }

    fn convert_messages(messages: &[ChatMessage]) -> Vec<ApiMessage> {
        let mut converted = Vec::with_capacity(messages.len());
        for msg in messages {
            match msg.role {
                // The system message is lifted out into the top-level field.
                Role::System => {}
                Role::User => converted.push(ApiMessage {
                    role: "user",
                    content: ApiContent::Text(msg.content.clone()),
                }),
                Role::Assistant => {
                    if msg.tool_calls.is_empty() {
                        converted.push(ApiMessage {
                            role: "assistant",
                            content: ApiContent::Text(msg.content.clone()),
                        });
                    } else {
                        let mut blocks = Vec::new();
                        if !msg.content.is_empty() {
                            blocks.push(ApiBlock::Text {
                                text: msg.content.clone(),
                            });
                        }
                        for call in &msg.tool_calls {
                            blocks.push(ApiBlock::ToolUse {
                                id: call.id.clone(),
                                name: call.name.clone(),
                                input: call.arguments.clone(),
                            });
                        }
                        converted.push(ApiMessage {
                            role: "assistant",
                            content: ApiContent::Blocks(blocks),
                        });
                    }
                }
                // Tool results travel as user messages with tool_result blocks.
                Role::Tool => converted.push(ApiMessage {
                    role: "user",
                    content: ApiContent::Blocks(vec![ApiBlock::ToolResult {
                        tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                        content: msg.content.clone(),
                    }]),
                }),
            }
        }
        converted
    }
}

impl std::fmt::Display for ClaudeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "claude({})", self.model)
    }
}

impl LlmBackend for ClaudeBackend {
    async fn chat(&self, request: LlmRequest<'_>) -> Result<LlmResponse> {
        let system = request
            .messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str());

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| ApiTool {
                        name: &t.name,
                        description: &t.description,
                        input_schema: &t.parameters,
                    })
                    .collect(),
            )
        };

        let body = ApiRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system,
            messages: Self::convert_messages(request.messages),
            tools,
        };

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: Some(status.as_u16()),
                message,
            });
        }

        let api_response: ApiResponse = response.json().await?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in api_response.content {
            match block {
                ResponseBlock::Text { text: t } => text.push_str(&t),
                ResponseBlock::ToolUse { id, name, input } => tool_calls.push(ToolCallRequest {
                    id,
                    name,
                    arguments: input,
                }),
                ResponseBlock::Other => {}
            }
        }

        let finish_reason = match api_response.stop_reason.as_deref() {
            Some("tool_use") => FinishReason::ToolCalls,
            Some("max_tokens") => FinishReason::Length,
            _ if !tool_calls.is_empty() => FinishReason::ToolCalls,
            _ => FinishReason::Stop,
        };

        Ok(LlmResponse {
            content: if text.is_empty() { None } else { Some(text) },
            tool_calls,
            finish_reason,
        })
    }
}
