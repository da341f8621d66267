//! Ollama backend for local models.
//!
//! Ollama does not assign tool-call ids, so this adapter synthesizes them;
//! the loop relies on ids to correlate results with calls.

use crate::llm::{FinishReason, LlmBackend, LlmRequest, LlmResponse, ToolSpec};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use storage::{Role, ToolCallRequest};
use uuid::Uuid;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3.1";

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiTool<'a>>>,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall<'a>>>,
}

#[derive(Debug, Serialize)]
struct ApiToolCall<'a> {
    function: ApiFunctionCall<'a>,
}

#[derive(Debug, Serialize)]
struct ApiFunctionCall<'a> {
    name: &'a str,
    arguments: &'a Value,
}

#[derive(Debug, Serialize)]
struct ApiTool<'a> {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ApiFunctionSpec<'a>,
}

#[derive(Debug, Serialize)]
struct ApiFunctionSpec<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Builder for creating an Ollama backend.
#[derive(Debug, Clone)]
pub struct OllamaBackendBuilder {
    model: String,
    base_url: String,
}

impl OllamaBackendBuilder {
    pub fn new() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
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

    pub fn build(self) -> OllamaBackend {
        OllamaBackend {
            client: reqwest::Client::new(),
            model: self.model,
            base_url: self.base_url,
        }
    }
}

impl Default for OllamaBackendBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Local Ollama backend. No API key required.
pub struct OllamaBackend {
    client: reqwest::Client,
    model: String,
    base_url: String,
}

impl OllamaBackend {
    pub fn builder() -> OllamaBackendBuilder {
        OllamaBackendBuilder::new()
    }
}

impl std::fmt::Display for OllamaBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ollama({} @ {})", self.model, self.base_url)
    }
}

impl LlmBackend for OllamaBackend {
    async fn chat(&self, request: LlmRequest<'_>) -> Result<LlmResponse> {
        let messages = request
            .messages
            .iter()
            .map(|msg| {
                let tool_calls = if msg.role == Role::Assistant && !msg.tool_calls.is_empty() {
                    Some(
                        msg.tool_calls
                            .iter()
                            .map(|c| ApiToolCall {
                                function: ApiFunctionCall {
                                    name: &c.name,
                                    arguments: &c.arguments,
                                },
                            })
                            .collect(),
                    )
                } else {
                    None
                };
                ApiMessage {
                    role: msg.role.as_str(),
                    content: &msg.content,
                    tool_calls,
                }
            })
            .collect();

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(request.tools.iter().map(to_api_tool).collect())
        };

        let body = ApiRequest {
            model: &self.model,
            messages,
            stream: false,
            tools,
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
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

        let tool_calls: Vec<ToolCallRequest> = api_response
            .message
            .tool_calls
            .into_iter()
            .map(|tc| ToolCallRequest {
                id: format!("ollama_tc_{}", Uuid::new_v4()),
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        let finish_reason = if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        };

        Ok(LlmResponse {
            content: if api_response.message.content.is_empty() {
                None
            } else {
                Some(api_response.message.content)
            },
            tool_calls,
            finish_reason,
        })
    }
}

fn to_api_tool<'a>(tool: &'a ToolSpec) -> ApiTool<'a> {
    ApiTool {
        tool_type: "function",
        function: ApiFunctionSpec {
            name: &tool.name,
            description: &tool.description,
            parameters: &tool.parameters,
        },
    }
}
