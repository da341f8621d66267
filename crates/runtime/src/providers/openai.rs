//! OpenAI chat-completions backend.

use crate::llm::{FinishReason, LlmBackend, LlmRequest, LlmResponse, ToolSpec};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use storage::{ChatMessage, Role, ToolCallRequest};

const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiTool<'a>>>,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ApiToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: ApiFunctionCall,
}

#[derive(Debug, Serialize)]
struct ApiFunctionCall {
    name: String,
    /// Arguments as a JSON-encoded string, per the OpenAI wire format.
    arguments: String,
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
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ApiResponseToolCall>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseToolCall {
    id: String,
    function: ApiResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ApiResponseFunction {
    name: String,
    arguments: String,
}

/// Builder for creating an OpenAI backend.
#[derive(Debug, Clone)]
pub struct OpenAiBackendBuilder {
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiBackendBuilder {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: OPENAI_API_URL.to_string(),
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point at an OpenAI-compatible endpoint.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn build(self) -> OpenAiBackend {
        OpenAiBackend {
            client: reqwest::Client::new(),
            api_key: self.api_key,
            model: self.model,
            base_url: self.base_url,
        }
    }
}

/// OpenAI API backend.
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiBackend {
    pub fn builder(api_key: impl Into<String>) -> OpenAiBackendBuilder {
        OpenAiBackendBuilder::new(api_key)
    }

    fn to_api_message<'a>(msg: &'a ChatMessage) -> Result<ApiMessage<'a>> {
        let tool_calls = if msg.role == Role::Assistant && !msg.tool_calls.is_empty() {
            Some(
                msg.tool_calls
                    .iter()
                    .map(to_api_tool_call)
                    .collect::<Result<Vec<_>>>()?,
            )
        } else {
            None
        };

        Ok(ApiMessage {
            role: msg.role.as_str(),
            content: &msg.content,
            tool_calls,
            tool_call_id: msg.tool_call_id.as_deref(),
        })
    }
}

fn to_api_tool_call(call: &ToolCallRequest) -> Result<ApiToolCall> {
    Ok(ApiToolCall {
        id: call.id.clone(),
        call_type: "function",
        function: ApiFunctionCall {
            name: call.name.clone(),
            arguments: serde_json::to_string(&call.arguments)?,
        },
    })
}

fn to_api_tools<'a>(tools: &'a [ToolSpec]) -> Option<Vec<ApiTool<'a>>> {
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|t| ApiTool {
                tool_type: "function",
                function: ApiFunctionSpec {
                    name: &t.name,
                    description: &t.description,
                    parameters: &t.parameters,
                },
            })
            .collect(),
    )
}

impl std::fmt::Display for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "openai({})", self.model)
    }
}

impl LlmBackend for OpenAiBackend {
    async fn chat(&self, request: LlmRequest<'_>) -> Result<LlmResponse> {
        let api_messages = request
            .messages
            .iter()
            .map(Self::to_api_message)
            .collect::<Result<Vec<_>>>()?;

        let body = ApiRequest {
            model: &self.model,
            messages: api_messages,
            tools: to_api_tools(request.tools),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
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
        let choice = api_response.choices.into_iter().next().ok_or(Error::Api {
            status: None,
            message: "response contained no choices".to_string(),
        })?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|tc| {
                let arguments: Value = if tc.function.arguments.is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&tc.function.arguments)?
                };
                Ok(ToolCallRequest {
                    id: tc.id,
                    name: tc.function.name,
                    arguments,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let finish_reason = if !tool_calls.is_empty() {
            FinishReason::ToolCalls
        } else {
            match choice.finish_reason.as_deref() {
                Some("length") => FinishReason::Length,
                Some("error") => FinishReason::Error,
                _ => FinishReason::Stop,
            }
        };

        Ok(LlmResponse {
            content: choice.message.content,
            tool_calls,
            finish_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_tool_calls_serialize_as_function_calls() {
        let msg = ChatMessage::assistant_with_calls(
            "",
            vec![ToolCallRequest {
                id: "call_1".into(),
                name: "search_flights".into(),
                arguments: serde_json::json!({"origin": "SFO"}),
            }],
        );
        let api = OpenAiBackend::to_api_message(&msg).unwrap();
        let json = serde_json::to_value(&api).unwrap();
        assert_eq!(json["tool_calls"][0]["type"], "function");
        assert_eq!(
            json["tool_calls"][0]["function"]["arguments"],
            "{\"origin\":\"SFO\"}"
        );
    }

    #[test]
    fn tool_message_carries_call_id() {
        let msg = ChatMessage::tool("result", "call_1");
        let api = OpenAiBackend::to_api_message(&msg).unwrap();
        let json = serde_json::to_value(&api).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_1");
        assert!(json.get("tool_calls").is_none());
    }

    #[test]
    fn empty_tool_list_is_omitted() {
        assert!(to_api_tools(&[]).is_none());
    }
}
