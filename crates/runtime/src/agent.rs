//! Turn orchestration: the call/act/observe loop between the user, the
//! model, and the tool hosts.
//!
//! One invocation of [`Agent::process_message`] handles one inbound user
//! turn end to end: load context, extract facts, render the prompt, drive
//! the model until it answers without tool calls, sanitize, persist. Tool
//! calls within a model round run sequentially so results append in request
//! order; role/id correlation is order-sensitive.

use crate::budget;
use crate::extract;
use crate::llm::{LlmBackend, LlmRequest};
use crate::prompt;
use crate::registry::ToolHost;
use crate::sanitize;
use crate::{Error, Result};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use storage::{ChatMessage, Language, SessionStore};
use tracing::{debug, error, info, warn};

/// How rate-limit style rejections are detected and retried.
///
/// Detection is heuristic (status code or marker substrings in the error
/// text) and provider-dependent, so the markers are configurable rather
/// than hard-coded.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed per turn before degrading to a canned answer.
    pub max_retries: u32,
    /// Pause before each retry.
    pub backoff: Duration,
    /// Substrings in an error message that mark it as a rate/size rejection.
    pub markers: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_secs(1),
            markers: vec!["rate".to_string(), "token".to_string()],
        }
    }
}

impl RetryPolicy {
    /// Whether an error looks like a rate-limit or context-size rejection.
    pub fn is_rate_limit(&self, err: &Error) -> bool {
        match err {
            Error::Api { status, message } => {
                *status == Some(429)
                    || self.markers.iter().any(|m| message.contains(m.as_str()))
            }
            Error::Network(e) => e.status().map(|s| s.as_u16()) == Some(429),
            _ => false,
        }
    }
}

/// The conversation orchestrator.
pub struct Agent<B, T> {
    backend: B,
    tools: T,
    store: Arc<dyn SessionStore>,
    retry: RetryPolicy,
}

impl<B: LlmBackend, T: ToolHost> Agent<B, T> {
    pub fn new(backend: B, tools: T, store: Arc<dyn SessionStore>) -> Self {
        Self {
            backend,
            tools,
            store,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Process one user turn and return the answer text.
    ///
    /// Never fails from the caller's perspective: any turn-level error is
    /// logged and replaced with a short localized apology.
    pub async fn process_message(&self, connection_id: &str, user_message: &str) -> String {
        match self.run_turn(connection_id, user_message).await {
            Ok(answer) => answer,
            Err(err) => {
                error!(connection = connection_id, error = %err, "turn failed");
                let lang = extract::detect_language(user_message).unwrap_or_default();
                trouble_message(lang).to_string()
            }
        }
    }

    async fn run_turn(&self, connection_id: &str, user_message: &str) -> Result<String> {
        let mut context = self.store.get_or_create_context(connection_id)?;
        extract::update_extracted_info(&mut context.extracted_info, user_message);
        let lang = context.extracted_info.active_language();

        let tool_names: Vec<String> = self
            .tools
            .specs()
            .iter()
            .map(|s| s.name.clone())
            .collect();
        let system_prompt = prompt::build_system_prompt(&context.extracted_info, &tool_names);

        let history = budget::trim_history_to_fit(budget::history_window(&context.messages));
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend(history);
        messages.push(ChatMessage::user(user_message));

        let answer = self.dispatch(&mut messages, lang).await?;
        let cleaned = sanitize::strip_markup(&answer);

        // Only the user message and the final cleaned answer are persisted;
        // intermediate tool rounds live in the in-flight list only.
        context.messages.push(ChatMessage::user(user_message));
        context.messages.push(ChatMessage::assistant(cleaned.clone()));
        context.last_updated = Utc::now();
        self.store.save_context(connection_id, &context)?;

        info!(
            connection = connection_id,
            chars = cleaned.chars().count(),
            "answer generated"
        );
        Ok(cleaned)
    }

    /// Drive the model until it answers without tool calls.
    ///
    /// Rate-limit rejections trigger an aggressive context trim plus backoff,
    /// bounded by the retry ceiling; exhaustion degrades to a canned answer
    /// rather than failing the turn.
    async fn dispatch(&self, messages: &mut Vec<ChatMessage>, lang: Language) -> Result<String> {
        let specs = self.tools.specs();
        if specs.is_empty() {
            warn!("no tools registered; answers will not use live data");
        }

        let mut retries = 0u32;
        loop {
            let result = self
                .backend
                .chat(LlmRequest {
                    messages: messages.as_slice(),
                    tools: specs,
                })
                .await;

            let response = match result {
                Ok(response) => response,
                Err(err) if self.retry.is_rate_limit(&err) => {
                    if retries >= self.retry.max_retries {
                        warn!("retry ceiling reached, degrading");
                        return Ok(degraded_message(lang).to_string());
                    }
                    retries += 1;
                    warn!(
                        attempt = retries,
                        max = self.retry.max_retries,
                        "rate limited, trimming context and retrying"
                    );
                    let trimmed = budget::aggressive_trim(messages);
                    *messages = trimmed;
                    tokio::time::sleep(self.retry.backoff).await;
                    continue;
                }
                Err(err) => return Err(err),
            };
            retries = 0;

            let content = response.content.unwrap_or_default();
            if response.tool_calls.is_empty() {
                let answer = if content.is_empty() {
                    empty_answer_fallback(lang).to_string()
                } else {
                    content
                };
                return Ok(answer);
            }

            messages.push(ChatMessage::assistant_with_calls(
                content,
                response.tool_calls.clone(),
            ));

            for call in &response.tool_calls {
                debug!(tool = %call.name, "calling tool");
                let result = match self.tools.execute(&call.name, &call.arguments).await {
                    Ok(text) => finalize_tool_result(text, &call.name),
                    Err(Error::ToolNotFound(_)) => {
                        warn!(tool = %call.name, "tool not found");
                        "Tool not found".to_string()
                    }
                    Err(err) => {
                        error!(tool = %call.name, error = %err, "tool execution failed");
                        format!("Error executing tool: {err}")
                    }
                };
                messages.push(ChatMessage::tool(result, &call.id));
            }
        }
    }
}

/// Truncate a tool result and rewrite upstream error payloads into guidance
/// the model can act on.
fn finalize_tool_result(text: String, tool_name: &str) -> String {
    let truncated = budget::truncate_tool_result(&text, tool_name);

    if truncated.contains("\"error\"") {
        if let Ok(Value::Object(map)) = serde_json::from_str(&truncated) {
            if let Some(error) = map.get("error") {
                warn!(tool = tool_name, %error, "tool returned an error payload");
                return format!(
                    "Error from {tool_name}: {error}. This might be due to invalid dates \
                     (dates too far in the future may not be supported), invalid airport \
                     codes, or API limitations. Please inform the user about this \
                     limitation and suggest dates within the next 6 months or checking \
                     the airport codes."
                );
            }
        }
    }

    if truncated.is_empty() {
        "Tool executed successfully but returned no content".to_string()
    } else {
        truncated
    }
}

/// Answer used when the model stops without producing any text.
fn empty_answer_fallback(lang: Language) -> &'static str {
    match lang {
        Language::En => "I'm sorry, I couldn't generate a response.",
        Language::Es => "Lo siento, no pude generar una respuesta.",
        Language::Fr => "Je suis désolé, je n'ai pas pu générer de réponse.",
    }
}

/// Answer used when the retry ceiling is exhausted on rate limits.
fn degraded_message(lang: Language) -> &'static str {
    match lang {
        Language::En => {
            "I found a lot of results for you! The data was quite extensive. Would you \
             like me to focus on a specific aspect - like the top 3 cheapest options, or \
             hotels with the best ratings? This will help me give you more detailed \
             information."
        }
        Language::Es => {
            "¡Encontré muchos resultados para ti! Los datos eran muy extensos. ¿Quieres \
             que me concentre en un aspecto específico, como las 3 opciones más baratas \
             o los hoteles mejor valorados? Así podré darte información más detallada."
        }
        Language::Fr => {
            "J'ai trouvé beaucoup de résultats pour vous ! Les données étaient très \
             volumineuses. Souhaitez-vous que je me concentre sur un aspect précis, \
             comme les 3 options les moins chères ou les hôtels les mieux notés ? Cela \
             me permettra de vous donner des informations plus détaillées."
        }
    }
}

/// Answer used when a turn fails with an unhandled error.
fn trouble_message(lang: Language) -> &'static str {
    match lang {
        Language::En => {
            "I'm having trouble processing your request right now. Please try again later."
        }
        Language::Es => {
            "Tengo problemas para procesar tu solicitud en este momento. Por favor, \
             inténtalo de nuevo más tarde."
        }
        Language::Fr => {
            "Je rencontre des difficultés pour traiter votre demande en ce moment. \
             Veuillez réessayer plus tard."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{FinishReason, LlmResponse, ToolSpec};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use storage::{MemoryStore, Role, ToolCallRequest};

    struct ScriptedBackend {
        script: Mutex<VecDeque<Result<LlmResponse>>>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Result<LlmResponse>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
            }
        }
    }

    impl LlmBackend for ScriptedBackend {
        async fn chat(&self, _request: LlmRequest<'_>) -> Result<LlmResponse> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .expect("script exhausted")
        }
    }

    struct RecordingTools {
        specs: Vec<ToolSpec>,
        calls: Mutex<Vec<(String, Value)>>,
        result: String,
    }

    impl RecordingTools {
        fn new(result: &str) -> Self {
            Self {
                specs: vec![ToolSpec {
                    name: "search_hotels".into(),
                    description: "Search hotels".into(),
                    parameters: json!({ "type": "object" }),
                }],
                calls: Mutex::new(Vec::new()),
                result: result.to_string(),
            }
        }
    }

    impl ToolHost for RecordingTools {
        fn specs(&self) -> &[ToolSpec] {
            &self.specs
        }

        async fn execute(&self, name: &str, arguments: &Value) -> Result<String> {
            if name != "search_hotels" {
                return Err(Error::ToolNotFound(name.to_string()));
            }
            self.calls
                .lock()
                .unwrap()
                .push((name.to_string(), arguments.clone()));
            Ok(self.result.clone())
        }
    }

    fn text_response(content: &str) -> Result<LlmResponse> {
        Ok(LlmResponse {
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
        })
    }

    fn tool_response(name: &str, arguments: Value) -> Result<LlmResponse> {
        Ok(LlmResponse {
            content: None,
            tool_calls: vec![ToolCallRequest {
                id: "call_1".into(),
                name: name.into(),
                arguments,
            }],
            finish_reason: FinishReason::ToolCalls,
        })
    }

    fn rate_limit() -> Result<LlmResponse> {
        Err(Error::Api {
            status: Some(429),
            message: "rate limit exceeded".into(),
        })
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            backoff: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn plain_answer_is_sanitized_and_persisted() {
        let backend = ScriptedBackend::new(vec![text_response("**Paris** is great")]);
        let store = Arc::new(MemoryStore::new());
        let agent = Agent::new(backend, RecordingTools::new("{}"), store.clone());

        let answer = agent.process_message("conn-1", "tell me about Paris").await;
        assert_eq!(answer, "Paris is great");

        let context = store.get_or_create_context("conn-1").unwrap();
        assert_eq!(context.messages.len(), 2);
        assert_eq!(context.messages[0].role, Role::User);
        assert_eq!(context.messages[1].content, "Paris is great");
    }

    #[tokio::test]
    async fn tool_round_executes_and_feeds_back() {
        let backend = ScriptedBackend::new(vec![
            tool_response("search_hotels", json!({ "location": "Paris" })),
            text_response("Found 3 hotels"),
        ]);
        let tools = RecordingTools::new(r#"{"hotels": []}"#);
        let store = Arc::new(MemoryStore::new());
        let agent = Agent::new(backend, tools, store.clone());

        let answer = agent.process_message("conn-1", "hotels in Paris?").await;
        assert_eq!(answer, "Found 3 hotels");

        let calls = agent.tools.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, json!({ "location": "Paris" }));

        // Tool rounds are in-flight only, never persisted.
        let context = store.get_or_create_context("conn-1").unwrap();
        assert!(context.messages.iter().all(|m| m.role != Role::Tool));
        assert_eq!(context.messages.len(), 2);
    }

    #[tokio::test]
    async fn unknown_tool_injects_placeholder_and_continues() {
        let backend = ScriptedBackend::new(vec![
            tool_response("search_trains", json!({})),
            text_response("No train data available"),
        ]);
        let agent = Agent::new(
            backend,
            RecordingTools::new("{}"),
            Arc::new(MemoryStore::new()),
        );

        let answer = agent.process_message("conn-1", "trains to Lyon").await;
        assert_eq!(answer, "No train data available");
    }

    #[tokio::test]
    async fn rate_limit_retries_then_succeeds() {
        let backend = ScriptedBackend::new(vec![rate_limit(), text_response("Here you go")]);
        let agent = Agent::new(
            backend,
            RecordingTools::new("{}"),
            Arc::new(MemoryStore::new()),
        )
        .with_retry_policy(fast_retry());

        let answer = agent.process_message("conn-1", "hello").await;
        assert_eq!(answer, "Here you go");
    }

    #[tokio::test]
    async fn rate_limit_exhaustion_degrades_gracefully() {
        let backend = ScriptedBackend::new(vec![rate_limit(), rate_limit(), rate_limit()]);
        let agent = Agent::new(
            backend,
            RecordingTools::new("{}"),
            Arc::new(MemoryStore::new()),
        )
        .with_retry_policy(fast_retry());

        let answer = agent.process_message("conn-1", "hello").await;
        assert!(answer.contains("I found a lot of results"));
    }

    #[tokio::test]
    async fn non_rate_limit_error_becomes_localized_apology() {
        let backend = ScriptedBackend::new(vec![Err(Error::Api {
            status: Some(500),
            message: "internal".into(),
        })]);
        let agent = Agent::new(
            backend,
            RecordingTools::new("{}"),
            Arc::new(MemoryStore::new()),
        );

        let answer = agent.process_message("conn-1", "Hola, necesito ayuda").await;
        assert!(answer.starts_with("Tengo problemas"));
    }

    #[tokio::test]
    async fn empty_model_answer_gets_fallback() {
        let backend = ScriptedBackend::new(vec![Ok(LlmResponse::default())]);
        let agent = Agent::new(
            backend,
            RecordingTools::new("{}"),
            Arc::new(MemoryStore::new()),
        );

        let answer = agent.process_message("conn-1", "hello").await;
        assert_eq!(answer, "I'm sorry, I couldn't generate a response.");
    }

    #[tokio::test]
    async fn tool_error_payload_is_rewritten_for_the_model() {
        let small_error = r#"{"error": "bad airport code"}"#.to_string();
        let rewritten = finalize_tool_result(small_error, "search_flights");
        assert!(rewritten.starts_with("Error from search_flights:"));
        assert!(rewritten.contains("bad airport code"));

        // Truncation runs before error detection, so an error field that
        // survives summarization is still rewritten.
        let flights: Vec<Value> = (0..12)
            .map(|i| json!({ "price": 400 + i, "pad": "p".repeat(600) }))
            .collect();
        let oversized = serde_json::to_string(&json!({
            "error": "invalid date",
            "flights": flights,
        }))
        .unwrap();
        let rewritten = finalize_tool_result(oversized, "search_flights");
        assert!(rewritten.starts_with("Error from search_flights:"));

        assert_eq!(
            finalize_tool_result(String::new(), "search_hotels"),
            "Tool executed successfully but returned no content"
        );
    }

    #[test]
    fn rate_limit_detection_covers_status_and_markers() {
        let policy = RetryPolicy::default();
        assert!(policy.is_rate_limit(&Error::Api {
            status: Some(429),
            message: String::new(),
        }));
        assert!(policy.is_rate_limit(&Error::Api {
            status: None,
            message: "token budget exceeded".into(),
        }));
        assert!(!policy.is_rate_limit(&Error::Api {
            status: Some(500),
            message: "internal".into(),
        }));
        assert!(!policy.is_rate_limit(&Error::Config("x".into())));
    }
}
