//! Ollama LLM Provider
//!
//! Implementation of `LlmProvider` for local Ollama inference over its HTTP
//! API, using native tool calling on `/api/chat`.

use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    message::ChatMessage,
    provider::{
        Completion, CompletionRequest, FinishReason, LlmProvider, ModelInfo, ProviderToolCall,
        TokenUsage,
    },
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

/// Ollama provider configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OllamaConfig {
    /// Ollama host URL
    pub host: String,

    /// Ollama port
    pub port: u16,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
            timeout_secs: 120,
        }
    }
}

impl OllamaConfig {
    /// Base URL of the API, without trailing slash
    pub fn base_url(&self) -> String {
        format!("{}:{}", self.host.trim_end_matches('/'), self.port)
    }
}

/// Ollama LLM provider
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaProvider {
    /// Create a new Ollama provider with custom host/port
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        Self::from_config(&OllamaConfig {
            host: host.into(),
            port,
            ..Default::default()
        })
    }

    /// Create from configuration
    pub fn from_config(config: &OllamaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("HTTP client: {e}")))?;
        Ok(Self::with_client(client, config.base_url()))
    }

    /// Create with default localhost settings
    pub fn localhost() -> Result<Self> {
        Self::from_config(&OllamaConfig::default())
    }

    /// Use a preconfigured client against an explicit base URL
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn chat_body(request: &CompletionRequest) -> Value {
        let mut options = json!({ "temperature": request.temperature });
        if let Some(max) = request.max_tokens {
            options["num_predict"] = json!(max);
        }

        let mut body = json!({
            "model": request.model,
            "messages": request.messages.iter().map(Self::wire_message).collect::<Vec<_>>(),
            "stream": false,
            "options": options,
        });
        if let Some(tools) = &request.tools {
            body["tools"] = tools.iter().map(|t| t.function_spec()).collect();
        }
        body
    }

    fn wire_message(message: &ChatMessage) -> Value {
        json!({ "role": message.role.to_string(), "content": message.content })
    }

    fn convert_completion(response: ChatResponse, model: &str) -> Completion {
        let tool_calls: Vec<ProviderToolCall> = response
            .message
            .tool_calls
            .into_iter()
            .map(|call| ProviderToolCall {
                id: call
                    .id
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
                arguments: match call.function.arguments {
                    Value::String(text) => text,
                    Value::Null => String::new(),
                    other => other.to_string(),
                },
                name: call.function.name,
            })
            .collect();

        let finish_reason = if tool_calls.is_empty() {
            match response.done_reason.as_deref() {
                Some("length") => FinishReason::Length,
                _ => FinishReason::Stop,
            }
        } else {
            FinishReason::ToolUse
        };

        let usage = match (response.prompt_eval_count, response.eval_count) {
            (None, None) => None,
            (prompt, completion) => {
                let prompt = prompt.unwrap_or(0);
                let completion = completion.unwrap_or(0);
                Some(TokenUsage {
                    prompt_tokens: prompt,
                    completion_tokens: completion,
                    total_tokens: prompt.saturating_add(completion),
                })
            }
        };

        Completion {
            content: Some(response.message.content).filter(|c| !c.is_empty()),
            tool_calls,
            model: response.model.unwrap_or_else(|| model.to_string()),
            usage,
            finish_reason: Some(finish_reason),
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }
}

/// Map a non-success HTTP status onto the backend error family
fn status_error(status: reqwest::StatusCode, body: &str) -> AgentError {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    let message = format!("HTTP {}: {detail}", status.as_u16());

    match status.as_u16() {
        429 => AgentError::RateLimited(message),
        401 | 403 => AgentError::Auth(message),
        500..=599 => AgentError::ProviderUnavailable(message),
        _ => AgentError::Provider(message),
    }
}

/// Map a transport failure onto the backend error family
fn transport_error(err: &reqwest::Error) -> AgentError {
    if err.is_timeout() {
        AgentError::Timeout(err.to_string())
    } else if err.is_connect() {
        AgentError::ProviderUnavailable(err.to_string())
    } else {
        AgentError::Provider(err.to_string())
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let url = format!("{}/api/chat", self.base_url);
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.as_ref().map_or(0, Vec::len),
            "Sending chat request"
        );

        let response = self
            .client
            .post(&url)
            .json(&Self::chat_body(request))
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        let response = Self::check_status(response).await?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Provider(format!("Malformed chat response: {e}")))?;

        Ok(Self::convert_completion(parsed, &request.model))
    }

    async fn health_check(&self) -> Result<bool> {
        match self.list_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("Ollama health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        let response = Self::check_status(response).await?;

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Provider(format!("Malformed tags response: {e}")))?;

        Ok(tags
            .models
            .into_iter()
            .map(|m| ModelInfo {
                id: m.name.clone(),
                name: m.name,
                context_length: None, // Not exposed by /api/tags
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    message: WireMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::message::Role;
    use agent_core::tool::ToolSchema;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "llama3.2".into(),
            messages: vec![
                ChatMessage::new(Role::System, "Be brief."),
                ChatMessage::new(Role::User, "weather?"),
            ],
            temperature: 0.1,
            max_tokens: Some(64),
            tools: Some(vec![ToolSchema {
                name: "get_weather".into(),
                description: "Weather lookup".into(),
                parameters: json!({"type": "object", "properties": {}, "required": []}),
            }]),
        }
    }

    fn provider(server: &MockServer) -> OllamaProvider {
        OllamaProvider::with_client(reqwest::Client::new(), server.uri())
    }

    #[test]
    fn test_config_defaults() {
        let config = OllamaConfig::default();
        assert_eq!(config.base_url(), "http://localhost:11434");
        assert_eq!(config.timeout_secs, 120);
    }

    #[test]
    fn test_chat_body() {
        let body = OllamaProvider::chat_body(&request());
        assert_eq!(body["stream"], json!(false));
        assert_eq!(body["options"]["num_predict"], json!(64));
        assert_eq!(body["messages"][0], json!({"role": "system", "content": "Be brief."}));
        assert_eq!(body["tools"][0]["function"]["name"], json!("get_weather"));
    }

    #[tokio::test]
    async fn test_text_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({"model": "llama3.2", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "llama3.2",
                "message": {"role": "assistant", "content": "It is sunny."},
                "done": true,
                "done_reason": "stop",
                "prompt_eval_count": 12,
                "eval_count": 4
            })))
            .mount(&server)
            .await;

        let completion = provider(&server).complete(&request()).await.unwrap();
        assert_eq!(completion.content.as_deref(), Some("It is sunny."));
        assert!(!completion.has_tool_calls());
        assert_eq!(completion.usage.unwrap().total_tokens, 16);
        assert_eq!(completion.finish_reason, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn test_tool_call_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {
                    "role": "assistant",
                    "content": "",
                    "tool_calls": [
                        {"function": {"name": "get_weather", "arguments": {"city": "Paris"}}}
                    ]
                },
                "done": true
            })))
            .mount(&server)
            .await;

        let completion = provider(&server).complete(&request()).await.unwrap();
        assert!(completion.content.is_none());
        assert_eq!(completion.model, "llama3.2");
        let call = &completion.tool_calls[0];
        assert_eq!(call.name, "get_weather");
        assert!(call.id.starts_with("call_"));
        let args: Value = serde_json::from_str(&call.arguments).unwrap();
        assert_eq!(args, json!({"city": "Paris"}));
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let cases = [
            (429, "rate"),
            (401, "auth"),
            (503, "unavailable"),
            (404, "provider"),
        ];
        for (status, kind) in cases {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/api/chat"))
                .respond_with(
                    ResponseTemplate::new(status).set_body_json(json!({"error": "nope"})),
                )
                .mount(&server)
                .await;

            let err = provider(&server).complete(&request()).await.unwrap_err();
            let matched = match kind {
                "rate" => matches!(err, AgentError::RateLimited(_)),
                "auth" => matches!(err, AgentError::Auth(_)),
                "unavailable" => matches!(err, AgentError::ProviderUnavailable(_)),
                _ => matches!(err, AgentError::Provider(_)),
            };
            assert!(matched, "status {status} mapped to {err:?}");
            assert!(err.to_string().contains("nope"));
        }
    }

    #[tokio::test]
    async fn test_unreachable_host_is_unavailable() {
        // Nothing listens on the discard port
        let provider = OllamaProvider::with_client(reqwest::Client::new(), "http://127.0.0.1:9");
        let err = provider.complete(&request()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!provider.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn test_list_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [{"name": "llama3.2:latest"}, {"name": "qwen3:4b"}]
            })))
            .mount(&server)
            .await;

        let provider = provider(&server);
        let models = provider.list_models().await.unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[1].id, "qwen3:4b");
        assert!(provider.health_check().await.unwrap());
    }
}
