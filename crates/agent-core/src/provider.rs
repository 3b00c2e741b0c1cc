//! LLM Provider Strategy Pattern
//!
//! Defines a common interface for all completion backends (Ollama, OpenAI,
//! Anthropic, etc.) allowing the agent to work with any backend without code
//! changes. Retries and fallback routing belong here, behind the trait, never
//! in the agent loop.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::provider::{CompletionRequest, LlmProvider};
//!
//! let provider = OllamaProvider::from_env();
//! let completion = provider.complete(&request).await?;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::message::ChatMessage;
use crate::tool::ToolSchema;

/// A completion request for the next conversational turn
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model identifier (e.g., "llama3.2", "gpt-4o-mini")
    pub model: String,

    /// Full message history, system directive first when configured
    pub messages: Vec<ChatMessage>,

    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Tools the model may call; `None` when nothing is registered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSchema>>,
}

/// A tool invocation requested by the backend. Arguments stay raw text until
/// the agent parses them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Response from an LLM completion
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Completion {
    /// The generated text, if any
    pub content: Option<String>,

    /// Requested tool invocations, in the order the backend issued them
    #[serde(default)]
    pub tool_calls: Vec<ProviderToolCall>,

    /// Model that generated this response
    pub model: String,

    /// Token usage statistics (if available)
    pub usage: Option<TokenUsage>,

    /// Finish reason
    pub finish_reason: Option<FinishReason>,
}

impl Completion {
    /// Plain text answer
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            finish_reason: Some(FinishReason::Stop),
            ..Default::default()
        }
    }

    /// Answer requesting tool calls
    pub fn tool_calls(calls: Vec<ProviderToolCall>) -> Self {
        Self {
            tool_calls: calls,
            finish_reason: Some(FinishReason::ToolUse),
            ..Default::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Token usage statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Reason for completion finishing
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolUse,
    ContentFilter,
    Error,
}

/// Information about a model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub context_length: Option<u32>,
}

/// Strategy trait for LLM providers
///
/// Implement this trait to add support for new completion backends.
/// The agent works exclusively through this interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Generate a completion
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;

    /// Blocking form of [`LlmProvider::complete`]. Drives the request on a
    /// private current-thread runtime, so it must not be called from inside
    /// an async context.
    fn complete_blocking(&self, request: &CompletionRequest) -> Result<Completion> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.complete(request))
    }

    /// Check if the provider is available and configured correctly
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    /// List available models
    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(Vec::new())
    }
}

/// Provider selection strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProviderStrategy {
    /// Use the first provider only
    #[default]
    Single,

    /// Try the next provider when one fails with a retryable error
    Failover,

    /// Round-robin load balancing
    RoundRobin,
}

/// Multi-provider wrapper; itself an [`LlmProvider`]
pub struct ProviderChain {
    providers: Vec<Arc<dyn LlmProvider>>,
    strategy: ProviderStrategy,
    current_index: AtomicUsize,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn LlmProvider>>, strategy: ProviderStrategy) -> Self {
        Self {
            providers,
            strategy,
            current_index: AtomicUsize::new(0),
        }
    }

    /// Get the next provider based on strategy
    pub fn next_provider(&self) -> Option<&Arc<dyn LlmProvider>> {
        if self.providers.is_empty() {
            return None;
        }

        let idx = match self.strategy {
            ProviderStrategy::Single => 0,
            ProviderStrategy::RoundRobin => self.current_index.fetch_add(1, Ordering::SeqCst),
            ProviderStrategy::Failover => self.current_index.load(Ordering::SeqCst),
        };
        self.providers.get(idx % self.providers.len())
    }

    /// Advance to next provider (for failover)
    pub fn advance(&self) {
        self.current_index.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmProvider for ProviderChain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let attempts = match self.strategy {
            ProviderStrategy::Failover => self.providers.len(),
            ProviderStrategy::Single | ProviderStrategy::RoundRobin => 1,
        };

        let mut last_error = None;
        for _ in 0..attempts {
            let provider = self
                .next_provider()
                .ok_or_else(|| AgentError::Config("Provider chain is empty".into()))?;

            match provider.complete(request).await {
                Ok(completion) => return Ok(completion),
                Err(e) if e.is_retryable() && self.strategy == ProviderStrategy::Failover => {
                    tracing::warn!(provider = provider.name(), error = %e, "Provider failed, failing over");
                    self.advance();
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| AgentError::Config("Provider chain is empty".into())))
    }

    async fn health_check(&self) -> Result<bool> {
        for provider in &self.providers {
            if provider.health_check().await? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
