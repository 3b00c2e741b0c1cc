//! Agent Loop
//!
//! The conversation / tool-calling state machine:
//!
//! ```text
//! Idle -> AwaitingCompletion -> FinalAnswer
//!                ^      |
//!                |      v
//!          AwaitingToolResults
//! ```
//!
//! Each turn sends the full log to the backend with the registered tools
//! advertised. Tool calls are run concurrently through the [`Executor`] and
//! their results appended in request order; the loop ends when the backend
//! answers with plain text.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::config::{AgentConfig, ToolFailurePolicy};
use crate::error::{AgentError, Result};
use crate::executor::{Executor, Task, TaskId, TaskStatus, TokioExecutor};
use crate::message::{Conversation, META_TOOL_CALLS, Message};
use crate::provider::{CompletionRequest, LlmProvider, ProviderToolCall};
use crate::registry::ToolRegistry;
use crate::tool::{Tool, ToolCallRequest, stringify_result};

/// Where the agent is within a run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    AwaitingCompletion,
    AwaitingToolResults,
    FinalAnswer,
}

/// The capability surface of a conversational agent
#[async_trait]
pub trait ConversationalAgent: Send {
    /// Submit user input and drive the conversation to a final answer
    async fn run(&mut self, input: &str) -> Result<String>;

    /// Append a message to the conversation log
    fn add_message(&mut self, message: Message);

    /// The conversation log, in order
    fn messages(&self) -> &[Message];
}

/// The main Agent struct
pub struct Agent {
    config: AgentConfig,
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    executor: Arc<dyn Executor>,
    conversation: Conversation,
    state: AgentState,
    span: tracing::Span,
}

impl Agent {
    /// Create a new agent with an unbounded tokio executor
    pub fn new(
        config: AgentConfig,
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let span = tracing::info_span!("agent", model = %config.model);
        Ok(Self {
            config,
            provider,
            tools,
            executor: Arc::new(TokioExecutor::new()),
            conversation: Conversation::new(),
            state: AgentState::Idle,
            span,
        })
    }

    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    #[must_use]
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// Run the agent on one user utterance.
    ///
    /// Backend failures end the run with an error; tool failures are reported
    /// to the model as tool messages unless the config asks to abort.
    ///
    /// There is no rollback: if this future is dropped part way, every message
    /// appended so far stays in the log, and tool work already spawned may
    /// still finish in the background. Callers wanting a deadline should wrap
    /// the call in `tokio::time::timeout` and decide what to do with the log.
    /// Concurrent runs on one agent need external serialization, which
    /// `&mut self` already enforces.
    pub async fn run(&mut self, input: &str) -> Result<String> {
        self.transition(AgentState::Idle);
        self.conversation.push(Message::user(input));

        let mut iterations = 0;
        loop {
            if iterations >= self.config.max_iterations {
                tracing::warn!(parent: &self.span, iterations, "Iteration limit reached");
                self.transition(AgentState::Idle);
                return Err(AgentError::MaxIterations(self.config.max_iterations));
            }
            iterations += 1;

            self.transition(AgentState::AwaitingCompletion);
            let request = self.build_request();
            let completion = match self.provider.complete(&request).await {
                Ok(completion) => completion,
                Err(e) => {
                    tracing::error!(
                        parent: &self.span,
                        provider = self.provider.name(),
                        retryable = e.is_retryable(),
                        error = %e,
                        "Completion request failed"
                    );
                    self.transition(AgentState::Idle);
                    return Err(e);
                }
            };

            if completion.has_tool_calls() {
                self.transition(AgentState::AwaitingToolResults);
                if let Err(e) = self.handle_tool_calls(completion.tool_calls).await {
                    self.transition(AgentState::Idle);
                    return Err(e);
                }
                continue;
            }

            let answer = completion.content.unwrap_or_default();
            self.conversation.push(Message::assistant(answer.clone()));
            self.transition(AgentState::FinalAnswer);
            return Ok(answer);
        }
    }

    /// Blocking form of [`Agent::run`]. Must not be called from inside an
    /// async context.
    pub fn run_blocking(&mut self, input: &str) -> Result<String> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.run(input))
    }

    /// Append a message to the conversation log
    pub fn add_message(&mut self, message: Message) {
        self.conversation.push(message);
    }

    /// Drop the conversation and return to idle
    pub fn reset(&mut self) {
        self.conversation.clear();
        self.state = AgentState::Idle;
    }

    pub fn messages(&self) -> &[Message] {
        self.conversation.messages()
    }

    pub const fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub const fn state(&self) -> AgentState {
        self.state
    }

    /// Get the tool registry
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Get configuration
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn transition(&mut self, next: AgentState) {
        if self.state != next {
            tracing::debug!(parent: &self.span, from = ?self.state, to = ?next, "Agent state");
            self.state = next;
        }
    }

    fn build_request(&self) -> CompletionRequest {
        let schemas = self.tools.schemas();
        CompletionRequest {
            model: self.config.model.clone(),
            messages: self
                .conversation
                .to_chat_messages(self.config.system_prompt.as_deref()),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            tools: (!schemas.is_empty()).then_some(schemas),
        }
    }

    async fn handle_tool_calls(&mut self, mut calls: Vec<ProviderToolCall>) -> Result<()> {
        for call in &mut calls {
            if call.id.is_empty() {
                call.id = format!("call_{}", uuid::Uuid::new_v4().simple());
            }
        }

        let recorded: Vec<Value> = calls
            .iter()
            .map(|c| json!({ "id": c.id, "name": c.name, "arguments": c.arguments }))
            .collect();
        self.conversation
            .push(Message::assistant("").with_metadata(META_TOOL_CALLS, Value::Array(recorded)));

        let tasks = calls.iter().map(|call| self.tool_task(call)).collect();
        let finished = self.executor.run_batch(tasks).await;

        let mut abort = None;
        for (call, task) in calls.iter().zip(finished) {
            let content = tool_message_content(call, &task);
            tracing::debug!(
                parent: &self.span,
                tool = %call.name,
                call_id = %call.id,
                status = ?task.status(),
                "Tool call finished"
            );
            self.conversation
                .push(Message::tool(content, call.id.clone(), call.name.clone()));

            if task.status() == TaskStatus::Failed
                && self.config.tool_failure_policy == ToolFailurePolicy::Abort
                && abort.is_none()
            {
                abort = Some(task_error(call, &task));
            }
        }

        abort.map_or(Ok(()), Err)
    }

    fn tool_task(&self, call: &ProviderToolCall) -> Task {
        let registry = Arc::clone(&self.tools);
        let (id, name, raw_arguments) = (call.id.clone(), call.name.clone(), call.arguments.clone());

        Task::future(format!("tool:{}", call.name), move |_| async move {
            // An unknown name is reported as such whatever its arguments
            let tool = registry.lookup(&name)?;
            let request = ToolCallRequest::parse(id, name, &raw_arguments)?;
            tool.validate(&request.arguments)?;
            let value = tool.invoke(request.arguments).await?;
            Ok::<_, anyhow::Error>(value)
        })
        .with_id(TaskId::from_string(call.id.clone()))
    }
}

fn as_agent_error(task: &Task) -> Option<&AgentError> {
    task.failure().and_then(|f| f.downcast_ref::<AgentError>())
}

/// Text of the tool message for a finished tool task
fn tool_message_content(call: &ProviderToolCall, task: &Task) -> String {
    match task.status() {
        TaskStatus::Completed => task.result().map(stringify_result).unwrap_or_default(),
        _ => match as_agent_error(task) {
            Some(e @ AgentError::ToolNotFound(_)) => format!("Error: {e}"),
            _ => format!(
                "Error executing {}: {}",
                call.name,
                task.error().unwrap_or("unknown error")
            ),
        },
    }
}

/// Error a failed tool task ends the run with under the abort policy
fn task_error(call: &ProviderToolCall, task: &Task) -> AgentError {
    match as_agent_error(task) {
        Some(AgentError::ToolNotFound(name)) => AgentError::ToolNotFound(name.clone()),
        _ => AgentError::ToolExecution(format!(
            "{} failed: {}",
            call.name,
            task.error().unwrap_or("unknown error")
        )),
    }
}

#[async_trait]
impl ConversationalAgent for Agent {
    async fn run(&mut self, input: &str) -> Result<String> {
        Self::run(self, input).await
    }

    fn add_message(&mut self, message: Message) {
        Self::add_message(self, message);
    }

    fn messages(&self) -> &[Message] {
        Self::messages(self)
    }
}

/// Builder for Agent configuration
pub struct AgentBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    registry: Option<Arc<ToolRegistry>>,
    pending_tools: Vec<Arc<dyn Tool>>,
    executor: Option<Arc<dyn Executor>>,
    max_concurrency: Option<usize>,
    span: Option<tracing::Span>,
    config: AgentConfig,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            registry: None,
            pending_tools: Vec::new(),
            executor: None,
            max_concurrency: None,
            span: None,
            config: AgentConfig::default(),
        }
    }

    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Use a shared registry
    #[must_use]
    pub fn registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Register a tool when the agent is built
    #[must_use]
    pub fn tool<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.pending_tools.push(Arc::new(tool));
        self
    }

    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Cap concurrent tool executions; ignored when an executor is supplied
    #[must_use]
    pub const fn max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max);
        self
    }

    #[must_use]
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    #[must_use]
    pub const fn temperature(mut self, temp: f32) -> Self {
        self.config.temperature = temp;
        self
    }

    #[must_use]
    pub const fn max_tokens(mut self, max: u32) -> Self {
        self.config.max_tokens = Some(max);
        self
    }

    #[must_use]
    pub const fn max_iterations(mut self, max: usize) -> Self {
        self.config.max_iterations = max;
        self
    }

    #[must_use]
    pub const fn tool_failure_policy(mut self, policy: ToolFailurePolicy) -> Self {
        self.config.tool_failure_policy = policy;
        self
    }

    #[must_use]
    pub fn span(mut self, span: tracing::Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn build(self) -> Result<Agent> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;

        let registry = self.registry.unwrap_or_default();
        for tool in self.pending_tools {
            registry.register_arc(tool)?;
        }

        let executor = self.executor.unwrap_or_else(|| match self.max_concurrency {
            Some(max) => Arc::new(TokioExecutor::with_max_concurrency(max)),
            None => Arc::new(TokioExecutor::new()),
        });

        let mut agent = Agent::new(self.config, provider, registry)?.with_executor(executor);
        if let Some(span) = self.span {
            agent = agent.with_span(span);
        }
        Ok(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::mock::MockProvider;
    use crate::tool::{FnTool, ParamType, ToolParameter};

    fn weather_tool() -> FnTool {
        FnTool::builder("get_weather")
            .description("Current weather for a city")
            .param(ToolParameter::required("city", ParamType::Text, "City name"))
            .build_sync(|args| {
                let city = args["city"].as_str().unwrap_or("somewhere");
                Ok::<_, anyhow::Error>(format!("Sunny in {city}"))
            })
    }

    #[tokio::test]
    async fn test_request_shape() {
        let provider = Arc::new(MockProvider::new().then_text("ok"));
        let mut agent = Agent::builder()
            .provider(provider.clone())
            .tool(weather_tool())
            .model("qwen3:4b")
            .system_prompt("Be brief.")
            .temperature(0.3)
            .max_tokens(256)
            .build()
            .unwrap();

        agent.run("hi").await.unwrap();

        let request = &provider.requests()[0];
        assert_eq!(request.model, "qwen3:4b");
        assert_eq!(request.max_tokens, Some(256));
        assert!((request.temperature - 0.3).abs() < f32::EPSILON);
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[0].content, "Be brief.");
        assert_eq!(request.messages[1].content, "hi");
        let tools = request.tools.as_ref().unwrap();
        assert_eq!(tools[0].name, "get_weather");
        assert_eq!(tools[0].parameters["required"], json!(["city"]));
    }

    #[tokio::test]
    async fn test_no_tools_advertised_when_registry_empty() {
        let provider = Arc::new(MockProvider::new().then_text("ok"));
        let mut agent = Agent::builder().provider(provider.clone()).build().unwrap();
        agent.run("hi").await.unwrap();
        assert!(provider.requests()[0].tools.is_none());
        assert_eq!(agent.state(), AgentState::FinalAnswer);
    }

    #[tokio::test]
    async fn test_empty_content_is_final_answer() {
        let provider = Arc::new(MockProvider::new().then(crate::provider::Completion::default()));
        let mut agent = Agent::builder().provider(provider).build().unwrap();
        assert_eq!(agent.run("hi").await.unwrap(), "");
        assert_eq!(agent.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_backend_error_propagates() {
        let provider = Arc::new(
            MockProvider::new().then_error(AgentError::RateLimited("quota exceeded".into())),
        );
        let mut agent = Agent::builder().provider(provider).build().unwrap();

        let err = agent.run("hi").await.unwrap_err();
        assert!(err.is_backend());
        assert!(err.is_retryable());
        assert_eq!(agent.messages().len(), 1);
        assert_eq!(agent.state(), AgentState::Idle);
    }

    #[tokio::test]
    async fn test_max_iterations() {
        let provider = Arc::new(
            MockProvider::new()
                .then_tool_call("1", "get_weather", r#"{"city":"Rome"}"#)
                .then_tool_call("2", "get_weather", r#"{"city":"Rome"}"#),
        );
        let mut agent = Agent::builder()
            .provider(provider)
            .tool(weather_tool())
            .max_iterations(2)
            .build()
            .unwrap();

        assert!(matches!(agent.run("loop").await, Err(AgentError::MaxIterations(2))));
    }

    #[tokio::test]
    async fn test_abort_policy_stops_run() {
        let provider = Arc::new(
            MockProvider::new()
                .then_tool_call("1", "get_weather", "{}")
                .then_text("never reached"),
        );
        let mut agent = Agent::builder()
            .provider(provider.clone())
            .tool(weather_tool())
            .tool_failure_policy(ToolFailurePolicy::Abort)
            .build()
            .unwrap();

        let err = agent.run("weather?").await.unwrap_err();
        assert!(matches!(err, AgentError::ToolExecution(ref msg) if msg.starts_with("get_weather failed")));
        // user, tool-call marker, tool result
        assert_eq!(agent.messages().len(), 3);
        assert_eq!(provider.remaining(), 1);
    }

    #[tokio::test]
    async fn test_invalid_arguments_reported() {
        let provider = Arc::new(
            MockProvider::new()
                .then_tool_call("1", "get_weather", "{city: Rome")
                .then_text("sorry"),
        );
        let mut agent = Agent::builder()
            .provider(provider)
            .tool(weather_tool())
            .build()
            .unwrap();

        agent.run("weather?").await.unwrap();
        let tool_msg = &agent.messages()[2];
        assert!(tool_msg.content.starts_with("Error executing get_weather: "));
        assert!(tool_msg.content.contains("invalid arguments"));
    }

    #[tokio::test]
    async fn test_missing_call_id_is_generated() {
        let provider = Arc::new(
            MockProvider::new()
                .then_tool_call("", "get_weather", r#"{"city":"Lima"}"#)
                .then_text("done"),
        );
        let mut agent = Agent::builder()
            .provider(provider)
            .tool(weather_tool())
            .build()
            .unwrap();

        agent.run("weather?").await.unwrap();
        let id = agent.messages()[2].tool_call_id().unwrap().to_string();
        assert!(id.starts_with("call_"));
        assert_eq!(agent.messages()[1].tool_calls().unwrap()[0]["id"], json!(id));
    }

    #[test]
    fn test_builder_requires_provider() {
        assert!(matches!(Agent::builder().build(), Err(AgentError::Config(_))));
        let provider = Arc::new(MockProvider::new());
        assert!(Agent::builder().provider(provider).model("").build().is_err());
    }

    #[test]
    fn test_run_blocking() {
        let provider = Arc::new(
            MockProvider::new()
                .then_tool_call("1", "get_weather", r#"{"city":"Kyiv"}"#)
                .then_text("Sunny."),
        );
        let mut agent = Agent::builder()
            .provider(provider)
            .tool(weather_tool())
            .build()
            .unwrap();

        assert_eq!(agent.run_blocking("weather?").unwrap(), "Sunny.");
        assert_eq!(agent.messages()[2].content, "Sunny in Kyiv");
    }

    #[tokio::test]
    async fn test_reset_and_capability_trait() {
        let provider = Arc::new(MockProvider::new().then_text("one").then_text("two"));
        let mut agent = Agent::builder().provider(provider).build().unwrap();

        {
            let dyn_agent: &mut dyn ConversationalAgent = &mut agent;
            dyn_agent.add_message(Message::assistant("earlier note"));
            assert_eq!(dyn_agent.run("first").await.unwrap(), "one");
            assert_eq!(dyn_agent.messages().len(), 3);
        }

        agent.reset();
        assert!(agent.messages().is_empty());
        assert_eq!(agent.run("second").await.unwrap(), "two");
    }
}
