//! Agent Configuration

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

/// What a run does when a tool call fails
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailurePolicy {
    /// Report the failure to the model as a tool message and keep going
    #[default]
    Recover,
    /// Record the turn's tool messages, then end the run with the failure
    Abort,
}

/// Per-agent configuration. Immutable once the agent is built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Model identifier passed to the backend
    pub model: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Maximum tokens to generate per completion
    pub max_tokens: Option<u32>,

    /// System directive prepended to every request
    pub system_prompt: Option<String>,

    /// Maximum completion requests per run
    pub max_iterations: usize,

    pub tool_failure_policy: ToolFailurePolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "llama3.2".into(),
            temperature: 0.1,
            max_tokens: None,
            system_prompt: None,
            max_iterations: 10,
            tool_failure_policy: ToolFailurePolicy::Recover,
        }
    }
}

impl AgentConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    #[must_use]
    pub const fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    #[must_use]
    pub const fn with_tool_failure_policy(mut self, policy: ToolFailurePolicy) -> Self {
        self.tool_failure_policy = policy;
        self
    }

    /// Check invariants
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(AgentError::Config("model must not be empty".into()));
        }
        if self.max_iterations == 0 {
            return Err(AgentError::Config("max_iterations must be at least 1".into()));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(AgentError::Config(format!(
                "temperature must be a non-negative number, got {}",
                self.temperature
            )));
        }
        Ok(())
    }
}
