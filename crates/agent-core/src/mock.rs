//! Scripted provider for tests and examples

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::Result;
use crate::provider::{Completion, CompletionRequest, LlmProvider, ProviderToolCall};

/// A mock provider that replays pre-configured responses and records every
/// request it receives. Once the script runs out it answers with empty text.
#[derive(Default)]
pub struct MockProvider {
    script: Mutex<VecDeque<Result<Completion>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a completion
    #[must_use]
    pub fn then(self, completion: Completion) -> Self {
        self.lock_script().push_back(Ok(completion));
        self
    }

    /// Queue a plain text answer
    #[must_use]
    pub fn then_text(self, content: impl Into<String>) -> Self {
        self.then(Completion::text(content))
    }

    /// Queue a single tool call with JSON argument text
    #[must_use]
    pub fn then_tool_call(
        self,
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        self.then(Completion::tool_calls(vec![ProviderToolCall {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }]))
    }

    /// Queue a failure
    #[must_use]
    pub fn then_error(self, error: crate::AgentError) -> Self {
        self.lock_script().push_back(Err(error));
        self
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Responses not yet consumed
    pub fn remaining(&self) -> usize {
        self.lock_script().len()
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<Completion>>> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let next = self.lock_script().pop_front();
        next.unwrap_or_else(|| Ok(Completion::text("")))
            .map(|mut completion| {
                if completion.model.is_empty() {
                    completion.model.clone_from(&request.model);
                }
                completion
            })
    }
}
