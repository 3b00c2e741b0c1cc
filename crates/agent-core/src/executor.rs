//! Task Executor
//!
//! Runs independent units of work with isolated failure handling. Every task
//! ends in a terminal state: a failure inside one task, including a panic, is
//! recorded on that task and never aborts its siblings.
//!
//! Blocking work is moved onto tokio's blocking pool; async work is spawned on
//! the runtime. Callers do not need to know which kind a task carries.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, join_all};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use uuid::Uuid;

use crate::tool::Arguments;

/// Unique task identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task lifecycle. Transitions only move forward:
/// `Pending -> Running -> Completed | Failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Failed)
                | (Self::Running, Self::Completed | Self::Failed)
        )
    }
}

/// Positional and keyword inputs handed to a task's work
#[derive(Clone, Debug, Default)]
pub struct TaskInput {
    pub args: Vec<Value>,
    pub kwargs: Arguments,
}

type BlockingFn = Box<dyn FnOnce(TaskInput) -> anyhow::Result<Value> + Send + 'static>;
type AsyncFn = Box<dyn FnOnce(TaskInput) -> BoxFuture<'static, anyhow::Result<Value>> + Send + 'static>;

/// The callable a task runs
pub enum Work {
    /// Synchronous work, run on the blocking pool
    Blocking(BlockingFn),
    /// Asynchronous work, spawned onto the runtime
    Async(AsyncFn),
}

impl std::fmt::Debug for Work {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blocking(_) => f.write_str("Work::Blocking"),
            Self::Async(_) => f.write_str("Work::Async"),
        }
    }
}

/// One unit of executable work and its outcome
#[derive(Debug)]
pub struct Task {
    id: TaskId,
    name: String,
    input: TaskInput,
    work: Option<Work>,
    status: TaskStatus,
    result: Option<Value>,
    error: Option<String>,
    failure: Option<anyhow::Error>,
}

impl Task {
    fn with_work(name: impl Into<String>, work: Work) -> Self {
        Self {
            id: TaskId::new(),
            name: name.into(),
            input: TaskInput::default(),
            work: Some(work),
            status: TaskStatus::Pending,
            result: None,
            error: None,
            failure: None,
        }
    }

    /// Task running a synchronous closure
    pub fn blocking<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(TaskInput) -> anyhow::Result<Value> + Send + 'static,
    {
        Self::with_work(name, Work::Blocking(Box::new(f)))
    }

    /// Task running an async closure
    pub fn future<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(TaskInput) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self::with_work(name, Work::Async(Box::new(move |input| Box::pin(f(input)))))
    }

    #[must_use]
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.input.args = args;
        self
    }

    #[must_use]
    pub fn with_kwargs(mut self, kwargs: Arguments) -> Self {
        self.input.kwargs = kwargs;
        self
    }

    pub const fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn status(&self) -> TaskStatus {
        self.status
    }

    pub const fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Rendered failure description
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The captured failure, for callers that need to inspect its type
    pub const fn failure(&self) -> Option<&anyhow::Error> {
        self.failure.as_ref()
    }

    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, next: TaskStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            tracing::warn!(
                task = %self.id,
                from = ?self.status,
                to = ?next,
                "Ignored illegal task transition"
            );
            false
        }
    }

    fn mark_running(&mut self) -> bool {
        self.transition(TaskStatus::Running)
    }

    fn complete(&mut self, value: Value) {
        if self.transition(TaskStatus::Completed) {
            self.result = Some(value);
        }
    }

    fn fail(&mut self, failure: anyhow::Error) {
        if self.transition(TaskStatus::Failed) {
            self.error = Some(format!("{failure:#}"));
            self.failure = Some(failure);
        }
    }
}

/// Runs tasks to a terminal state
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a single task. Never fails: failures are recorded on the task.
    async fn run_one(&self, task: Task) -> Task;

    /// Run every task concurrently and wait for all of them. The output keeps
    /// the input order index-for-index.
    async fn run_batch(&self, tasks: Vec<Task>) -> Vec<Task> {
        join_all(tasks.into_iter().map(|task| self.run_one(task))).await
    }
}

/// Executor backed by the ambient tokio runtime
#[derive(Debug)]
pub struct TokioExecutor {
    limit: Option<Arc<Semaphore>>,
    max_concurrency: Option<usize>,
    span: tracing::Span,
}

impl Default for TokioExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl TokioExecutor {
    /// Unbounded executor
    pub fn new() -> Self {
        Self {
            limit: None,
            max_concurrency: None,
            span: tracing::info_span!("executor"),
        }
    }

    /// Executor running at most `max` tasks at once. Zero is treated as one.
    pub fn with_max_concurrency(max: usize) -> Self {
        let max = max.max(1);
        Self {
            limit: Some(Arc::new(Semaphore::new(max))),
            max_concurrency: Some(max),
            span: tracing::info_span!("executor", max_concurrency = max),
        }
    }

    #[must_use]
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub const fn max_concurrency(&self) -> Option<usize> {
        self.max_concurrency
    }
}

pub(crate) fn join_failure(err: JoinError) -> anyhow::Error {
    if err.is_panic() {
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        anyhow::anyhow!("task panicked: {message}")
    } else {
        anyhow::anyhow!("task was cancelled")
    }
}

#[async_trait]
impl Executor for TokioExecutor {
    async fn run_one(&self, mut task: Task) -> Task {
        if task.is_terminal() {
            return task;
        }

        let Some(work) = task.work.take() else {
            task.fail(anyhow::anyhow!("task '{}' has no work to run", task.name));
            return task;
        };

        let _permit = match &self.limit {
            Some(limit) => match Arc::clone(limit).acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(e) => {
                    task.fail(anyhow::anyhow!("executor closed: {e}"));
                    return task;
                }
            },
            None => None,
        };

        if !task.mark_running() {
            return task;
        }
        tracing::debug!(parent: &self.span, task = %task.id, name = %task.name, kind = ?work, "Task running");

        let input = std::mem::take(&mut task.input);
        let outcome = match work {
            Work::Blocking(f) => tokio::task::spawn_blocking(move || f(input)).await,
            Work::Async(f) => tokio::spawn(f(input)).await,
        };

        match outcome {
            Ok(Ok(value)) => {
                task.complete(value);
                tracing::debug!(parent: &self.span, task = %task.id, name = %task.name, "Task completed");
            }
            Ok(Err(failure)) => {
                tracing::warn!(parent: &self.span, task = %task.id, name = %task.name, error = %failure, "Task failed");
                task.fail(failure);
            }
            Err(join) => {
                let failure = join_failure(join);
                tracing::error!(parent: &self.span, task = %task.id, name = %task.name, error = %failure, "Task aborted");
                task.fail(failure);
            }
        }
        task
    }
}
