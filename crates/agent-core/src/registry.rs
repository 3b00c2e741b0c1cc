//! Tool Registry
//!
//! Name-keyed collection of tools shared between the agent loop and
//! concurrently executing tool calls. Population is expected to finish before
//! a run starts; the lock only guarantees that concurrent registration and
//! lookup never corrupt the map.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::tool::{Arguments, Tool, ToolSchema};

/// What `register` does when the name is already taken
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Fail with [`AgentError::DuplicateTool`] and keep the original
    #[default]
    Reject,
    /// Replace the original, keeping its registration slot
    Overwrite,
}

#[derive(Default)]
struct Entries {
    ordered: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl Entries {
    fn reindex(&mut self) {
        self.index = self
            .ordered
            .iter()
            .enumerate()
            .map(|(i, tool)| (tool.name().to_string(), i))
            .collect();
    }
}

/// Registry for available tools
pub struct ToolRegistry {
    entries: RwLock<Entries>,
    policy: DuplicatePolicy,
    span: tracing::Span,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("policy", &self.policy)
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    /// Registry that rejects duplicate names
    pub fn new() -> Self {
        Self::with_policy(DuplicatePolicy::Reject)
    }

    pub fn with_policy(policy: DuplicatePolicy) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            policy,
            span: tracing::info_span!("tool_registry"),
        }
    }

    /// Replace the span events are logged under
    #[must_use]
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub const fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new tool
    pub fn register<T: Tool + 'static>(&self, tool: T) -> Result<()> {
        self.register_arc(Arc::new(tool))
    }

    /// Register a shared tool
    pub fn register_arc(&self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        let mut entries = self.write();

        match (entries.index.get(&name).copied(), self.policy) {
            (Some(_), DuplicatePolicy::Reject) => {
                tracing::warn!(parent: &self.span, tool = %name, "Rejected duplicate tool registration");
                Err(AgentError::DuplicateTool(name))
            }
            (Some(slot), DuplicatePolicy::Overwrite) => {
                entries.ordered[slot] = tool;
                tracing::info!(parent: &self.span, tool = %name, "Replaced tool");
                Ok(())
            }
            (None, _) => {
                let slot = entries.ordered.len();
                entries.ordered.push(tool);
                entries.index.insert(name.clone(), slot);
                tracing::info!(parent: &self.span, tool = %name, "Registered tool");
                Ok(())
            }
        }
    }

    /// Remove a tool, returning it if it was present
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let mut entries = self.write();
        let slot = entries.index.get(name).copied()?;
        let removed = entries.ordered.remove(slot);
        entries.reindex();
        tracing::info!(parent: &self.span, tool = %name, "Unregistered tool");
        Some(removed)
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let entries = self.read();
        entries
            .index
            .get(name)
            .map(|&slot| Arc::clone(&entries.ordered[slot]))
    }

    /// Get a tool by name, failing when it is absent
    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))
    }

    /// All tools in registration order
    pub fn list(&self) -> Vec<Arc<dyn Tool>> {
        self.read().ordered.clone()
    }

    /// Resolve, validate and invoke a tool
    pub async fn execute(&self, name: &str, arguments: Arguments) -> Result<Value> {
        let tool = self.lookup(name)?;
        tool.validate(&arguments)?;
        tool.invoke(arguments).await
    }

    /// Get all tool schemas in registration order
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.read().ordered.iter().map(|t| t.schema()).collect()
    }

    /// Get tool names in registration order
    pub fn names(&self) -> Vec<String> {
        self.read()
            .ordered
            .iter()
            .map(|t| t.name().to_string())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().index.contains_key(name)
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.read().ordered.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.read().ordered.is_empty()
    }
}
