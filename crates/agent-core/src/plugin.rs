//! Toolkit Plugins
//!
//! A toolkit is a separately packaged bundle of tools. Bundle sources
//! enumerate the toolkits available to the host (an in-process list, a
//! directory of manifests, ...) and the [`PluginManager`] loads them and merges
//! their tools into a [`ToolRegistry`].
//!
//! Loading is failure-isolated: a bundle that fails to load, or a toolkit
//! whose tool hook fails, is logged and skipped without affecting the others.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::{AgentError, Result};
use crate::registry::ToolRegistry;
use crate::tool::Tool;

/// Group identifier toolkits are registered under by default
pub const DEFAULT_TOOLKIT_GROUP: &str = "agent.toolkits";

/// A bundle of related tools
#[async_trait]
pub trait Toolkit: Send + Sync {
    /// Toolkit name
    fn name(&self) -> &str;

    /// The tool enumeration hook
    async fn tools(&self) -> Result<Vec<Arc<dyn Tool>>>;

    /// Release held resources (child processes, connections)
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// A toolkit supplied as a fixed list of tools
pub struct StaticToolkit {
    name: String,
    tools: Vec<Arc<dyn Tool>>,
}

impl StaticToolkit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_tool<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }
}

#[async_trait]
impl Toolkit for StaticToolkit {
    fn name(&self) -> &str {
        &self.name
    }

    async fn tools(&self) -> Result<Vec<Arc<dyn Tool>>> {
        Ok(self.tools.clone())
    }
}

type Loader = Box<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn Toolkit>>> + Send + Sync>;

/// An enumerated, not yet loaded toolkit bundle
pub struct ToolkitEntry {
    name: String,
    group: String,
    loader: Loader,
}

impl ToolkitEntry {
    pub fn new<F, Fut>(name: impl Into<String>, group: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn Toolkit>>> + Send + 'static,
    {
        Self {
            name: name.into(),
            group: group.into(),
            loader: Box::new(move || Box::pin(loader())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Load the bundle
    pub async fn load(&self) -> Result<Arc<dyn Toolkit>> {
        (self.loader)().await
    }
}

impl std::fmt::Debug for ToolkitEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolkitEntry")
            .field("name", &self.name)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

/// Enumerates toolkit bundles known to the host
#[async_trait]
pub trait BundleSource: Send + Sync {
    /// Source name for logs
    fn name(&self) -> &str;

    /// List available bundles
    async fn entries(&self) -> Result<Vec<ToolkitEntry>>;
}

/// In-process list of toolkits
pub struct StaticBundleSource {
    group: String,
    toolkits: Vec<(String, Arc<dyn Toolkit>)>,
    loaders: Vec<(String, Arc<dyn Fn() -> Result<Arc<dyn Toolkit>> + Send + Sync>)>,
}

impl Default for StaticBundleSource {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticBundleSource {
    pub fn new() -> Self {
        Self::with_group(DEFAULT_TOOLKIT_GROUP)
    }

    pub fn with_group(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            toolkits: Vec::new(),
            loaders: Vec::new(),
        }
    }

    /// Add an already constructed toolkit
    #[must_use]
    pub fn toolkit(mut self, toolkit: Arc<dyn Toolkit>) -> Self {
        self.toolkits.push((toolkit.name().to_string(), toolkit));
        self
    }

    /// Add a toolkit built on load; the constructor may fail
    #[must_use]
    pub fn loader<F>(mut self, name: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Toolkit>> + Send + Sync + 'static,
    {
        self.loaders.push((name.into(), Arc::new(loader)));
        self
    }
}

#[async_trait]
impl BundleSource for StaticBundleSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn entries(&self) -> Result<Vec<ToolkitEntry>> {
        let ready = self.toolkits.iter().map(|(name, toolkit)| {
            let toolkit = Arc::clone(toolkit);
            ToolkitEntry::new(name.clone(), self.group.clone(), move || {
                let toolkit = Arc::clone(&toolkit);
                async move { Ok(toolkit) }
            })
        });
        let deferred = self.loaders.iter().map(|(name, loader)| {
            let loader = Arc::clone(loader);
            ToolkitEntry::new(name.clone(), self.group.clone(), move || {
                let outcome = loader();
                async move { outcome }
            })
        });
        Ok(ready.chain(deferred).collect())
    }
}

/// Outcome of merging toolkit tools into a registry
#[derive(Debug, Default)]
pub struct RegistrationReport {
    /// Tools registered, in order
    pub registered: Vec<String>,
    /// Toolkits or tools that were skipped, with the reason
    pub failures: Vec<(String, AgentError)>,
}

impl RegistrationReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A successfully loaded toolkit
#[derive(Clone)]
pub struct LoadedToolkit {
    pub name: String,
    pub toolkit: Arc<dyn Toolkit>,
}

impl std::fmt::Debug for LoadedToolkit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedToolkit").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Discovers toolkits and registers their tools
pub struct PluginManager {
    group: String,
    sources: Vec<Arc<dyn BundleSource>>,
    loaded: Vec<LoadedToolkit>,
    span: tracing::Span,
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new(DEFAULT_TOOLKIT_GROUP)
    }
}

impl PluginManager {
    /// Manager accepting bundles registered under `group`
    pub fn new(group: impl Into<String>) -> Self {
        let group = group.into();
        Self {
            span: tracing::info_span!("plugins", group = %group),
            group,
            sources: Vec::new(),
            loaded: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn BundleSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn add_source(&mut self, source: Arc<dyn BundleSource>) {
        self.sources.push(source);
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Load every bundle in this manager's group. Bundles already loaded
    /// under the same name are not loaded twice.
    pub async fn discover(&mut self) -> &[LoadedToolkit] {
        for source in &self.sources {
            let entries = match source.entries().await {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(parent: &self.span, source = source.name(), error = %e, "Error enumerating toolkits");
                    continue;
                }
            };

            for entry in entries.iter().filter(|e| e.group() == self.group) {
                if self.loaded.iter().any(|l| l.name == entry.name()) {
                    tracing::debug!(parent: &self.span, toolkit = entry.name(), "Toolkit already loaded");
                    continue;
                }
                match entry.load().await {
                    Ok(toolkit) => {
                        tracing::info!(parent: &self.span, toolkit = entry.name(), "Loaded toolkit plugin");
                        self.loaded.push(LoadedToolkit {
                            name: entry.name().to_string(),
                            toolkit,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(parent: &self.span, toolkit = entry.name(), error = %e, "Failed to load toolkit plugin");
                    }
                }
            }
        }
        &self.loaded
    }

    /// Register every loaded toolkit's tools into `registry`
    pub async fn register_tools(&self, registry: &ToolRegistry) -> RegistrationReport {
        let mut report = RegistrationReport::default();

        for loaded in &self.loaded {
            let tools = match loaded.toolkit.tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    tracing::warn!(parent: &self.span, toolkit = %loaded.name, error = %e, "Toolkit failed to provide tools");
                    report
                        .failures
                        .push((loaded.name.clone(), AgentError::plugin_load(&loaded.name, e)));
                    continue;
                }
            };

            for tool in tools {
                let name = tool.name().to_string();
                match registry.register_arc(tool) {
                    Ok(()) => {
                        tracing::info!(parent: &self.span, toolkit = %loaded.name, tool = %name, "Registered tool");
                        report.registered.push(name);
                    }
                    Err(e) => {
                        tracing::warn!(parent: &self.span, toolkit = %loaded.name, tool = %name, error = %e, "Skipped tool");
                        report.failures.push((format!("{}/{name}", loaded.name), e));
                    }
                }
            }
        }
        report
    }

    /// Names of successfully loaded toolkits
    pub fn loaded_names(&self) -> Vec<String> {
        self.loaded.iter().map(|l| l.name.clone()).collect()
    }

    pub fn loaded(&self) -> &[LoadedToolkit] {
        &self.loaded
    }

    /// Run every toolkit's shutdown hook
    pub async fn shutdown(&mut self) {
        for loaded in std::mem::take(&mut self.loaded) {
            if let Err(e) = loaded.toolkit.shutdown().await {
                tracing::warn!(parent: &self.span, toolkit = %loaded.name, error = %e, "Toolkit shutdown failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::FnTool;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn tool(name: &str) -> FnTool {
        let reply = format!("{name} ran");
        FnTool::builder(name).build_sync(move |_| Ok::<_, anyhow::Error>(reply.clone()))
    }

    struct BrokenToolkit;

    #[async_trait]
    impl Toolkit for BrokenToolkit {
        fn name(&self) -> &str {
            "broken"
        }

        async fn tools(&self) -> Result<Vec<Arc<dyn Tool>>> {
            Err(AgentError::Other("hook exploded".into()))
        }

        async fn shutdown(&self) -> Result<()> {
            Err(AgentError::Other("already gone".into()))
        }
    }

    struct ClosingToolkit(Arc<AtomicBool>);

    #[async_trait]
    impl Toolkit for ClosingToolkit {
        fn name(&self) -> &str {
            "closing"
        }

        async fn tools(&self) -> Result<Vec<Arc<dyn Tool>>> {
            Ok(Vec::new())
        }

        async fn shutdown(&self) -> Result<()> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl BundleSource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        async fn entries(&self) -> Result<Vec<ToolkitEntry>> {
            Err(AgentError::Other("metadata unavailable".into()))
        }
    }

    #[tokio::test]
    async fn test_broken_bundle_does_not_block_others() {
        let source = StaticBundleSource::new()
            .loader("explodes", || Err(AgentError::plugin_load("explodes", "missing symbol")))
            .toolkit(Arc::new(StaticToolkit::new("web").with_tool(tool("search"))));

        let mut manager = PluginManager::default().with_source(Arc::new(source));
        let loaded = manager.discover().await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(manager.loaded_names(), vec!["web"]);

        let registry = ToolRegistry::new();
        let report = manager.register_tools(&registry).await;
        assert!(report.is_clean());
        assert_eq!(report.registered, vec!["search"]);
        assert!(registry.get("search").is_some());
    }

    #[tokio::test]
    async fn test_failing_tool_hook_is_isolated() {
        let source = StaticBundleSource::new()
            .toolkit(Arc::new(BrokenToolkit))
            .toolkit(Arc::new(StaticToolkit::new("math").with_tool(tool("add"))));

        let mut manager = PluginManager::default()
            .with_source(Arc::new(FailingSource))
            .with_source(Arc::new(source));
        manager.discover().await;

        let registry = ToolRegistry::new();
        let report = manager.register_tools(&registry).await;
        assert_eq!(report.registered, vec!["add"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "broken");
        assert!(matches!(report.failures[0].1, AgentError::PluginLoad { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_tool_across_toolkits() {
        let source = StaticBundleSource::new()
            .toolkit(Arc::new(StaticToolkit::new("a").with_tool(tool("search"))))
            .toolkit(Arc::new(StaticToolkit::new("b").with_tool(tool("search")).with_tool(tool("fetch"))));

        let mut manager = PluginManager::default().with_source(Arc::new(source));
        manager.discover().await;

        let registry = ToolRegistry::new();
        let report = manager.register_tools(&registry).await;
        assert_eq!(report.registered, vec!["search", "fetch"]);
        assert_eq!(report.failures[0].0, "b/search");
        assert!(matches!(report.failures[0].1, AgentError::DuplicateTool(_)));
    }

    #[tokio::test]
    async fn test_group_filter_and_rediscovery() {
        let other = StaticBundleSource::with_group("someone.else")
            .toolkit(Arc::new(StaticToolkit::new("foreign").with_tool(tool("x"))));
        let ours = StaticBundleSource::new().toolkit(Arc::new(StaticToolkit::new("ours")));

        let mut manager = PluginManager::default()
            .with_source(Arc::new(other))
            .with_source(Arc::new(ours));
        manager.discover().await;
        manager.discover().await;
        assert_eq!(manager.loaded_names(), vec!["ours"]);

        manager.shutdown().await;
        assert!(manager.loaded_names().is_empty());
    }

    #[tokio::test]
    async fn test_failed_shutdown_does_not_skip_the_rest() {
        let closed = Arc::new(AtomicBool::new(false));
        let source = StaticBundleSource::new()
            .toolkit(Arc::new(BrokenToolkit))
            .toolkit(Arc::new(ClosingToolkit(Arc::clone(&closed))));

        let mut manager = PluginManager::default().with_source(Arc::new(source));
        manager.discover().await;
        assert_eq!(manager.loaded_names(), vec!["broken", "closing"]);

        manager.shutdown().await;
        assert!(closed.load(Ordering::SeqCst));
        assert!(manager.loaded_names().is_empty());
    }
}
