//! # agent-runtime
//!
//! Concrete collaborators for `agent-core`.
//!
//! - **Ollama**: completion backend over the local Ollama HTTP API
//! - **MCP**: stdio JSON-RPC transport for remote tool servers
//! - **Discovery**: toolkit bundles from a directory of manifests
//! - **Config / logging**: env-driven settings and tracing setup
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::{RuntimeConfig, bootstrap, logging};
//!
//! let config = RuntimeConfig::from_env()?;
//! logging::init_tracing(&config.log_filter)?;
//! let mut runtime = bootstrap(config).await?;
//! let answer = runtime.agent.run("What's the weather in Paris?").await?;
//! runtime.shutdown().await;
//! ```

pub mod config;
pub mod discovery;
pub mod logging;
pub mod mcp;
pub mod ollama;

use std::sync::Arc;

use agent_core::plugin::BundleSource;

pub use config::RuntimeConfig;
pub use discovery::DirectoryBundleSource;
pub use mcp::{LaunchSpec, McpError, McpSession};
pub use ollama::{OllamaConfig, OllamaProvider};

// Re-export core types for convenience
pub use agent_core::{
    Agent, AgentError, LlmProvider, Message, PluginManager, RegistrationReport, Result, Role,
    Tool, ToolRegistry,
};

/// A ready agent plus the toolkits backing its tools
pub struct Runtime {
    pub agent: Agent,
    pub plugins: PluginManager,
    /// Outcome of merging toolkit tools into the registry
    pub report: RegistrationReport,
}

impl Runtime {
    /// Shut every loaded toolkit down
    pub async fn shutdown(&mut self) {
        self.plugins.shutdown().await;
    }
}

/// Build a runtime against the configured Ollama server
pub async fn bootstrap(config: RuntimeConfig) -> Result<Runtime> {
    let provider = OllamaProvider::from_config(&config.ollama)?;
    match provider.health_check().await {
        Ok(true) => tracing::info!(url = provider.base_url(), "Connected to Ollama"),
        _ => tracing::warn!(
            url = provider.base_url(),
            "Ollama not reachable, completions will fail until it is"
        ),
    }
    bootstrap_with_provider(config, Arc::new(provider), Vec::new()).await
}

/// Build a runtime with any provider and extra bundle sources. The
/// configured toolkit directory, if any, is scanned first.
pub async fn bootstrap_with_provider(
    config: RuntimeConfig,
    provider: Arc<dyn LlmProvider>,
    sources: Vec<Arc<dyn BundleSource>>,
) -> Result<Runtime> {
    let registry = Arc::new(ToolRegistry::new());

    let mut plugins = PluginManager::default();
    if let Some(dir) = &config.toolkit_dir {
        plugins.add_source(Arc::new(DirectoryBundleSource::new(dir)));
    }
    for source in sources {
        plugins.add_source(source);
    }
    plugins.discover().await;
    let report = plugins.register_tools(&registry).await;
    tracing::info!(
        toolkits = plugins.loaded().len(),
        tools = report.registered.len(),
        skipped = report.failures.len(),
        "Toolkits registered"
    );

    let mut builder = Agent::builder()
        .provider(provider)
        .registry(registry)
        .config(config.agent);
    if let Some(max) = config.max_concurrency {
        builder = builder.max_concurrency(max);
    }

    Ok(Runtime {
        agent: builder.build()?,
        plugins,
        report,
    })
}
