//! Runtime configuration from the environment
//!
//! | Variable                | Default             |
//! |-------------------------|---------------------|
//! | `OLLAMA_HOST`           | `http://localhost`  |
//! | `OLLAMA_PORT`           | `11434`             |
//! | `OLLAMA_TIMEOUT_SECS`   | `120`               |
//! | `AGENT_MODEL`           | `llama3.2`          |
//! | `AGENT_TEMPERATURE`     | `0.1`               |
//! | `AGENT_MAX_TOKENS`      | unset               |
//! | `AGENT_SYSTEM_PROMPT`   | unset               |
//! | `AGENT_MAX_ITERATIONS`  | `10`                |
//! | `AGENT_MAX_CONCURRENCY` | unbounded           |
//! | `AGENT_TOOLKIT_DIR`     | unset               |
//! | `AGENT_LOG`             | `info`              |

use std::path::PathBuf;
use std::str::FromStr;

use agent_core::{AgentConfig, AgentError, Result};

use crate::ollama::OllamaConfig;

/// Everything needed to bootstrap a runtime
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeConfig {
    pub ollama: OllamaConfig,
    pub agent: AgentConfig,
    /// Cap on concurrent tool executions
    pub max_concurrency: Option<usize>,
    /// Directory of toolkit manifests
    pub toolkit_dir: Option<PathBuf>,
    /// Default tracing filter, overridden by `RUST_LOG`
    pub log_filter: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            ollama: OllamaConfig::default(),
            agent: AgentConfig::default(),
            max_concurrency: None,
            toolkit_dir: None,
            log_filter: "info".into(),
        }
    }
}

impl RuntimeConfig {
    /// Load from the process environment, reading `.env` first if present
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(host) = get("OLLAMA_HOST") {
            config.ollama.host = host;
        }
        if let Some(port) = parse(&get, "OLLAMA_PORT")? {
            config.ollama.port = port;
        }
        if let Some(secs) = parse(&get, "OLLAMA_TIMEOUT_SECS")? {
            config.ollama.timeout_secs = secs;
        }

        if let Some(model) = get("AGENT_MODEL") {
            config.agent.model = model;
        }
        if let Some(temperature) = parse(&get, "AGENT_TEMPERATURE")? {
            config.agent.temperature = temperature;
        }
        config.agent.max_tokens = parse(&get, "AGENT_MAX_TOKENS")?;
        config.agent.system_prompt = get("AGENT_SYSTEM_PROMPT");
        if let Some(max) = parse(&get, "AGENT_MAX_ITERATIONS")? {
            config.agent.max_iterations = max;
        }

        config.max_concurrency = parse(&get, "AGENT_MAX_CONCURRENCY")?;
        config.toolkit_dir = get("AGENT_TOOLKIT_DIR").map(PathBuf::from);
        if let Some(filter) = get("AGENT_LOG") {
            config.log_filter = filter;
        }

        config.agent.validate()?;
        Ok(config)
    }
}

fn parse<T, G>(get: &G, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| AgentError::Config(format!("{key}={raw}: {e}")))
        })
        .transpose()
}
