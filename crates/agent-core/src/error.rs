//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// LLM provider rejected or failed the request
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider unavailable or not responding
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Provider did not answer in time
    #[error("Provider timed out: {0}")]
    Timeout(String),

    /// Rate limited
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// A tool with this name is already registered
    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),

    /// Tool not found in registry
    #[error("Tool '{0}' not found")]
    ToolNotFound(String),

    /// Tool validation failed
    #[error("Tool validation error: {0}")]
    ToolValidation(String),

    /// Tool execution failed. Carries the tool's own failure text verbatim.
    #[error("{0}")]
    ToolExecution(String),

    /// A toolkit bundle failed to load or enumerate its tools
    #[error("Failed to load toolkit '{toolkit}': {reason}")]
    PluginLoad { toolkit: String, reason: String },

    /// Maximum iterations reached in the agent loop
    #[error("Maximum iterations ({0}) reached")]
    MaxIterations(usize),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Shorthand for [`AgentError::PluginLoad`].
    pub fn plugin_load(toolkit: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::PluginLoad {
            toolkit: toolkit.into(),
            reason: reason.to_string(),
        }
    }

    /// Check if error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable(_) | Self::RateLimited(_) | Self::Timeout(_) | Self::Io(_)
        )
    }

    /// Whether this error came from the completion backend rather than from
    /// tools or local setup.
    pub const fn is_backend(&self) -> bool {
        matches!(
            self,
            Self::Provider(_)
                | Self::ProviderUnavailable(_)
                | Self::Timeout(_)
                | Self::RateLimited(_)
                | Self::Auth(_)
        )
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<Self>() {
            Ok(inner) => inner,
            Err(err) => Self::Other(format!("{err:#}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = AgentError::ToolNotFound("nope".into());
        assert_eq!(err.to_string(), "Tool 'nope' not found");
    }

    #[test]
    fn test_backend_classification() {
        assert!(AgentError::RateLimited("slow down".into()).is_retryable());
        assert!(AgentError::RateLimited("slow down".into()).is_backend());
        assert!(!AgentError::Auth("bad key".into()).is_retryable());
        assert!(AgentError::Auth("bad key".into()).is_backend());
        assert!(!AgentError::ToolNotFound("x".into()).is_backend());
    }

    #[test]
    fn test_anyhow_roundtrip_keeps_variant() {
        let err = anyhow::Error::new(AgentError::ToolNotFound("search".into()));
        assert!(matches!(AgentError::from(err), AgentError::ToolNotFound(name) if name == "search"));

        let err = anyhow::anyhow!("plain failure");
        assert!(matches!(AgentError::from(err), AgentError::Other(msg) if msg == "plain failure"));
    }
}
