//! Remote Tools
//!
//! Tools hosted by an external tool server. The transport (stdio MCP, HTTP,
//! ...) implements [`ToolServerSession`]; everything else here is transport
//! neutral, so a remote tool is just another [`Tool`] to the registry and the
//! agent loop.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::plugin::Toolkit;
use crate::tool::{Arguments, Tool, ToolDefinition};

/// A tool as advertised by a tool server
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the tool's input
    #[serde(default)]
    pub input_schema: Value,
}

/// An open connection to a tool server
#[async_trait]
pub trait ToolServerSession: Send + Sync {
    /// Tools the server offers
    async fn list_tools(&self) -> Result<Vec<RemoteToolSpec>>;

    /// Call a tool and return its text output
    async fn call_tool(&self, name: &str, arguments: Arguments) -> Result<String>;

    /// Close the session
    async fn disconnect(&self) -> Result<()>;
}

/// A tool whose invocation is delegated to a tool server
pub struct RemoteTool {
    spec: RemoteToolSpec,
    definition: ToolDefinition,
    session: Arc<dyn ToolServerSession>,
}

impl RemoteTool {
    pub fn new(spec: RemoteToolSpec, session: Arc<dyn ToolServerSession>) -> Self {
        let definition = ToolDefinition::from_json_schema(&spec.input_schema);
        Self {
            spec,
            definition,
            session,
        }
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn invoke(&self, arguments: Arguments) -> Result<Value> {
        let output = self.session.call_tool(&self.spec.name, arguments).await?;
        Ok(Value::String(output))
    }
}

/// A toolkit backed by one tool-server session
pub struct RemoteToolkit {
    name: String,
    session: Arc<dyn ToolServerSession>,
}

impl RemoteToolkit {
    pub fn new(name: impl Into<String>, session: Arc<dyn ToolServerSession>) -> Self {
        Self {
            name: name.into(),
            session,
        }
    }
}

#[async_trait]
impl Toolkit for RemoteToolkit {
    fn name(&self) -> &str {
        &self.name
    }

    async fn tools(&self) -> Result<Vec<Arc<dyn Tool>>> {
        let specs = self.session.list_tools().await?;
        Ok(specs
            .into_iter()
            .map(|spec| Arc::new(RemoteTool::new(spec, Arc::clone(&self.session))) as Arc<dyn Tool>)
            .collect())
    }

    async fn shutdown(&self) -> Result<()> {
        self.session.disconnect().await
    }
}
