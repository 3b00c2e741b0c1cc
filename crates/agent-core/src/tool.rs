//! Tool System
//!
//! Extensible tool framework for agent capabilities.
//! Tools are registered at setup time and invoked by the agent loop through
//! the executor.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{AgentError, Result};
use crate::executor::join_failure;

/// Keyword arguments passed to a tool
pub type Arguments = Map<String, Value>;

/// Semantic type tag of a tool parameter
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ParamType {
    Text,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    /// Anything else; passed to the backend unchanged
    Other(String),
}

impl ParamType {
    /// Parse a host type name (`str`, `int`, `float`, ...) into a tag
    pub fn parse(name: &str) -> Self {
        match name.trim() {
            "str" | "string" | "text" => Self::Text,
            "int" | "integer" => Self::Integer,
            "float" | "number" => Self::Number,
            "bool" | "boolean" => Self::Boolean,
            "list" | "array" => Self::Array,
            "dict" | "object" => Self::Object,
            other => Self::Other(other.to_string()),
        }
    }

    /// JSON Schema type name
    pub fn schema_type(&self) -> &str {
        match self {
            Self::Text => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Other(name) => name,
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.schema_type())
    }
}

impl Serialize for ParamType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.schema_type())
    }
}

impl<'de> Deserialize<'de> for ParamType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::parse(&name))
    }
}

/// Parameter definition for tool schema
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolParameter {
    /// Parameter name
    pub name: String,

    /// Semantic type
    #[serde(rename = "type")]
    pub param_type: ParamType,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,
}

impl ToolParameter {
    pub fn new(
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required,
        }
    }

    pub fn required(name: impl Into<String>, param_type: ParamType, description: impl Into<String>) -> Self {
        Self::new(name, param_type, description, true)
    }

    pub fn optional(name: impl Into<String>, param_type: ParamType, description: impl Into<String>) -> Self {
        Self::new(name, param_type, description, false)
    }
}

/// Parameter list of a tool, keyed by name in insertion order
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    parameters: Vec<ToolParameter>,
}

impl ToolDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter. A parameter with the same name is replaced in place.
    #[must_use]
    pub fn with_parameter(mut self, parameter: ToolParameter) -> Self {
        self.insert(parameter);
        self
    }

    pub fn insert(&mut self, parameter: ToolParameter) {
        match self.parameters.iter_mut().find(|p| p.name == parameter.name) {
            Some(slot) => *slot = parameter,
            None => self.parameters.push(parameter),
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&ToolParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn parameters(&self) -> impl Iterator<Item = &ToolParameter> {
        self.parameters.iter()
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Build a definition from a JSON Schema object (`properties` + `required`)
    pub fn from_json_schema(schema: &Value) -> Self {
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut definition = Self::new();
        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (name, property) in properties {
                let param_type = property
                    .get("type")
                    .and_then(Value::as_str)
                    .map_or_else(|| ParamType::Other("any".into()), ParamType::parse);
                let description = property
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                definition.insert(ToolParameter::new(
                    name.clone(),
                    param_type,
                    description,
                    required.contains(&name.as_str()),
                ));
            }
        }
        definition
    }

    /// Render as a JSON Schema object
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    json!({ "type": p.param_type.schema_type(), "description": p.description }),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Tool advertisement sent to the completion backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to LLM)
    pub description: String,

    /// JSON Schema of the parameters
    pub parameters: Value,
}

impl ToolSchema {
    /// Function-calling shape understood by OpenAI-style backends and Ollama
    pub fn function_spec(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Tool call request emitted by the backend, with parsed arguments
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub tool_name: String,
    pub arguments: Arguments,
}

impl ToolCallRequest {
    /// Build a request from backend call fields, parsing the argument text
    pub fn parse(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        raw_arguments: &str,
    ) -> Result<Self> {
        Ok(Self {
            id: id.into(),
            tool_name: tool_name.into(),
            arguments: parse_arguments(raw_arguments)?,
        })
    }
}

/// Parse backend argument text into keyword arguments.
///
/// Empty text and `null` are an empty argument set; anything that is not a
/// JSON object is rejected.
pub fn parse_arguments(raw: &str) -> Result<Arguments> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Arguments::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Arguments::new()),
        Ok(other) => Err(AgentError::ToolValidation(format!(
            "invalid arguments: expected a JSON object, got {other}"
        ))),
        Err(e) => Err(AgentError::ToolValidation(format!("invalid arguments: {e}"))),
    }
}

/// Render a tool result for the conversation. Strings are used verbatim.
pub fn stringify_result(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Tool trait - implement to add new capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name
    fn name(&self) -> &str;

    /// Description shown to the model
    fn description(&self) -> &str;

    /// Parameter definitions
    fn definition(&self) -> &ToolDefinition;

    /// Invoke the tool. Implementations may complete immediately or suspend.
    async fn invoke(&self, arguments: Arguments) -> Result<Value>;

    /// Validate arguments before invocation
    fn validate(&self, arguments: &Arguments) -> Result<()> {
        for param in self.definition().parameters() {
            if param.required && !arguments.contains_key(&param.name) {
                return Err(AgentError::ToolValidation(format!(
                    "Missing required parameter: {}",
                    param.name
                )));
            }
        }
        Ok(())
    }

    /// Get the tool's schema for LLM function calling
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.definition().to_json_schema(),
        }
    }
}

type SyncHandler = Arc<dyn Fn(Arguments) -> anyhow::Result<Value> + Send + Sync>;
type AsyncHandler = Arc<dyn Fn(Arguments) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

#[derive(Clone)]
enum Handler {
    Sync(SyncHandler),
    Async(AsyncHandler),
}

/// A tool backed by a plain or async closure
#[derive(Clone)]
pub struct FnTool {
    name: String,
    description: String,
    definition: ToolDefinition,
    handler: Handler,
}

impl FnTool {
    pub fn builder(name: impl Into<String>) -> FnToolBuilder {
        FnToolBuilder {
            name: name.into(),
            description: None,
            definition: ToolDefinition::new(),
        }
    }

    /// Whether the handler is asynchronous
    pub const fn is_async(&self) -> bool {
        matches!(self.handler, Handler::Async(_))
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("definition", &self.definition)
            .field("async", &self.is_async())
            .finish()
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn invoke(&self, arguments: Arguments) -> Result<Value> {
        let outcome = match &self.handler {
            // Plain handlers may block, keep them off the async workers
            Handler::Sync(f) => {
                let f = Arc::clone(f);
                tokio::task::spawn_blocking(move || f(arguments))
                    .await
                    .unwrap_or_else(|e| Err(join_failure(e)))
            }
            Handler::Async(f) => f(arguments).await,
        };
        outcome.map_err(|e| AgentError::ToolExecution(format!("{e:#}")))
    }
}

/// Builder for [`FnTool`]
#[derive(Debug)]
pub struct FnToolBuilder {
    name: String,
    description: Option<String>,
    definition: ToolDefinition,
}

impl FnToolBuilder {
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn param(mut self, parameter: ToolParameter) -> Self {
        self.definition.insert(parameter);
        self
    }

    #[must_use]
    pub fn definition(mut self, definition: ToolDefinition) -> Self {
        self.definition = definition;
        self
    }

    /// Finish with a synchronous handler
    pub fn build_sync<F, R>(self, handler: F) -> FnTool
    where
        F: Fn(Arguments) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Serialize,
    {
        let handler: SyncHandler = Arc::new(move |args| {
            let value = handler(args)?;
            Ok(serde_json::to_value(value)?)
        });
        self.finish(Handler::Sync(handler))
    }

    /// Finish with an asynchronous handler
    pub fn build_async<F, Fut, R>(self, handler: F) -> FnTool
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Serialize,
    {
        let handler: AsyncHandler = Arc::new(move |args| {
            let fut = handler(args);
            Box::pin(async move {
                let value = fut.await?;
                Ok(serde_json::to_value(value)?)
            })
        });
        self.finish(Handler::Async(handler))
    }

    fn finish(self, handler: Handler) -> FnTool {
        let description = self
            .description
            .unwrap_or_else(|| format!("Tool: {}", self.name));
        FnTool {
            name: self.name,
            description,
            definition: self.definition,
            handler,
        }
    }
}
