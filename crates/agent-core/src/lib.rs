//! # agent-core
//!
//! Core of a tool-calling conversational agent: a backend-agnostic LLM
//! abstraction, a tool registry, a concurrent executor and the agent loop
//! that ties them together.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Agent                              │
//! │  ┌─────────────┐  ┌──────────────┐  ┌─────────────────────┐  │
//! │  │ Conversation│  │ ToolRegistry │  │    LlmProvider      │  │
//! │  │    Loop     │──│  + Executor  │──│    (Strategy)       │  │
//! │  └─────────────┘  └──────────────┘  └─────────────────────┘  │
//! │                          ▲                                   │
//! │                   PluginManager ◄── BundleSource / Toolkit   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `LlmProvider` trait keeps the loop independent of any particular
//! backend; `Toolkit` and `BundleSource` let tools arrive from outside the
//! crate, including remote tool servers through `ToolServerSession`.

pub mod agent;
pub mod config;
pub mod error;
pub mod executor;
pub mod message;
pub mod mock;
pub mod plugin;
pub mod provider;
pub mod registry;
pub mod remote;
pub mod tool;

pub use agent::{Agent, AgentBuilder, AgentState, ConversationalAgent};
pub use config::{AgentConfig, ToolFailurePolicy};
pub use error::{AgentError, Result};
pub use executor::{Executor, Task, TaskId, TaskStatus, TokioExecutor};
pub use message::{ChatMessage, Conversation, Message, Role};
pub use plugin::{BundleSource, PluginManager, RegistrationReport, StaticBundleSource, Toolkit};
pub use provider::{
    Completion, CompletionRequest, LlmProvider, ProviderChain, ProviderStrategy, ProviderToolCall,
};
pub use registry::{DuplicatePolicy, ToolRegistry};
pub use remote::{RemoteTool, RemoteToolSpec, RemoteToolkit, ToolServerSession};
pub use tool::{
    Arguments, FnTool, ParamType, Tool, ToolCallRequest, ToolDefinition, ToolParameter, ToolSchema,
};
