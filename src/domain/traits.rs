//! # Domain Traits
//!
//! Ports the agent loop is wired with. Each has a production implementation in the
//! infrastructure or interface layer and a scripted fake in the tests.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::domain::config::McpServerConfig;
use crate::domain::errors::{ExecError, ModelError, RemoteToolError};
use crate::domain::exec::{ExecOutput, ExecRequest};
use crate::domain::types::{
    ApprovalRequest, ConversationItem, RemoteTool, ReviewDecision, ToolDescriptor,
};

/// Everything the model sees for one round-trip.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub model: &'a str,
    pub instructions: &'a str,
    pub history: &'a [ConversationItem],
    pub tools: &'a [ToolDescriptor],
}

/// Abstract interface for the language model.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Returns the next assistant item. Retry policy, if any, lives behind this call.
    async fn complete(&self, request: ModelRequest<'_>) -> Result<ConversationItem, ModelError>;
}

/// Asks a human (or a policy stand-in) whether an action may run.
#[async_trait]
pub trait ConfirmationPort: Send + Sync {
    async fn confirm(&self, request: &ApprovalRequest) -> ReviewDecision;
}

/// Receives every item the loop produces, in causal order.
pub trait ItemSink: Send + Sync {
    fn emit(&self, item: &ConversationItem);
}

/// Notified around each model round-trip.
pub trait ProgressSink: Send + Sync {
    fn set_loading(&self, loading: bool);
}

/// One connection to one remote tool server.
#[async_trait]
pub trait RemoteToolClient: Send + Sync {
    fn server_name(&self) -> &str;

    /// Idempotent when already connected.
    async fn connect(&self) -> Result<(), RemoteToolError>;

    async fn list_tools(&self) -> Result<Vec<RemoteTool>, RemoteToolError>;

    /// Returns the server's response serialized as JSON.
    async fn call_tool(
        &self,
        tool: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, RemoteToolError>;

    /// Safe to call more than once.
    async fn disconnect(&self) -> Result<(), RemoteToolError>;

    fn is_connected(&self) -> bool;
}

/// Builds the client for one enabled server.
pub trait RemoteClientFactory: Send + Sync {
    fn create(&self, config: &McpServerConfig) -> Arc<dyn RemoteToolClient>;
}

/// Runs native commands.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn exec(
        &self,
        request: ExecRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, ExecError>;
}

/// Sink that drops everything, for headless runs.
pub struct NullSink;

impl ItemSink for NullSink {
    fn emit(&self, _item: &ConversationItem) {}
}

impl ProgressSink for NullSink {
    fn set_loading(&self, _loading: bool) {}
}
