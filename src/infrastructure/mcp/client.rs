//! # MCP Client
//!
//! One [`McpToolClient`] per configured server, speaking MCP through `rmcp` over either a
//! spawned child process (stdio) or streamable HTTP.

use async_trait::async_trait;
use rmcp::model::CallToolRequestParam;
use rmcp::service::{Peer, RunningService};
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::{StreamableHttpClientTransport, TokioChildProcess};
use rmcp::{RoleClient, ServiceExt};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::domain::config::{McpEndpoint, McpServerConfig};
use crate::domain::errors::RemoteToolError;
use crate::domain::traits::{RemoteClientFactory, RemoteToolClient};
use crate::domain::types::RemoteTool;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Env var through which stdio servers receive the configured auth token.
pub const AUTH_TOKEN_ENV: &str = "MCP_AUTH_TOKEN";

type McpService = RunningService<RoleClient, ()>;

/// MCP client for listing and invoking tools on one server
pub struct McpToolClient {
    config: McpServerConfig,
    service: Mutex<Option<McpService>>,
    /// Handle of the live session, readable without the lifecycle lock.
    peer: std::sync::Mutex<Option<Peer<RoleClient>>>,
}

impl McpToolClient {
    pub fn new(config: McpServerConfig) -> Self {
        Self {
            config,
            service: Mutex::new(None),
            peer: std::sync::Mutex::new(None),
        }
    }

    fn connect_error(&self, message: impl Into<String>) -> RemoteToolError {
        RemoteToolError::Connect {
            server: self.config.name.clone(),
            message: message.into(),
        }
    }

    async fn open(&self) -> Result<McpService, RemoteToolError> {
        let endpoint = self
            .config
            .endpoint()
            .map_err(|e| self.connect_error(e.to_string()))?;
        let token = self.config.auth_token();

        match endpoint {
            McpEndpoint::Stdio { command, args, env } => {
                let mut cmd = tokio::process::Command::new(&command);
                cmd.args(&args).envs(&env);
                if let Some(token) = token {
                    cmd.env(AUTH_TOKEN_ENV, token);
                }
                let transport = TokioChildProcess::new(cmd)
                    .map_err(|e| self.connect_error(format!("failed to spawn '{command}': {e}")))?;
                ().serve(transport)
                    .await
                    .map_err(|e| self.connect_error(e.to_string()))
            }
            McpEndpoint::Http { url } => {
                let mut transport_config = StreamableHttpClientTransportConfig::with_uri(url);
                if let Some(token) = token {
                    transport_config = transport_config.auth_header(token);
                }
                let transport = StreamableHttpClientTransport::from_config(transport_config);
                ().serve(transport)
                    .await
                    .map_err(|e| self.connect_error(e.to_string()))
            }
        }
    }

    fn set_peer(&self, peer: Option<Peer<RoleClient>>) {
        *self.peer.lock().unwrap_or_else(PoisonError::into_inner) = peer;
    }

    /// The peer handle, unless the session was never opened or its transport has closed.
    fn live_peer(&self) -> Option<Peer<RoleClient>> {
        self.peer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|peer| !peer.is_transport_closed())
            .cloned()
    }

    /// Clones the peer handle so calls do not hold the lifecycle lock.
    async fn peer(&self) -> Result<Peer<RoleClient>, RemoteToolError> {
        self.live_peer()
            .ok_or_else(|| RemoteToolError::NotConnected {
                server: self.config.name.clone(),
            })
    }
}

#[async_trait]
impl RemoteToolClient for McpToolClient {
    fn server_name(&self) -> &str {
        &self.config.name
    }

    async fn connect(&self) -> Result<(), RemoteToolError> {
        let mut guard = self.service.lock().await;
        if guard.is_some() && self.is_connected() {
            return Ok(());
        }

        let service = tokio::time::timeout(CONNECT_TIMEOUT, self.open())
            .await
            .map_err(|_| {
                self.connect_error(format!("timed out after {}s", CONNECT_TIMEOUT.as_secs()))
            })??;

        tracing::info!(server = %self.config.name, "MCP server connected");
        self.set_peer(Some(service.peer().clone()));
        *guard = Some(service);
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<RemoteTool>, RemoteToolError> {
        let peer = self.peer().await?;
        let tools = peer
            .list_all_tools()
            .await
            .map_err(|e| RemoteToolError::ListTools {
                server: self.config.name.clone(),
                message: e.to_string(),
            })?;

        tools
            .iter()
            .map(|tool| {
                serde_json::to_value(tool)
                    .map(|value| remote_tool_from_value(&value))
                    .map_err(|e| RemoteToolError::ListTools {
                        server: self.config.name.clone(),
                        message: e.to_string(),
                    })
            })
            .collect()
    }

    async fn call_tool(
        &self,
        tool: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, RemoteToolError> {
        let peer = self.peer().await?;
        let call_error = |message: String| RemoteToolError::Call {
            server: self.config.name.clone(),
            tool: tool.to_string(),
            message,
        };

        let request = CallToolRequestParam {
            name: tool.to_string().into(),
            arguments: Some(arguments),
        };
        let result = tokio::time::timeout(CALL_TIMEOUT, peer.call_tool(request))
            .await
            .map_err(|_| call_error(format!("timed out after {}s", CALL_TIMEOUT.as_secs())))?
            .map_err(|e| call_error(e.to_string()))?;

        let value = serde_json::to_value(&result).map_err(|e| call_error(e.to_string()))?;
        if value.get("isError").and_then(|v| v.as_bool()) == Some(true) {
            return Err(RemoteToolError::ToolError {
                server: self.config.name.clone(),
                tool: tool.to_string(),
                message: error_text(&value),
            });
        }
        Ok(value)
    }

    async fn disconnect(&self) -> Result<(), RemoteToolError> {
        let service = self.service.lock().await.take();
        self.set_peer(None);

        if let Some(service) = service {
            service
                .cancel()
                .await
                .map_err(|e| RemoteToolError::Call {
                    server: self.config.name.clone(),
                    tool: "disconnect".to_string(),
                    message: e.to_string(),
                })?;
            tracing::info!(server = %self.config.name, "MCP server disconnected");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.live_peer().is_some()
    }
}

/// Reads a tool from its wire form, so schema changes in the protocol crate don't leak here.
fn remote_tool_from_value(value: &serde_json::Value) -> RemoteTool {
    RemoteTool {
        name: value
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        description: value
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        input_schema: value
            .get("inputSchema")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({ "type": "object", "properties": {} })),
    }
}

/// Joins the text blocks of an error result, falling back to the raw JSON.
fn error_text(result: &serde_json::Value) -> String {
    let texts: Vec<&str> = result
        .get("content")
        .and_then(|c| c.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
                .collect()
        })
        .unwrap_or_default();

    if texts.is_empty() {
        result.to_string()
    } else {
        texts.join("\n")
    }
}

/// Production factory: one rmcp-backed client per enabled server.
pub struct McpClientFactory;

impl RemoteClientFactory for McpClientFactory {
    fn create(&self, config: &McpServerConfig) -> Arc<dyn RemoteToolClient> {
        Arc::new(McpToolClient::new(config.clone()))
    }
}
