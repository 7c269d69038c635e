//! # Domain Errors
//!
//! Typed failures crossing the port boundaries. Only [`AgentError`] escapes a run; every
//! other error is turned into tool-result content by the engine.

use thiserror::Error;

/// Failure of the orchestration channel itself. Fatal to the current run.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("[{provider}] HTTP request failed: {message}")]
    Transport { provider: String, message: String },
    #[error("[{provider}] HTTP {status}: {message}")]
    Status {
        provider: String,
        status: u16,
        message: String,
    },
    #[error("[{provider}] malformed response: {message}")]
    Malformed { provider: String, message: String },
    #[error("[{provider}] {message}")]
    Config { provider: String, message: String },
}

impl ModelError {
    pub fn malformed(provider: &str, message: impl Into<String>) -> Self {
        Self::Malformed {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn config(provider: &str, message: impl Into<String>) -> Self {
        Self::Config {
            provider: provider.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteToolError {
    #[error("failed to connect to MCP server '{server}': {message}")]
    Connect { server: String, message: String },
    #[error("MCP server '{server}' is not connected")]
    NotConnected { server: String },
    #[error("MCP server '{server}' failed to list tools: {message}")]
    ListTools { server: String, message: String },
    #[error("MCP tool '{tool}' on server '{server}' failed: {message}")]
    Call {
        server: String,
        tool: String,
        message: String,
    },
    #[error("MCP tool '{tool}' on server '{server}' returned an error: {message}")]
    ToolError {
        server: String,
        tool: String,
        message: String,
    },
}

/// Spawn-level failure of a native command. Non-zero exits are not errors.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("empty command")]
    EmptyCommand,
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("no sandbox is available on this platform; refusing to run unsandboxed")]
    SandboxUnavailable,
    #[error("working directory {0} is outside the sandbox roots")]
    OutsideSandbox(std::path::PathBuf),
    #[error("failed to wait for command: {0}")]
    Wait(std::io::Error),
}

/// Errors surfaced by [`crate::application::engine::AgentLoop::run`].
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("model request failed: {0}")]
    Model(#[from] ModelError),
    #[error("agent loop has been terminated")]
    Terminated,
}
