//! # MCP Module
//!
//! Model Context Protocol client for remote tool servers.

pub mod client;

pub use client::{McpClientFactory, McpToolClient};
