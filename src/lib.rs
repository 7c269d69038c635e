//! # Warden
//!
//! A coding-agent runtime: an agent loop that lets a language model run shell commands and
//! remote MCP tools, behind an approval gate and a platform sandbox.
//!
//! - Domain: configuration, types, errors and ports
//! - Infrastructure: model client, MCP client, sandboxed executor, patch engine
//! - Application: agent loop, approval gate, tool registry, logging
//! - Interface: terminal confirmation and transcript

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod interface;
pub mod strings;
