//! # Application Layer
//!
//! Contains the orchestration of an agent session.
//! This includes the agent loop, the approval gate, the tool registry and argument parsing.

pub mod approval;
pub mod command_rules;
pub mod engine;
pub mod logging;
pub mod parsing;
pub mod registry;

#[cfg(test)]
pub mod test_support;
