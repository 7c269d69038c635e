//! # Tools Module
//!
//! Native tool execution: sandboxed commands and in-process patch application, both
//! confined to the session [`Workspace`].

pub mod executor;
pub mod patch;
pub mod sandbox;
pub mod workspace;

pub use executor::SandboxedExecutor;
pub use sandbox::SandboxKind;
pub use workspace::Workspace;
