//! # LLM Client
//!
//! OpenAI-compatible chat-completions client implementing the [`ModelClient`] port.
//!
//! [`ModelClient`]: crate::domain::traits::ModelClient

mod client;
pub mod providers;
mod types;

pub use client::Client;
pub use types::{Provider, TokenUsage};
