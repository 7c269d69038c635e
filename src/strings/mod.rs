//! # Strings Module
//!
//! Centralizes user-facing strings and tool-result messages.

pub mod messages;
