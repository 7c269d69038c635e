//! # Interface Layer
//!
//! The terminal front end: prints the transcript and asks the user to review actions.

pub mod terminal;
