//! # Terminal
//!
//! Stdin/stdout implementations of the confirmation and output ports.

use async_trait::async_trait;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::domain::traits::{ConfirmationPort, ItemSink, ProgressSink};
use crate::domain::types::{
    ApprovalRequest, ConversationItem, InputContent, ReviewDecision, ToolResult,
};

const REVIEW_PROMPT: &str = "Allow? [y]es / [a]lways this session / [n]o / [q]uit run: ";
const MAX_PREVIEW_CHARS: usize = 400;

/// Maps a typed answer to a decision. Empty input declines.
pub fn parse_review(input: &str) -> Option<ReviewDecision> {
    match input.trim().to_lowercase().as_str() {
        "y" | "yes" => Some(ReviewDecision::Approve),
        "a" | "always" => Some(ReviewDecision::ApproveForSession),
        "" | "n" | "no" => Some(ReviewDecision::Reject),
        "q" | "quit" | "abort" => Some(ReviewDecision::Abort),
        _ => None,
    }
}

/// Asks on stdin. A closed or unreadable stdin declines.
pub struct TerminalConfirm;

fn read_review(description: &str) -> io::Result<ReviewDecision> {
    println!();
    println!("? {description}");
    loop {
        print!("{REVIEW_PROMPT}");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            return Ok(ReviewDecision::Reject);
        }
        match parse_review(&input) {
            Some(decision) => return Ok(decision),
            None => println!("Invalid choice"),
        }
    }
}

#[async_trait]
impl ConfirmationPort for TerminalConfirm {
    async fn confirm(&self, request: &ApprovalRequest) -> ReviewDecision {
        let description = request.description.clone();
        match tokio::task::spawn_blocking(move || read_review(&description)).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "failed to read confirmation, declining");
                ReviewDecision::Reject
            }
            Err(e) => {
                tracing::warn!(error = %e, "confirmation prompt panicked, declining");
                ReviewDecision::Reject
            }
        }
    }
}

/// Prints the transcript to stdout.
#[derive(Default)]
pub struct TerminalSink {
    loading: AtomicBool,
}

impl ItemSink for TerminalSink {
    fn emit(&self, item: &ConversationItem) {
        println!("{}", render_item(item));
    }
}

impl ProgressSink for TerminalSink {
    fn set_loading(&self, loading: bool) {
        let was = self.loading.swap(loading, Ordering::SeqCst);
        if loading && !was {
            eprintln!("… thinking");
        }
    }
}

pub fn render_item(item: &ConversationItem) -> String {
    match item {
        ConversationItem::User { content } => {
            let parts: Vec<String> = content
                .iter()
                .map(|part| match part {
                    InputContent::Text { text } => text.clone(),
                    InputContent::Image { source } => format!("[image: {source}]"),
                })
                .collect();
            format!("> {}", parts.join("\n"))
        }
        ConversationItem::Assistant { text, tool_calls } => {
            let mut lines = Vec::new();
            if let Some(text) = text.as_deref().filter(|t| !t.trim().is_empty()) {
                lines.push(text.to_string());
            }
            for call in tool_calls {
                lines.push(format!("→ {} {}", call.name, call.arguments));
            }
            lines.join("\n")
        }
        ConversationItem::ToolResult(result) => render_result(result),
    }
}

fn render_result(result: &ToolResult) -> String {
    let marker = if result.is_error { "✗" } else { "✓" };
    format!("{marker} [{}] {}", result.call_id, preview(&result.content))
}

fn preview(content: &str) -> String {
    match content.char_indices().nth(MAX_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}…", &content[..cut]),
        None => content.to_string(),
    }
}
