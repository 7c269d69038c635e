//! # Domain Types
//!
//! Conversation items, tool descriptors and the approval vocabulary shared by every layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the single native tool exposed to the model.
pub const SHELL_TOOL_NAME: &str = "shell";

/// Prefix of every tool discovered on a remote MCP server.
pub const MCP_TOOL_PREFIX: &str = "mcp";

/// Separator used to join the prefix, the server name and the tool name.
pub const MCP_TOOL_SEPARATOR: char = '_';

/// One piece of user-supplied input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputContent {
    Text { text: String },
    /// A URL, a `data:` URL or a local file path.
    Image { source: String },
}

impl InputContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(source: impl Into<String>) -> Self {
        Self::Image {
            source: source.into(),
        }
    }
}

/// A model-issued request to invoke a named tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Correlation id chosen by the model.
    pub id: String,
    pub name: String,
    /// Raw JSON arguments exactly as the model produced them.
    pub arguments: String,
}

/// The result of exactly one [`ToolCallRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Builds an error result whose content is a `{"error": ...}` JSON object.
    pub fn error(call_id: impl Into<String>, message: impl AsRef<str>) -> Self {
        Self {
            call_id: call_id.into(),
            content: serde_json::json!({ "error": message.as_ref() }).to_string(),
            is_error: true,
        }
    }
}

/// One unit of the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ConversationItem {
    User {
        content: Vec<InputContent>,
    },
    Assistant {
        text: Option<String>,
        #[serde(default)]
        tool_calls: Vec<ToolCallRequest>,
    },
    ToolResult(ToolResult),
}

impl ConversationItem {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::User {
            content: vec![InputContent::text(text)],
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::Assistant {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        match self {
            Self::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResult> {
        match self {
            Self::ToolResult(result) => Some(result),
            _ => None,
        }
    }
}

/// A callable capability as presented to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// A capability as reported by a remote server, before namespacing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Where a model-supplied tool name routes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolTarget {
    Shell,
    Remote { server: String, tool: String },
    Invalid(String),
}

/// Connection lifecycle of one remote tool server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Strictness of the approval gate. Fixed for the lifetime of one loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalPolicy {
    #[default]
    Suggest,
    AutoEdit,
    FullAuto,
}

impl ApprovalPolicy {
    pub fn as_str(&self) -> &str {
        match self {
            ApprovalPolicy::Suggest => "suggest",
            ApprovalPolicy::AutoEdit => "auto-edit",
            ApprovalPolicy::FullAuto => "full-auto",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "suggest" => Some(ApprovalPolicy::Suggest),
            "auto-edit" | "auto_edit" | "autoedit" => Some(ApprovalPolicy::AutoEdit),
            "full-auto" | "full_auto" | "fullauto" => Some(ApprovalPolicy::FullAuto),
            _ => None,
        }
    }
}

impl fmt::Display for ApprovalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of side effect an action has, used to key the approval table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Command { command: Vec<String> },
    FileEdit { patch: String },
    RemoteToolCall { server: String, tool: String },
}

/// What the confirmation port is asked to decide on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRequest {
    pub call_id: String,
    pub action: ActionKind,
    pub description: String,
}

/// Answer from the confirmation port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Approve,
    /// Approve, and auto-approve the identical command for the rest of the session.
    ApproveForSession,
    Reject,
    /// Reject and stop the whole run.
    Abort,
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The model produced a message without tool calls.
    Completed,
    Cancelled,
    /// The user rejected an action and asked to stop.
    Aborted,
    TurnLimit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_str() {
        assert_eq!(ApprovalPolicy::from_str("suggest"), Some(ApprovalPolicy::Suggest));
        assert_eq!(ApprovalPolicy::from_str("auto-edit"), Some(ApprovalPolicy::AutoEdit));
        assert_eq!(ApprovalPolicy::from_str("FULL_AUTO"), Some(ApprovalPolicy::FullAuto));
        assert_eq!(ApprovalPolicy::from_str("yolo"), None);
    }

    #[test]
    fn test_policy_serde_is_kebab_case() {
        let policy: ApprovalPolicy = serde_yaml::from_str("full-auto").unwrap();
        assert_eq!(policy, ApprovalPolicy::FullAuto);
        assert_eq!(serde_json::to_string(&ApprovalPolicy::AutoEdit).unwrap(), "\"auto-edit\"");
    }

    #[test]
    fn test_error_result_is_json_object() {
        let result = ToolResult::error("call_1", "boom \"quoted\"");
        assert!(result.is_error);
        let value: serde_json::Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(value["error"], "boom \"quoted\"");
    }
}
