//! # Messages
//!
//! Text placed into tool results and shown to the user. The model reads the tool-result
//! strings, so they name the failing server, tool or command explicitly.

pub const NOT_CONFIRMED: &str = "not confirmed: the user declined to run this action";
pub const RUN_ABORTED: &str = "aborted: the user stopped the run before this call executed";
pub const RUN_CANCELLED: &str = "aborted: the run was cancelled while this call was in flight";

pub fn blocked_command(binary: &str) -> String {
    format!("not confirmed: command '{binary}' is blocked by configuration")
}

pub fn unknown_tool(name: &str) -> String {
    format!("unknown tool '{name}'")
}

pub fn malformed_tool_name(name: &str, reason: &str) -> String {
    format!("malformed tool name '{name}': {reason}")
}

pub fn unknown_server(server: &str, name: &str) -> String {
    format!("unknown MCP server '{server}' referenced by tool '{name}'")
}

pub fn server_not_connected(server: &str) -> String {
    format!("MCP server '{server}' is not connected")
}

pub fn unknown_remote_tool(server: &str, tool: &str) -> String {
    format!("MCP server '{server}' has no tool named '{tool}'")
}

pub fn invalid_arguments(name: &str, err: &str) -> String {
    format!("invalid arguments for tool '{name}': {err}")
}

pub fn spawn_failed(err: &str) -> String {
    format!("failed to run command: {err}")
}

pub fn outside_workspace(err: &str) -> String {
    format!("not confirmed: {err}")
}

pub fn patch_failed(err: &str) -> String {
    format!("apply_patch failed: {err}")
}

pub fn describe_command(command: &[String], workdir: &str) -> String {
    format!("Run command in {workdir}: {}", command.join(" "))
}

pub fn describe_patch(files: &[String]) -> String {
    format!("Apply patch touching: {}", files.join(", "))
}

pub fn describe_remote_call(server: &str, tool: &str, arguments: &str) -> String {
    format!("Call MCP tool '{tool}' on server '{server}' with {arguments}")
}
