//! # Tool Registry
//!
//! The merged tool namespace offered to the model: the native `shell` tool plus every tool
//! discovered on a connected MCP server, exposed as `mcp_<server>_<tool>`.

use serde_json::json;

use crate::domain::types::{
    MCP_TOOL_PREFIX, MCP_TOOL_SEPARATOR, RemoteTool, SHELL_TOOL_NAME, ToolDescriptor, ToolTarget,
};
use crate::strings::messages;

/// Longest function name the model API accepts.
pub const MAX_TOOL_NAME_LEN: usize = 64;

#[derive(Debug, Clone)]
pub struct ToolRegistry {
    descriptors: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    /// Builds the registry from the connected servers and their discovered tools. Tools
    /// whose exposed name the model API would refuse are skipped.
    pub fn build<'a, I>(servers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [RemoteTool])>,
    {
        let mut descriptors = vec![shell_descriptor()];
        for (server, tools) in servers {
            for tool in tools {
                let name = remote_tool_name(server, &tool.name);
                if tool.name.is_empty() || !is_valid_tool_name(&name) {
                    tracing::warn!(
                        server = %server,
                        tool = %tool.name,
                        "skipping tool: name must match [A-Za-z0-9_-] and fit {MAX_TOOL_NAME_LEN} chars"
                    );
                    continue;
                }
                descriptors.push(ToolDescriptor {
                    name,
                    description: format!("[{server}] {}", tool.description),
                    parameters: tool.input_schema.clone(),
                });
            }
        }
        Self { descriptors }
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.iter().any(|d| d.name == name)
    }

    /// Resolves a model-supplied tool name. Splits at the first separator after the prefix,
    /// so server names never contain it and tool names may.
    pub fn parse_tool_name(name: &str) -> ToolTarget {
        if name == SHELL_TOOL_NAME {
            return ToolTarget::Shell;
        }

        let prefix = format!("{MCP_TOOL_PREFIX}{MCP_TOOL_SEPARATOR}");
        let Some(rest) = name.strip_prefix(&prefix) else {
            return ToolTarget::Invalid(messages::unknown_tool(name));
        };

        match rest.split_once(MCP_TOOL_SEPARATOR) {
            Some((server, tool)) if !server.is_empty() && !tool.is_empty() => ToolTarget::Remote {
                server: server.to_string(),
                tool: tool.to_string(),
            },
            Some(_) => ToolTarget::Invalid(messages::malformed_tool_name(
                name,
                "server and tool segments must not be empty",
            )),
            None => ToolTarget::Invalid(messages::malformed_tool_name(
                name,
                "expected mcp_<server>_<tool>",
            )),
        }
    }
}

fn is_valid_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_TOOL_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub fn remote_tool_name(server: &str, tool: &str) -> String {
    format!("{MCP_TOOL_PREFIX}{MCP_TOOL_SEPARATOR}{server}{MCP_TOOL_SEPARATOR}{tool}")
}

/// Descriptor of the native command tool.
pub fn shell_descriptor() -> ToolDescriptor {
    ToolDescriptor {
        name: SHELL_TOOL_NAME.to_string(),
        description: "Runs a shell command and returns its output. To edit files, pass \
                      [\"apply_patch\", \"*** Begin Patch ... *** End Patch\"] as the command."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "The command and its arguments"
                },
                "workdir": {
                    "type": "string",
                    "description": "Working directory, relative to the session root"
                },
                "timeout": {
                    "type": "number",
                    "description": "Timeout in milliseconds"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str) -> RemoteTool {
        RemoteTool {
            name: name.to_string(),
            description: format!("{name} tool"),
            input_schema: json!({"type": "object"}),
        }
    }

    #[test]
    fn test_registry_always_has_one_shell() {
        let registry = ToolRegistry::build(std::iter::empty());
        assert_eq!(registry.descriptors().len(), 1);
        assert_eq!(registry.descriptors()[0].name, "shell");
    }

    #[test]
    fn test_registry_namespaces_remote_tools() {
        let calc = vec![tool("add"), tool("sub")];
        let fs = vec![tool("read_file")];
        let registry = ToolRegistry::build([("Calc", calc.as_slice()), ("fs", fs.as_slice())]);

        let names: Vec<&str> = registry.descriptors().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["shell", "mcp_Calc_add", "mcp_Calc_sub", "mcp_fs_read_file"]);
        assert_eq!(registry.descriptors()[1].description, "[Calc] add tool");
        assert_eq!(names.iter().filter(|n| **n == "shell").count(), 1);
        assert!(registry.contains("mcp_fs_read_file"));
    }

    #[test]
    fn test_parse_tool_name() {
        assert_eq!(ToolRegistry::parse_tool_name("shell"), ToolTarget::Shell);
        assert_eq!(
            ToolRegistry::parse_tool_name("mcp_Calc_add"),
            ToolTarget::Remote {
                server: "Calc".into(),
                tool: "add".into()
            }
        );
        assert_eq!(
            ToolRegistry::parse_tool_name("mcp_fs_read_file"),
            ToolTarget::Remote {
                server: "fs".into(),
                tool: "read_file".into()
            }
        );
        for bad in ["mcp_Calc", "mcp__add", "mcp_Calc_", "browser", "mcpCalc_add"] {
            assert!(
                matches!(ToolRegistry::parse_tool_name(bad), ToolTarget::Invalid(ref reason) if reason.contains(bad)),
                "{bad} should not parse"
            );
        }
    }

    #[test]
    fn test_name_round_trips_through_parse() {
        let name = remote_tool_name("github", "create_issue");
        assert_eq!(
            ToolRegistry::parse_tool_name(&name),
            ToolTarget::Remote {
                server: "github".into(),
                tool: "create_issue".into()
            }
        );
    }

    #[test]
    fn test_tools_with_unusable_names_are_skipped() {
        let tools = vec![
            tool("read.file"),
            tool("a/b"),
            tool("has space"),
            tool(""),
            tool(&"x".repeat(MAX_TOOL_NAME_LEN)),
            tool("list-files"),
        ];
        let registry = ToolRegistry::build([("fs", tools.as_slice())]);
        let names: Vec<&str> = registry
            .descriptors()
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, vec!["shell", "mcp_fs_list-files"]);
    }
}
