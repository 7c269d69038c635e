//! # Parsing Utils
//!
//! Decodes the JSON argument strings the model attaches to tool calls, and recognizes
//! `apply_patch` invocations inside shell commands.

use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

use crate::infrastructure::tools::patch;

const APPLY_PATCH: &str = "apply_patch";

/// `apply_patch <<'EOF' ... EOF` as emitted through `bash -lc`.
static HEREDOC_PATCH: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?s)^\s*apply_patch\s+<<-?\s*['"]?(\w+)['"]?\s*\n(.*)\n\s*(\w+)\s*$"#).ok()
});

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CommandArg {
    Argv(Vec<String>),
    Line(String),
}

#[derive(Debug, Deserialize)]
struct RawShellArgs {
    command: CommandArg,
    #[serde(default)]
    workdir: Option<String>,
    #[serde(default)]
    timeout: Option<u64>,
}

/// Arguments of the native `shell` tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellArgs {
    pub command: Vec<String>,
    pub workdir: Option<String>,
    /// Milliseconds.
    pub timeout: Option<u64>,
}

pub fn parse_shell_args(raw: &str) -> Result<ShellArgs, String> {
    let args: RawShellArgs = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    let command = match args.command {
        CommandArg::Argv(argv) => argv,
        // A bare command line is run through the shell
        CommandArg::Line(line) => vec!["bash".to_string(), "-lc".to_string(), line],
    };
    if command.first().is_none_or(|program| program.trim().is_empty()) {
        return Err("`command` must not be empty".to_string());
    }
    Ok(ShellArgs {
        command,
        workdir: args.workdir.filter(|w| !w.trim().is_empty()),
        timeout: args.timeout,
    })
}

/// Remote tool arguments must be a JSON object; an empty string means no arguments.
pub fn parse_remote_args(raw: &str) -> Result<serde_json::Map<String, serde_json::Value>, String> {
    if raw.trim().is_empty() {
        return Ok(serde_json::Map::new());
    }
    match serde_json::from_str::<serde_json::Value>(raw).map_err(|e| e.to_string())? {
        serde_json::Value::Object(map) => Ok(map),
        serde_json::Value::Null => Ok(serde_json::Map::new()),
        other => Err(format!("expected a JSON object, got {other}")),
    }
}

/// Returns the patch text when `command` is an `apply_patch` invocation.
pub fn patch_body(command: &[String]) -> Option<String> {
    match command {
        [program, body] if program == APPLY_PATCH => Some(body.clone()),
        [program, rest @ ..] if program == APPLY_PATCH && patch::is_patch(&rest.join("\n")) => {
            Some(rest.join("\n"))
        }
        [shell, flag, script]
            if matches!(shell.as_str(), "bash" | "sh" | "zsh") && flag.ends_with('c') =>
        {
            heredoc_patch(script)
        }
        _ => None,
    }
}

fn heredoc_patch(script: &str) -> Option<String> {
    let caps = HEREDOC_PATCH.as_ref()?.captures(script)?;
    let (open, body, close) = (caps.get(1)?, caps.get(2)?, caps.get(3)?);
    (open.as_str() == close.as_str()).then(|| body.as_str().to_string())
}
