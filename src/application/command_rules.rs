//! # Command Rules
//!
//! Configured allow/block lists for native commands. Shell scripts passed through
//! `bash -lc` and friends are split on `&&`, `||`, `;` and `|` and every segment is checked.

use std::path::Path;

use crate::domain::config::CommandsConfig;
use crate::strings::messages;

const SHELLS: &[&str] = &["sh", "bash", "zsh", "dash"];
const SHELL_SCRIPT_FLAGS: &[&str] = &["-c", "-lc", "-ic"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandVerdict {
    /// Every segment's binary is in the allow list.
    Allowed,
    Blocked(String),
    /// Neither list decides; the approval policy does.
    Unlisted,
}

#[derive(Debug, Clone, Default)]
pub struct CommandRules {
    allowed: Vec<String>,
    blocked: Vec<String>,
}

impl CommandRules {
    pub fn new(config: &CommandsConfig) -> Self {
        Self {
            allowed: config.allowed.clone(),
            blocked: config.blocked.clone(),
        }
    }

    pub fn check(&self, command: &[String]) -> CommandVerdict {
        let segments = match shell_script(command) {
            Some(script) => split_shell_commands(script),
            None => command.first().cloned().into_iter().collect(),
        };

        let binaries: Vec<&str> = segments.iter().filter_map(|s| binary_of(s)).collect();
        if binaries.is_empty() {
            return CommandVerdict::Unlisted;
        }

        // If any part is blocked, the whole chain is blocked
        if let Some(binary) = binaries
            .iter()
            .find(|b| self.blocked.iter().any(|x| x == *b))
        {
            tracing::info!(binary = %binary, "command blocked by configuration");
            return CommandVerdict::Blocked(messages::blocked_command(binary));
        }

        let escapes = shell_script(command).is_some_and(reaches_beyond_binaries);
        if !escapes
            && binaries
                .iter()
                .all(|b| self.allowed.iter().any(|x| x == *b))
        {
            return CommandVerdict::Allowed;
        }

        CommandVerdict::Unlisted
    }
}

/// The script of `bash -lc "<script>"` style invocations.
fn shell_script(command: &[String]) -> Option<&str> {
    match command {
        [shell, flag, script] => {
            let shell = Path::new(shell).file_name()?.to_str()?;
            (SHELLS.contains(&shell) && SHELL_SCRIPT_FLAGS.contains(&flag.as_str()))
                .then_some(script.as_str())
        }
        _ => None,
    }
}

/// Whether the script can run or write something its listed binaries don't show: command or
/// process substitution, redirection into a file, heredocs, or quotes left open.
fn reaches_beyond_binaries(script: &str) -> bool {
    if script.contains("<<") {
        return true;
    }
    let chars: Vec<char> = script.chars().collect();
    let mut in_single = false;
    let mut in_double = false;
    let mut i = 0;
    while i < chars.len() {
        let next = chars.get(i + 1).copied();
        match chars[i] {
            '\\' if !in_single => i += 1,
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            _ if in_single => {}
            '`' => return true,
            '$' if next == Some('(') => return true,
            _ if in_double => {}
            '<' | '>' if next == Some('(') => return true,
            '>' if !is_harmless_redirect(&chars[i + 1..]) => return true,
            _ => {}
        }
        i += 1;
    }
    in_single || in_double
}

/// What follows a `>`: duplicating or closing a descriptor, or writing to `/dev/null`.
fn is_harmless_redirect(rest: &[char]) -> bool {
    let rest: String = rest.iter().collect();
    let rest = rest
        .strip_prefix(['>', '|'])
        .unwrap_or(&rest);
    if let Some(fd) = rest.strip_prefix('&') {
        return fd.starts_with(|c: char| c.is_ascii_digit() || c == '-');
    }
    let target = rest
        .trim_start()
        .split(|c: char| c.is_whitespace() || matches!(c, ';' | '|' | '&' | ')'))
        .next()
        .unwrap_or_default();
    target == "/dev/null"
}

/// First word of a segment, skipping `sudo`, `env` and `VAR=value` prefixes.
fn binary_of(segment: &str) -> Option<&str> {
    let word = segment
        .split_whitespace()
        .find(|w| !matches!(*w, "sudo" | "env") && !is_assignment(w))?;
    Path::new(word).file_name().and_then(|n| n.to_str())
}

fn is_assignment(word: &str) -> bool {
    word.split_once('=').is_some_and(|(name, _)| {
        !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

/// Splits a shell line on `;`, `|`, `||`, `&`, `&&`, respecting quotes and heredoc bodies.
pub fn split_shell_commands(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut in_heredoc = false;
    let mut heredoc_delimiter = String::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_double && !in_heredoc => in_single = !in_single,
            '"' if !in_single && !in_heredoc => in_double = !in_double,
            '\n' => {
                if in_heredoc {
                    let last_line = current.rsplit('\n').next().unwrap_or("").trim();
                    if last_line == heredoc_delimiter {
                        in_heredoc = false;
                        heredoc_delimiter.clear();
                        flush(&mut current, &mut parts);
                        continue;
                    }
                } else if !in_single && !in_double {
                    if let Some(delimiter) = heredoc_start(&current) {
                        in_heredoc = true;
                        heredoc_delimiter = delimiter;
                    } else {
                        flush(&mut current, &mut parts);
                        continue;
                    }
                }
            }
            // `2>&1`, `<&3` and `&>` are redirections, not separators
            '&' if !in_single
                && !in_double
                && !in_heredoc
                && (current.ends_with(['>', '<']) || chars.peek() == Some(&'>')) => {}
            ';' | '|' | '&' if !in_single && !in_double && !in_heredoc => {
                if chars.peek() == Some(&c) && c != ';' {
                    chars.next();
                }
                flush(&mut current, &mut parts);
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    flush(&mut current, &mut parts);
    parts
}

fn flush(current: &mut String, parts: &mut Vec<String>) {
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    current.clear();
}

/// Delimiter of a `<< 'EOF'` opened on the current line.
fn heredoc_start(current: &str) -> Option<String> {
    let line = current.rsplit('\n').next().unwrap_or(current);
    let after = line.split("<<").nth(1)?;
    if after.starts_with('<') {
        return None;
    }
    let delimiter = after
        .trim()
        .trim_start_matches('-')
        .split_whitespace()
        .next()?
        .trim_matches(|c| c == '\'' || c == '"');
    (!delimiter.is_empty()).then(|| delimiter.to_string())
}
