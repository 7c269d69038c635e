//! # Execution Types
//!
//! Request and result shapes for running a native command.

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// Whether a command runs as given or wrapped in the platform sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxMode {
    None,
    Platform,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub command: Vec<String>,
    /// Session root. The sandbox grants writes here and to the writable roots, not to
    /// `workdir` on its own.
    pub root: PathBuf,
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub sandbox: SandboxMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// `-1` when the process was killed (timeout or cancellation) or terminated by a signal.
    pub exit_code: i32,
    pub duration: Duration,
    pub timed_out: bool,
    pub cancelled: bool,
    pub truncated: bool,
}

#[derive(Serialize)]
struct ExecMetadata {
    exit_code: i32,
    duration_seconds: f64,
    timed_out: bool,
    truncated: bool,
}

impl ExecOutput {
    /// Serializes the output the way it is shown to the model.
    pub fn to_tool_content(&self) -> String {
        let mut output = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&self.stderr);
        }
        if self.timed_out {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&format!(
                "command timed out after {:.1}s",
                self.duration.as_secs_f64()
            ));
        }

        serde_json::json!({
            "output": output,
            "metadata": ExecMetadata {
                exit_code: self.exit_code,
                duration_seconds: (self.duration.as_secs_f64() * 10.0).round() / 10.0,
                timed_out: self.timed_out,
                truncated: self.truncated,
            },
        })
        .to_string()
    }
}
