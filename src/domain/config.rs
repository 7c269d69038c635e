//! # Configuration
//!
//! Loads and validates `config.yaml`: the model to talk to, the approval policy, the MCP
//! servers to connect to, and the limits applied to native command execution.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::types::{ApprovalPolicy, MCP_TOOL_SEPARATOR};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Main application configuration structure.
/// Matches the layout of `data/config.yaml`.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub approval_mode: ApprovalPolicy,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub exec: ExecConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>, // e.g. "OPENAI_API_KEY"
    /// Request timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_provider() -> String {
    "openai".to_string()
}

/// One remote tool server. Exactly one of `url` or `command` must be set.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct McpServerConfig {
    pub name: String,
    /// Streamable HTTP endpoint.
    #[serde(default)]
    pub url: Option<String>,
    /// Executable for a locally spawned stdio server.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub auth_token_env: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// Resolved address of a remote server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McpEndpoint {
    Http { url: String },
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
}

impl McpServerConfig {
    pub fn endpoint(&self) -> Result<McpEndpoint, ConfigError> {
        match (&self.url, &self.command) {
            (Some(url), None) => Ok(McpEndpoint::Http { url: url.clone() }),
            (None, Some(command)) => Ok(McpEndpoint::Stdio {
                command: command.clone(),
                args: self.args.clone(),
                env: self.env.clone(),
            }),
            (Some(_), Some(_)) => Err(ConfigError::Invalid(format!(
                "MCP server '{}' sets both url and command",
                self.name
            ))),
            (None, None) => Err(ConfigError::Invalid(format!(
                "MCP server '{}' needs either url or command",
                self.name
            ))),
        }
    }

    /// Authentication material, preferring the literal token over the env var.
    pub fn auth_token(&self) -> Option<String> {
        if let Some(token) = &self.auth_token {
            return Some(token.clone());
        }
        self.auth_token_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentSettings {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
        }
    }
}

fn default_max_turns() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecConfig {
    /// Applied when the model does not pass a timeout.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Cap per output stream.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_output_bytes() -> usize {
    10 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    /// Extra directories writable from inside the sandbox, besides the working directory.
    #[serde(default)]
    pub writable_roots: Vec<PathBuf>,
    #[serde(default = "default_container_script")]
    pub container_script: PathBuf,
    #[serde(default = "default_container_image")]
    pub container_image: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            writable_roots: Vec::new(),
            container_script: default_container_script(),
            container_image: default_container_image(),
        }
    }
}

impl SandboxConfig {
    /// Makes relative paths absolute against `base`, so they don't depend on the directory a
    /// command later runs in.
    pub fn anchor(&mut self, base: &Path) {
        if self.container_script.is_relative() {
            self.container_script = base.join(&self.container_script);
        }
        for root in &mut self.writable_roots {
            if root.is_relative() {
                *root = base.join(&*root);
            }
        }
    }
}

fn default_container_script() -> PathBuf {
    PathBuf::from("scripts/run_in_container.sh")
}

fn default_container_image() -> String {
    "debian:bookworm-slim".to_string()
}

/// Per-binary overrides of the approval table.
#[derive(Debug, Default, Deserialize, Clone)]
pub struct CommandsConfig {
    #[serde(default)]
    pub allowed: Vec<String>,
    #[serde(default)]
    pub blocked: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
    #[serde(default)]
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
            console: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from("data/session.log")
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml(&content)?;
        let base = std::env::current_dir().map_err(|source| ConfigError::Read {
            path: PathBuf::from("."),
            source,
        })?;
        config.sandbox.anchor(&base);
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the runtime relies on. Run once at load time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model.model must not be empty".into()));
        }
        if self.agent.max_turns == 0 {
            return Err(ConfigError::Invalid("agent.max_turns must be at least 1".into()));
        }

        let mut seen = HashSet::new();
        for server in &self.mcp_servers {
            validate_server_name(&server.name)?;
            if !seen.insert(server.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate MCP server name '{}'",
                    server.name
                )));
            }
            server.endpoint()?;
        }
        Ok(())
    }

    pub fn enabled_servers(&self) -> impl Iterator<Item = &McpServerConfig> {
        self.mcp_servers.iter().filter(|server| server.enabled)
    }
}

/// Server names become part of `mcp_<server>_<tool>`, so they may not contain the separator.
pub fn validate_server_name(name: &str) -> Result<(), ConfigError> {
    let pattern = regex::Regex::new(r"^[A-Za-z0-9-]+$")
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;
    if !pattern.is_match(name) {
        return Err(ConfigError::Invalid(format!(
            "MCP server name '{name}' must be non-empty and use only letters, digits and '-' \
             (the '{MCP_TOOL_SEPARATOR}' separator is reserved)"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
model:
  model: gpt-4o
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = AppConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.model.provider, "openai");
        assert_eq!(config.approval_mode, ApprovalPolicy::Suggest);
        assert_eq!(config.agent.max_turns, 50);
        assert_eq!(config.exec.default_timeout_ms, 10_000);
        assert!(config.mcp_servers.is_empty());
        assert!(config.commands.allowed.is_empty());
    }

    #[test]
    fn test_enabled_defaults_to_true() {
        let yaml = r#"
model:
  model: gpt-4o
approval_mode: full-auto
mcp_servers:
  - name: Calc
    url: http://localhost:8080/mcp
  - name: files
    command: npx
    args: ["-y", "@modelcontextprotocol/server-filesystem", "."]
    enabled: false
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.approval_mode, ApprovalPolicy::FullAuto);
        assert!(config.mcp_servers[0].enabled);
        assert!(!config.mcp_servers[1].enabled);
        let enabled: Vec<_> = config.enabled_servers().map(|s| s.name.as_str()).collect();
        assert_eq!(enabled, vec!["Calc"]);
        assert!(matches!(
            config.mcp_servers[1].endpoint().unwrap(),
            McpEndpoint::Stdio { ref command, .. } if command == "npx"
        ));
    }

    #[test]
    fn test_server_name_with_separator_is_rejected() {
        let yaml = r#"
model:
  model: gpt-4o
mcp_servers:
  - name: my_server
    url: http://localhost/mcp
"#;
        let err = AppConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("my_server"));
    }

    #[test]
    fn test_duplicate_server_names_are_rejected() {
        let yaml = r#"
model:
  model: gpt-4o
mcp_servers:
  - name: a
    url: http://localhost/one
  - name: a
    url: http://localhost/two
"#;
        let err = AppConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_server_needs_exactly_one_address() {
        let yaml = r#"
model:
  model: gpt-4o
mcp_servers:
  - name: broken
"#;
        assert!(AppConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_auth_token_prefers_literal() {
        let server = McpServerConfig {
            name: "a".into(),
            url: Some("http://x".into()),
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            enabled: true,
            auth_token: Some("literal".into()),
            auth_token_env: Some("WARDEN_TEST_UNSET_VAR".into()),
        };
        assert_eq!(server.auth_token().as_deref(), Some("literal"));
    }

    #[test]
    fn test_example_config_is_valid() {
        let config =
            AppConfig::from_yaml(include_str!("../../data/config.example.yaml")).unwrap();
        assert_eq!(config.approval_mode, ApprovalPolicy::Suggest);
        let enabled: Vec<_> = config.enabled_servers().map(|s| s.name.as_str()).collect();
        assert_eq!(enabled, vec!["Calc", "github"]);
        assert!(config.commands.blocked.contains(&"sudo".to_string()));
    }

    #[test]
    fn test_sandbox_paths_are_anchored_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "model:\n  model: gpt-4o\nsandbox:\n  writable_roots: [cache, /abs]\n",
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(
            config.sandbox.container_script,
            cwd.join("scripts/run_in_container.sh")
        );
        assert_eq!(
            config.sandbox.writable_roots,
            vec![cwd.join("cache"), PathBuf::from("/abs")]
        );

        let mut sandbox = SandboxConfig::default();
        sandbox.anchor(dir.path());
        assert!(sandbox.container_script.starts_with(dir.path()));
    }
}
