//! # Execution Engine
//!
//! The agent loop. Sends the conversation and the merged tool registry to the model, runs
//! every tool call it asks for through the approval gate and the matching backend, feeds the
//! results back and repeats until the model answers without tool calls.
//!
//! Every tool call gets exactly one tool result, whatever happens to it.

use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::application::approval::{ApprovalGate, GateDecision};
use crate::application::command_rules::CommandRules;
use crate::application::parsing::{self, ShellArgs};
use crate::application::registry::ToolRegistry;
use crate::domain::config::AppConfig;
use crate::domain::errors::{AgentError, RemoteToolError};
use crate::domain::exec::{ExecRequest, SandboxMode};
use crate::domain::traits::{
    CommandExecutor, ConfirmationPort, ItemSink, ModelClient, ModelRequest, ProgressSink,
    RemoteClientFactory, RemoteToolClient,
};
use crate::domain::types::{
    ActionKind, ApprovalRequest, ConnectionState, ConversationItem, InputContent, RemoteTool,
    RunOutcome, ToolCallRequest, ToolResult, ToolTarget,
};
use crate::infrastructure::tools::workspace::WorkspaceError;
use crate::infrastructure::tools::{Workspace, patch};
use crate::strings::messages;

/// Everything the loop talks to.
#[derive(Clone)]
pub struct AgentPorts {
    pub model: Arc<dyn ModelClient>,
    pub confirm: Arc<dyn ConfirmationPort>,
    pub items: Arc<dyn ItemSink>,
    pub progress: Arc<dyn ProgressSink>,
    pub factory: Arc<dyn RemoteClientFactory>,
    pub executor: Arc<dyn CommandExecutor>,
}

struct ServerEntry {
    name: String,
    client: Arc<dyn RemoteToolClient>,
    state: ConnectionState,
    tools: Vec<RemoteTool>,
}

impl ServerEntry {
    fn is_usable(&self) -> bool {
        self.state.is_connected() && self.client.is_connected()
    }
}

pub struct AgentLoop {
    model_name: String,
    instructions: String,
    max_turns: usize,
    default_timeout: Duration,
    workspace: Workspace,
    ports: AgentPorts,
    gate: ApprovalGate,
    servers: Vec<ServerEntry>,
    history: Vec<ConversationItem>,
    terminated: bool,
}

impl AgentLoop {
    /// Creates one client per enabled server and connects them concurrently. A server that
    /// fails to connect or list its tools is logged and marked failed; the rest proceed.
    pub async fn connect(config: &AppConfig, workdir: PathBuf, ports: AgentPorts) -> Self {
        let mut servers: Vec<ServerEntry> = config
            .enabled_servers()
            .map(|server| ServerEntry {
                name: server.name.clone(),
                client: ports.factory.create(server),
                state: ConnectionState::Connecting,
                tools: Vec::new(),
            })
            .collect();

        let outcomes = join_all(
            servers
                .iter()
                .map(|entry| connect_and_discover(entry.client.clone())),
        )
        .await;

        for (entry, outcome) in servers.iter_mut().zip(outcomes) {
            match outcome {
                Ok(tools) => {
                    tracing::info!(
                        server = %entry.name,
                        tools = tools.len(),
                        "MCP server ready"
                    );
                    entry.state = ConnectionState::Connected;
                    entry.tools = tools;
                }
                Err(e) => {
                    tracing::error!(server = %entry.name, error = %e, "MCP server failed to connect");
                    entry.state = ConnectionState::Failed(e.to_string());
                }
            }
        }

        let gate = ApprovalGate::new(
            config.approval_mode,
            CommandRules::new(&config.commands),
            ports.confirm.clone(),
        );

        Self {
            model_name: config.model.model.clone(),
            instructions: config.instructions.clone(),
            max_turns: config.agent.max_turns,
            default_timeout: Duration::from_millis(config.exec.default_timeout_ms),
            workspace: Workspace::new(&workdir, &config.sandbox.writable_roots),
            ports,
            gate,
            servers,
            history: Vec::new(),
            terminated: false,
        }
    }

    pub fn history(&self) -> &[ConversationItem] {
        &self.history
    }

    /// Connection state of every constructed client, in configuration order.
    pub fn server_states(&self) -> Vec<(String, ConnectionState)> {
        self.servers
            .iter()
            .map(|entry| (entry.name.clone(), entry.state.clone()))
            .collect()
    }

    /// Rebuilt before each model request from the servers that are still connected.
    pub fn registry(&self) -> ToolRegistry {
        ToolRegistry::build(
            self.servers
                .iter()
                .filter(|entry| entry.is_usable())
                .map(|entry| (entry.name.as_str(), entry.tools.as_slice())),
        )
    }

    pub async fn run(
        &mut self,
        inputs: Vec<InputContent>,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, AgentError> {
        if self.terminated {
            return Err(AgentError::Terminated);
        }

        if !inputs.is_empty() {
            self.push(ConversationItem::User { content: inputs });
        }

        for turn in 0..self.max_turns {
            if cancel.is_cancelled() {
                return Ok(RunOutcome::Cancelled);
            }

            let registry = self.registry();
            tracing::debug!(turn, tools = registry.descriptors().len(), "requesting model");

            self.ports.progress.set_loading(true);
            let response = {
                let request = ModelRequest {
                    model: &self.model_name,
                    instructions: &self.instructions,
                    history: &self.history,
                    tools: registry.descriptors(),
                };
                tokio::select! {
                    response = self.ports.model.complete(request) => Some(response),
                    _ = cancel.cancelled() => None,
                }
            };
            self.ports.progress.set_loading(false);

            let Some(response) = response else {
                tracing::info!("run cancelled during model request");
                return Ok(RunOutcome::Cancelled);
            };
            let response = response?;
            let calls = response.tool_calls().to_vec();
            self.push(response);

            if calls.is_empty() {
                return Ok(RunOutcome::Completed);
            }

            let abort = cancel.child_token();
            let results = self.dispatch_all(&calls, &registry, cancel, &abort).await;
            for result in results {
                self.push(ConversationItem::ToolResult(result));
            }

            if cancel.is_cancelled() {
                return Ok(RunOutcome::Cancelled);
            }
            if abort.is_cancelled() {
                tracing::info!("run aborted by user");
                return Ok(RunOutcome::Aborted);
            }
        }

        tracing::warn!(max_turns = self.max_turns, "turn limit reached");
        Ok(RunOutcome::TurnLimit)
    }

    /// Disconnects every client that was ever constructed. Safe to call twice.
    pub async fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        let outcomes = join_all(self.servers.iter().map(|entry| entry.client.disconnect())).await;
        for (entry, outcome) in self.servers.iter_mut().zip(outcomes) {
            if let Err(e) = outcome {
                tracing::warn!(server = %entry.name, error = %e, "failed to disconnect MCP server");
            }
            entry.state = ConnectionState::Disconnected;
            entry.tools.clear();
        }
        self.history.clear();
        tracing::info!("agent loop terminated");
    }

    fn push(&mut self, item: ConversationItem) {
        self.ports.items.emit(&item);
        self.history.push(item);
    }

    /// Runs the calls concurrently and returns their results in request order.
    async fn dispatch_all(
        &self,
        calls: &[ToolCallRequest],
        registry: &ToolRegistry,
        cancel: &CancellationToken,
        abort: &CancellationToken,
    ) -> Vec<ToolResult> {
        join_all(
            calls
                .iter()
                .map(|call| self.dispatch(call, registry, cancel, abort)),
        )
        .await
    }

    async fn dispatch(
        &self,
        call: &ToolCallRequest,
        registry: &ToolRegistry,
        cancel: &CancellationToken,
        abort: &CancellationToken,
    ) -> ToolResult {
        if abort.is_cancelled() {
            return interrupted(call, cancel);
        }
        tracing::info!(call_id = %call.id, tool = %call.name, "dispatching tool call");

        let result = match ToolRegistry::parse_tool_name(&call.name) {
            ToolTarget::Shell => self.run_shell(call, cancel, abort).await,
            ToolTarget::Remote { server, tool } => {
                self.run_remote(call, registry, &server, &tool, cancel, abort)
                    .await
            }
            ToolTarget::Invalid(reason) => ToolResult::error(&call.id, reason),
        };

        if result.is_error {
            tracing::warn!(
                call_id = %call.id,
                tool = %call.name,
                content = %result.content,
                "tool call failed"
            );
        }
        result
    }

    async fn run_shell(
        &self,
        call: &ToolCallRequest,
        cancel: &CancellationToken,
        abort: &CancellationToken,
    ) -> ToolResult {
        let args = match parsing::parse_shell_args(&call.arguments) {
            Ok(args) => args,
            Err(e) => {
                return ToolResult::error(&call.id, messages::invalid_arguments(&call.name, &e));
            }
        };
        let workdir = match self.resolve_workdir(&args) {
            Ok(workdir) => workdir,
            Err(e) => {
                return ToolResult::error(&call.id, messages::outside_workspace(&e.to_string()));
            }
        };

        if let Some(body) = parsing::patch_body(&args.command) {
            return self.run_patch(call, body, workdir, cancel, abort).await;
        }

        let request = ApprovalRequest {
            call_id: call.id.clone(),
            description: messages::describe_command(
                &args.command,
                &workdir.display().to_string(),
            ),
            action: ActionKind::Command {
                command: args.command.clone(),
            },
        };
        let sandbox = match self.approve(call, &request, cancel, abort).await {
            Ok(sandbox) => sandbox,
            Err(result) => return result,
        };

        let exec = ExecRequest {
            command: args.command,
            root: self.workspace.root().to_path_buf(),
            workdir,
            timeout: args
                .timeout
                .map(Duration::from_millis)
                .unwrap_or(self.default_timeout),
            sandbox,
        };
        match self.ports.executor.exec(exec, abort).await {
            Ok(output) if output.cancelled => interrupted(call, cancel),
            Ok(output) => ToolResult::success(&call.id, output.to_tool_content()),
            Err(e) => ToolResult::error(&call.id, messages::spawn_failed(&e.to_string())),
        }
    }

    async fn run_patch(
        &self,
        call: &ToolCallRequest,
        body: String,
        workdir: PathBuf,
        cancel: &CancellationToken,
        abort: &CancellationToken,
    ) -> ToolResult {
        let parsed = match patch::parse_patch(&body) {
            Ok(parsed) => parsed,
            Err(e) => return ToolResult::error(&call.id, messages::patch_failed(&e.to_string())),
        };
        if let Err(e) = patch::confine_paths(&parsed, &workdir, &self.workspace) {
            return ToolResult::error(&call.id, messages::outside_workspace(&e.to_string()));
        }

        let request = ApprovalRequest {
            call_id: call.id.clone(),
            description: messages::describe_patch(&parsed.paths()),
            action: ActionKind::FileEdit { patch: body },
        };
        if let Err(result) = self.approve(call, &request, cancel, abort).await {
            return result;
        }

        let workspace = self.workspace.clone();
        let applied = tokio::task::spawn_blocking(move || {
            patch::apply_patch(&parsed, &workdir, &workspace)
        })
        .await;
        match applied {
            Ok(Ok(summary)) => ToolResult::success(&call.id, summary.render()),
            Ok(Err(e)) => ToolResult::error(&call.id, messages::patch_failed(&e.to_string())),
            Err(e) => ToolResult::error(&call.id, messages::patch_failed(&e.to_string())),
        }
    }

    async fn run_remote(
        &self,
        call: &ToolCallRequest,
        registry: &ToolRegistry,
        server: &str,
        tool: &str,
        cancel: &CancellationToken,
        abort: &CancellationToken,
    ) -> ToolResult {
        let Some(entry) = self.servers.iter().find(|entry| entry.name == server) else {
            return ToolResult::error(&call.id, messages::unknown_server(server, &call.name));
        };
        if !entry.is_usable() {
            return ToolResult::error(&call.id, messages::server_not_connected(server));
        }
        if !registry.contains(&call.name) {
            return ToolResult::error(&call.id, messages::unknown_remote_tool(server, tool));
        }

        let arguments = match parsing::parse_remote_args(&call.arguments) {
            Ok(arguments) => arguments,
            Err(e) => {
                return ToolResult::error(&call.id, messages::invalid_arguments(&call.name, &e));
            }
        };

        let request = ApprovalRequest {
            call_id: call.id.clone(),
            description: messages::describe_remote_call(
                server,
                tool,
                &serde_json::Value::Object(arguments.clone()).to_string(),
            ),
            action: ActionKind::RemoteToolCall {
                server: server.to_string(),
                tool: tool.to_string(),
            },
        };
        if let Err(result) = self.approve(call, &request, cancel, abort).await {
            return result;
        }

        let response = tokio::select! {
            response = entry.client.call_tool(tool, arguments) => response,
            _ = abort.cancelled() => return interrupted(call, cancel),
        };
        match response {
            Ok(value) => ToolResult::success(&call.id, value.to_string()),
            Err(e) => ToolResult::error(&call.id, e.to_string()),
        }
    }

    /// Runs the gate. `Err` carries the result to record instead of executing.
    async fn approve(
        &self,
        call: &ToolCallRequest,
        request: &ApprovalRequest,
        cancel: &CancellationToken,
        abort: &CancellationToken,
    ) -> Result<SandboxMode, ToolResult> {
        match self.gate.check(request, abort).await {
            GateDecision::Approved { sandbox } if !abort.is_cancelled() => Ok(sandbox),
            GateDecision::Approved { .. } | GateDecision::Interrupted => {
                Err(interrupted(call, cancel))
            }
            GateDecision::Rejected(message) => Err(ToolResult::error(&call.id, message)),
            GateDecision::Abort => {
                abort.cancel();
                Err(ToolResult::error(&call.id, messages::NOT_CONFIRMED))
            }
        }
    }

    /// The call's working directory, which must stay inside the workspace.
    fn resolve_workdir(&self, args: &ShellArgs) -> Result<PathBuf, WorkspaceError> {
        let root = self.workspace.root();
        match args.workdir.as_deref() {
            Some(dir) => self.workspace.confine(root, Path::new(dir)),
            None => Ok(root.to_path_buf()),
        }
    }
}

async fn connect_and_discover(
    client: Arc<dyn RemoteToolClient>,
) -> Result<Vec<RemoteTool>, RemoteToolError> {
    // Discovery failure counts as a failed connect; terminate() still disconnects
    client.connect().await?;
    client.list_tools().await
}

/// Result for a call stopped before it could finish.
fn interrupted(call: &ToolCallRequest, cancel: &CancellationToken) -> ToolResult {
    let message = if cancel.is_cancelled() {
        messages::RUN_CANCELLED
    } else {
        messages::RUN_ABORTED
    };
    ToolResult::error(&call.id, message)
}
