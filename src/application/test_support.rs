//! Scripted stand-ins for the loop's ports.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::domain::config::{AppConfig, McpServerConfig};
use crate::domain::errors::{ExecError, ModelError, RemoteToolError};
use crate::domain::exec::{ExecOutput, ExecRequest};
use crate::domain::traits::{
    CommandExecutor, ConfirmationPort, ItemSink, ModelClient, ModelRequest, ProgressSink,
    RemoteClientFactory, RemoteToolClient,
};
use crate::domain::types::{
    ApprovalRequest, ConversationItem, RemoteTool, ReviewDecision, ToolCallRequest,
};

pub fn call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest {
        id: id.to_string(),
        name: name.to_string(),
        arguments: arguments.to_string(),
    }
}

pub fn assistant_calls(calls: Vec<ToolCallRequest>) -> ConversationItem {
    ConversationItem::Assistant {
        text: None,
        tool_calls: calls,
    }
}

/// Minimal config plus extra top-level YAML.
pub fn test_config(extra: &str) -> AppConfig {
    let yaml = format!("model:\n  model: test-model\n{extra}");
    AppConfig::from_yaml(&yaml).unwrap()
}

/// What the model saw on one request.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub history: Vec<ConversationItem>,
    pub tools: Vec<String>,
}

/// Replays queued responses; answers "done" once the script runs out.
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<ConversationItem, ModelError>>>,
    seen: Mutex<Vec<SeenRequest>>,
    hang: AtomicBool,
}

impl ScriptedModel {
    pub fn new(responses: Vec<ConversationItem>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            ..Self::default()
        }
    }

    pub fn failing(error: ModelError) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from([Err(error)])),
            ..Self::default()
        }
    }

    /// Never answers.
    pub fn hanging() -> Self {
        Self {
            hang: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, request: ModelRequest<'_>) -> Result<ConversationItem, ModelError> {
        self.seen.lock().unwrap().push(SeenRequest {
            history: request.history.to_vec(),
            tools: request.tools.iter().map(|t| t.name.clone()).collect(),
        });
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let next = self.responses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(ConversationItem::assistant_text("done")))
    }
}

/// Answers from a script, then with a fallback decision.
pub struct ScriptedConfirm {
    decisions: Mutex<VecDeque<ReviewDecision>>,
    fallback: ReviewDecision,
    requests: Mutex<Vec<ApprovalRequest>>,
    delay_ms: u64,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedConfirm {
    pub fn new(decisions: Vec<ReviewDecision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into()),
            fallback: ReviewDecision::Reject,
            requests: Mutex::new(Vec::new()),
            delay_ms: 0,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn always(decision: ReviewDecision) -> Self {
        Self {
            fallback: decision,
            ..Self::new(Vec::new())
        }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn requests(&self) -> Vec<ApprovalRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfirmationPort for ScriptedConfirm {
    async fn confirm(&self, request: &ApprovalRequest) -> ReviewDecision {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let next = self.decisions.lock().unwrap().pop_front();
        next.unwrap_or(self.fallback)
    }
}

/// Records everything the loop emits.
#[derive(Default)]
pub struct RecordingSink {
    items: Mutex<Vec<ConversationItem>>,
    loading: Mutex<Vec<bool>>,
}

impl RecordingSink {
    pub fn items(&self) -> Vec<ConversationItem> {
        self.items.lock().unwrap().clone()
    }

    pub fn loading(&self) -> Vec<bool> {
        self.loading.lock().unwrap().clone()
    }
}

impl ItemSink for RecordingSink {
    fn emit(&self, item: &ConversationItem) {
        self.items.lock().unwrap().push(item.clone());
    }
}

impl ProgressSink for RecordingSink {
    fn set_loading(&self, loading: bool) {
        self.loading.lock().unwrap().push(loading);
    }
}

type CallHandler = dyn Fn(
        &str,
        &serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, String>
    + Send
    + Sync;

fn echo_tool(
    tool: &str,
    _arguments: &serde_json::Map<String, serde_json::Value>,
) -> Result<serde_json::Value, String> {
    Ok(serde_json::json!({ "tool": tool }))
}

/// In-memory remote tool server.
pub struct FakeRemoteClient {
    name: String,
    tools: Vec<RemoteTool>,
    fail_connect: bool,
    fail_list: bool,
    handler: Box<CallHandler>,
    connected: AtomicBool,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    calls: Mutex<Vec<(String, serde_json::Map<String, serde_json::Value>)>>,
}

impl FakeRemoteClient {
    pub fn new(name: &str, tools: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            tools: tools
                .iter()
                .map(|tool| RemoteTool {
                    name: tool.to_string(),
                    description: format!("{tool} tool"),
                    input_schema: serde_json::json!({"type": "object"}),
                })
                .collect(),
            fail_connect: false,
            fail_list: false,
            handler: Box::new(echo_tool),
            connected: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn failing_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &serde_json::Map<String, serde_json::Value>) -> Result<serde_json::Value, String>
            + Send
            + Sync
            + 'static,
    {
        self.handler = Box::new(handler);
        self
    }

    pub fn calls(&self) -> Vec<(String, serde_json::Map<String, serde_json::Value>)> {
        self.calls.lock().unwrap().clone()
    }

    /// Simulates the server going away mid-session.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteToolClient for FakeRemoteClient {
    fn server_name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<(), RemoteToolError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(RemoteToolError::Connect {
                server: self.name.clone(),
                message: "connection refused".to_string(),
            });
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<RemoteTool>, RemoteToolError> {
        if !self.is_connected() {
            return Err(RemoteToolError::NotConnected {
                server: self.name.clone(),
            });
        }
        if self.fail_list {
            return Err(RemoteToolError::ListTools {
                server: self.name.clone(),
                message: "method not found".to_string(),
            });
        }
        Ok(self.tools.clone())
    }

    async fn call_tool(
        &self,
        tool: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, RemoteToolError> {
        if !self.is_connected() {
            return Err(RemoteToolError::NotConnected {
                server: self.name.clone(),
            });
        }
        self.calls
            .lock()
            .unwrap()
            .push((tool.to_string(), arguments.clone()));
        (self.handler)(tool, &arguments).map_err(|message| RemoteToolError::Call {
            server: self.name.clone(),
            tool: tool.to_string(),
            message,
        })
    }

    async fn disconnect(&self) -> Result<(), RemoteToolError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Hands out pre-built fake clients by server name.
#[derive(Default)]
pub struct FakeFactory {
    clients: HashMap<String, Arc<FakeRemoteClient>>,
    created: Mutex<Vec<String>>,
}

impl FakeFactory {
    pub fn with(mut self, client: Arc<FakeRemoteClient>) -> Self {
        self.clients.insert(client.server_name().to_string(), client);
        self
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }
}

impl RemoteClientFactory for FakeFactory {
    fn create(&self, config: &McpServerConfig) -> Arc<dyn RemoteToolClient> {
        self.created.lock().unwrap().push(config.name.clone());
        match self.clients.get(&config.name) {
            Some(client) => client.clone(),
            None => Arc::new(FakeRemoteClient::new(&config.name, &[])),
        }
    }
}

/// Records requests and returns canned output. `hanging` waits for cancellation.
#[derive(Default)]
pub struct FakeExecutor {
    requests: Mutex<Vec<ExecRequest>>,
    stdout: String,
    hang: bool,
    fail_spawn: bool,
}

impl FakeExecutor {
    pub fn with_stdout(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            ..Self::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    pub fn failing_spawn() -> Self {
        Self {
            fail_spawn: true,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<ExecRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExecutor for FakeExecutor {
    async fn exec(
        &self,
        request: ExecRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, ExecError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail_spawn {
            return Err(ExecError::Spawn {
                program: request.command[0].clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            });
        }
        if self.hang {
            cancel.cancelled().await;
        }
        Ok(ExecOutput {
            stdout: self.stdout.clone(),
            stderr: String::new(),
            exit_code: if self.hang { -1 } else { 0 },
            duration: Duration::from_millis(5),
            timed_out: false,
            cancelled: self.hang,
            truncated: false,
        })
    }
}
