// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Stdio Transport - Child-Process JSON-RPC State Machine
//!
//! Each invocation spawns a fresh child speaking line-delimited JSON-RPC
//! 2.0 over stdin/stdout and walks a strict sequence:
//!
//! ```text
//! INITIALIZING --(initialize response)--> INITIALIZED
//! INITIALIZED  --(tools/call sent)------> CALLING
//! CALLING      --(tool response)--------> COMPLETE
//! ```
//!
//! The `notifications/initialized` notification must follow the
//! initialize *response*; sending it earlier causes some servers to drop
//! the connection. Descriptor environment entries are applied after the
//! host environment so the server sees its required keys even when they
//! shadow host values.
//!
//! The invocation guard owns the child and both timers; the child is
//! killed on every exit path, including cancellation, via
//! `kill_on_drop`.

use std::process::Stdio;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::domain::error::GatewayError;
use crate::domain::server::{ServerDescriptor, ToolDef};
use crate::infrastructure::broker::{parse_content, InvokeResult};

/// Protocol revision sent in the initialize handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

const INITIALIZE_ID: u64 = 1;
const CALL_ID: u64 = 2;

/// Stderr lines matching these fragments are package-manager noise and
/// are suppressed from the logs.
const STDERR_NOISE: &[&str] = &["Downloading", "Installing", "npm"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InvocationState {
    Initializing,
    Initialized,
    Calling,
    Complete,
}

/// Stdio transport configuration.
#[derive(Debug, Clone)]
pub struct StdioConfig {
    pub init_timeout: Duration,
    pub call_timeout: Duration,
    pub discovery_timeout: Duration,
    pub client_name: String,
    pub client_version: String,
}

impl Default for StdioConfig {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(120),
            discovery_timeout: Duration::from_secs(30),
            client_name: "aegis-mcp-gateway".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Spawns and drives one child process per invocation.
pub struct StdioBroker {
    config: StdioConfig,
}

impl StdioBroker {
    pub fn new(config: StdioConfig) -> Self {
        Self { config }
    }

    /// Run `initialize` / `notifications/initialized` / `tools/call`
    /// against a freshly spawned child and return the tool result.
    pub async fn invoke(
        &self,
        descriptor: &ServerDescriptor,
        tool: &str,
        arguments: Value,
        call_timeout_override: Option<Duration>,
    ) -> Result<InvokeResult, GatewayError> {
        let call_timeout = call_timeout_override.unwrap_or(self.config.call_timeout);
        let mut invocation = Invocation::spawn(descriptor, &self.config)?;
        let result = invocation.call_tool(tool, arguments, call_timeout).await;
        invocation.shutdown().await;
        metrics::counter!("gateway_stdio_invocations_total").increment(1);
        result.map(|value| parse_content(&value))
    }

    /// Briefly spawn the server and ask it for its tool catalog.
    ///
    /// Bounded by the discovery ceiling; the caller treats any failure as
    /// an empty catalog, so publish never fails on an unreachable command.
    pub async fn discover_tools(
        &self,
        descriptor: &ServerDescriptor,
    ) -> Result<Vec<ToolDef>, GatewayError> {
        let deadline = self.config.discovery_timeout;
        let discovery = async {
            let mut invocation = Invocation::spawn(descriptor, &self.config)?;
            let result = invocation.list_tools().await;
            invocation.shutdown().await;
            result
        };
        match timeout(deadline, discovery).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(format!(
                "tool discovery exceeded {}s",
                deadline.as_secs()
            ))),
        }
    }
}

/// One in-flight child invocation. Owns the child process and its timers;
/// dropping the guard kills the child.
struct Invocation {
    child: Child,
    stdin: tokio::process::ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    state: InvocationState,
    init_timeout: Duration,
    client_name: String,
    client_version: String,
}

impl Invocation {
    fn spawn(descriptor: &ServerDescriptor, config: &StdioConfig) -> Result<Self, GatewayError> {
        let command = descriptor.command.as_deref().ok_or_else(|| {
            GatewayError::PreconditionFailed(format!(
                "server '{}' has no stdio command",
                descriptor.server_id
            ))
        })?;

        let mut cmd = Command::new(command);
        cmd.args(&descriptor.args)
            .envs(std::env::vars())
            .envs(&descriptor.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            GatewayError::Internal(format!("failed to spawn '{}': {}", command, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GatewayError::Internal("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GatewayError::Internal("child stdout unavailable".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            let server = descriptor.server_id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if STDERR_NOISE.iter().any(|noise| line.contains(noise)) {
                        continue;
                    }
                    debug!(%server, "stderr: {}", line);
                }
            });
        }

        Ok(Self {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
            state: InvocationState::Initializing,
            init_timeout: config.init_timeout,
            client_name: config.client_name.clone(),
            client_version: config.client_version.clone(),
        })
    }

    async fn initialize(&mut self) -> Result<(), GatewayError> {
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": INITIALIZE_ID,
            "method": "initialize",
            "params": {
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": &self.client_name, "version": &self.client_version},
            },
        }))
        .await?;

        let response = match timeout(self.init_timeout, self.read_response(INITIALIZE_ID)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(GatewayError::Timeout(format!(
                    "server did not answer initialize within {}s",
                    self.init_timeout.as_secs()
                )))
            }
        };
        if let Some(error) = response.get("error") {
            return Err(GatewayError::Upstream(format!(
                "initialize failed: {}",
                error
            )));
        }

        // Ordering matters: initialized must follow the init response.
        self.send(&json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
        }))
        .await?;
        self.state = InvocationState::Initialized;
        Ok(())
    }

    async fn call_tool(
        &mut self,
        tool: &str,
        arguments: Value,
        call_timeout: Duration,
    ) -> Result<Value, GatewayError> {
        self.initialize().await?;

        self.send(&json!({
            "jsonrpc": "2.0",
            "id": CALL_ID,
            "method": "tools/call",
            "params": {"name": tool, "arguments": arguments},
        }))
        .await?;
        self.state = InvocationState::Calling;

        let response = match timeout(call_timeout, self.read_response(CALL_ID)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(GatewayError::Timeout(format!(
                    "tool '{}' did not answer within {}s",
                    tool,
                    call_timeout.as_secs()
                )))
            }
        };
        if let Some(error) = response.get("error") {
            return Err(GatewayError::Upstream(format!(
                "tool '{}' failed: {}",
                tool, error
            )));
        }
        self.state = InvocationState::Complete;
        response
            .get("result")
            .cloned()
            .ok_or_else(|| GatewayError::Protocol("response missing result".to_string()))
    }

    async fn list_tools(&mut self) -> Result<Vec<ToolDef>, GatewayError> {
        self.initialize().await?;
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": CALL_ID,
            "method": "tools/list",
            "params": {},
        }))
        .await?;
        self.state = InvocationState::Calling;

        let response = self.read_response(CALL_ID).await?;
        if let Some(error) = response.get("error") {
            return Err(GatewayError::Upstream(format!(
                "tools/list failed: {}",
                error
            )));
        }
        self.state = InvocationState::Complete;

        let tools = response
            .get("result")
            .and_then(|r| r.get("tools"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut catalog = Vec::with_capacity(tools.len());
        for tool in tools {
            match serde_json::from_value::<ToolDef>(tool) {
                Ok(def) => catalog.push(def),
                Err(err) => warn!(%err, "skipping undecodable tool definition"),
            }
        }
        Ok(catalog)
    }

    async fn send(&mut self, message: &Value) -> Result<(), GatewayError> {
        let mut line = message.to_string();
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| GatewayError::Protocol(format!("failed to write to child: {}", e)))
    }

    /// Read stdout line by line until the response with `id` arrives.
    /// Non-JSON lines are ignored; EOF before the response means the
    /// child exited early.
    async fn read_response(&mut self, id: u64) -> Result<Value, GatewayError> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| GatewayError::Protocol(format!("failed to read from child: {}", e)))?;
            let Some(line) = line else {
                let status = self.child.wait().await.ok();
                return Err(GatewayError::Upstream(format!(
                    "server exited before responding in state {:?} (status: {:?})",
                    self.state, status
                )));
            };
            let Ok(message) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            if message.get("id").and_then(Value::as_u64) == Some(id) {
                return Ok(message);
            }
            // Notifications and foreign ids are skipped.
        }
    }

    async fn shutdown(mut self) {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }
}
