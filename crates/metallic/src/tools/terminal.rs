//! Remote command execution.
//!
//! Commands run under a login shell on the computer. Foreground runs wait for
//! the exit code; background spawns return a [`ProcessHandle`] as soon as the
//! agent has assigned a pid.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
pub use metallic_proto::terminal::ProcessInfo;
use metallic_proto::terminal::terminal_client::TerminalClient;
use metallic_proto::terminal::{
    ConnectToProcessRequest, ListProcessesRequest, SendInputRequest, SendSignalRequest,
    SpawnProcessRequest, UpdateProcessRequest,
};
use tonic::transport::Channel;
use tracing::{debug, info};

use super::process::{
    CommandResult, EventStream, NoopListener, ProcessControl, ProcessHandle, ProcessListener,
};
use crate::error::{Result, check_success};
use crate::transport::AgentTransport;

const SHELL: &str = "/bin/bash";
const DEFAULT_CWD: &str = "/";
const DEFAULT_COLS: u32 = 80;
const DEFAULT_ROWS: u32 = 24;

/// Options for spawning a command.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Working directory. Defaults to `/`.
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
    pub cols: Option<u32>,
    pub rows: Option<u32>,
    /// Deadline for the whole run. Zero means no deadline.
    pub timeout: Option<Duration>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn size(mut self, cols: u32, rows: u32) -> Self {
        self.cols = Some(cols);
        self.rows = Some(rows);
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Build the spawn request for `cmd` under a login shell.
pub(crate) fn spawn_request(cmd: &str, opts: &RunOptions) -> SpawnProcessRequest {
    SpawnProcessRequest {
        cmd: SHELL.into(),
        args: vec!["-l".into(), "-c".into(), cmd.into()],
        cwd: opts.cwd.clone().unwrap_or_else(|| DEFAULT_CWD.into()),
        env: opts.env.clone(),
        cols: opts.cols.unwrap_or(DEFAULT_COLS),
        rows: opts.rows.unwrap_or(DEFAULT_ROWS),
    }
}

/// [`ProcessControl`] over the agent's terminal service.
#[derive(Debug, Clone)]
struct GrpcProcessControl {
    transport: AgentTransport,
}

impl GrpcProcessControl {
    fn client(&self) -> TerminalClient<Channel> {
        TerminalClient::new(self.transport.channel())
    }
}

#[async_trait]
impl ProcessControl for GrpcProcessControl {
    async fn send_input(&self, pid: u32, input: Vec<u8>) -> Result<()> {
        let resp = self
            .client()
            .send_input(self.transport.request(SendInputRequest { pid, input }))
            .await?
            .into_inner();
        check_success(resp.success, &resp.error)
    }

    async fn resize(&self, pid: u32, cols: u32, rows: u32) -> Result<()> {
        let resp = self
            .client()
            .update_process(self.transport.request(UpdateProcessRequest { pid, cols, rows }))
            .await?
            .into_inner();
        check_success(resp.success, &resp.error)
    }

    async fn signal(&self, pid: u32, signal: &str) -> Result<()> {
        debug!(pid, signal, "Sending signal");
        let resp = self
            .client()
            .send_signal(self.transport.request(SendSignalRequest {
                pid,
                signal: signal.to_string(),
            }))
            .await?
            .into_inner();
        check_success(resp.success, &resp.error)
    }
}

#[derive(Debug, Clone)]
pub struct Terminal {
    transport: AgentTransport,
    control: Arc<GrpcProcessControl>,
}

impl Terminal {
    pub(crate) fn new(transport: AgentTransport) -> Self {
        let control = Arc::new(GrpcProcessControl {
            transport: transport.clone(),
        });
        Self { transport, control }
    }

    fn client(&self) -> TerminalClient<Channel> {
        TerminalClient::new(self.transport.channel())
    }

    /// Run `cmd` in the foreground and wait for it to exit.
    pub async fn run(&self, cmd: &str) -> Result<CommandResult> {
        self.run_with(cmd, RunOptions::default(), Arc::new(NoopListener))
            .await
    }

    /// Run `cmd` in the foreground, streaming events to `listener`.
    pub async fn run_with(
        &self,
        cmd: &str,
        opts: RunOptions,
        listener: Arc<dyn ProcessListener>,
    ) -> Result<CommandResult> {
        let handle = self.spawn_with(cmd, opts, listener).await?;
        handle.wait().await
    }

    /// Start `cmd` in the background.
    pub async fn spawn(&self, cmd: &str) -> Result<ProcessHandle> {
        self.spawn_with(cmd, RunOptions::default(), Arc::new(NoopListener))
            .await
    }

    pub async fn spawn_with(
        &self,
        cmd: &str,
        opts: RunOptions,
        listener: Arc<dyn ProcessListener>,
    ) -> Result<ProcessHandle> {
        info!(cmd, "Spawning process");
        let request = spawn_request(cmd, &opts);
        let stream = self
            .client()
            .spawn_process(self.transport.request(request))
            .await?
            .into_inner();
        ProcessHandle::from_spawn_stream(
            boxed(stream),
            Arc::clone(&self.control) as Arc<dyn ProcessControl>,
            listener,
            opts.timeout,
        )
        .await
    }

    /// Attach to a process that is already running.
    pub async fn connect(&self, pid: u32) -> Result<ProcessHandle> {
        self.connect_with(pid, Arc::new(NoopListener), None).await
    }

    pub async fn connect_with(
        &self,
        pid: u32,
        listener: Arc<dyn ProcessListener>,
        timeout: Option<Duration>,
    ) -> Result<ProcessHandle> {
        info!(pid, "Connecting to process");
        let stream = self
            .client()
            .connect_to_process(self.transport.request(ConnectToProcessRequest { pid }))
            .await?
            .into_inner();
        Ok(ProcessHandle::attach(
            pid,
            boxed(stream),
            Arc::clone(&self.control) as Arc<dyn ProcessControl>,
            listener,
            timeout,
        ))
    }

    pub async fn list_processes(&self) -> Result<Vec<ProcessInfo>> {
        let resp = self
            .client()
            .list_processes(self.transport.request(ListProcessesRequest {}))
            .await?
            .into_inner();
        check_success(resp.success, &resp.error)?;
        Ok(resp.processes)
    }
}

fn boxed(stream: tonic::Streaming<metallic_proto::terminal::ProcessEvent>) -> EventStream {
    Box::pin(stream)
}
