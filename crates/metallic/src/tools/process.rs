//! Stream-backed handle to a remote process.
//!
//! A process stream moves through `STARTING -> RUNNING -> TERMINATED`.
//! [`ProcessHandle::from_spawn_stream`] consumes events until `START`
//! supplies the pid, then [`ProcessHandle::attach`] spawns a driver task that
//! owns the stream for the rest of its life. The driver publishes exactly one
//! outcome on a watch channel; every `wait()` caller sees that same outcome.
//!
//! Control calls (`write`, `resize`, `kill`) go through [`ProcessControl`]
//! and never touch local state. Only inbound events do.

use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use metallic_proto::terminal::{ProcessEvent, ProcessEventType};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::error::{Error, ProcessError, Result};

/// Server-push stream of process events.
pub type EventStream =
    Pin<Box<dyn Stream<Item = std::result::Result<ProcessEvent, tonic::Status>> + Send>>;

type Outcome = std::result::Result<CommandResult, ProcessError>;

/// Final state of a process that exited normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    /// Everything the process wrote, decoded as UTF-8.
    pub data: String,
}

/// Observer for process events. All methods default to no-ops.
///
/// Called from the driver task, in stream order.
pub trait ProcessListener: Send + Sync + 'static {
    fn on_data(&self, _data: &str) {}
    fn on_exit(&self, _exit_code: i32) {}
    fn on_error(&self, _error: &ProcessError) {}
}

/// Listener that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl ProcessListener for NoopListener {}

/// Out-of-band control calls for a running process, keyed by pid.
#[async_trait]
pub trait ProcessControl: Send + Sync + 'static {
    async fn send_input(&self, pid: u32, input: Vec<u8>) -> Result<()>;
    async fn resize(&self, pid: u32, cols: u32, rows: u32) -> Result<()>;
    async fn signal(&self, pid: u32, signal: &str) -> Result<()>;
}

/// Live or finished remote process.
///
/// Dropping the handle stops reading the stream; the remote process is not
/// signalled.
pub struct ProcessHandle {
    pid: u32,
    output: Arc<Mutex<String>>,
    outcome: watch::Receiver<Option<Outcome>>,
    control: Arc<dyn ProcessControl>,
    driver: JoinHandle<()>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

impl ProcessHandle {
    /// Wait for `START` on a freshly spawned stream, then attach.
    pub async fn from_spawn_stream(
        mut stream: EventStream,
        control: Arc<dyn ProcessControl>,
        listener: Arc<dyn ProcessListener>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let pid = wait_for_pid(&mut stream).await?;
        debug!(pid, "Process started");
        Ok(Self::attach(pid, stream, control, listener, timeout))
    }

    /// Drive an already-running process's stream.
    ///
    /// Must be called from within a tokio runtime. A non-zero timeout is
    /// armed immediately.
    pub fn attach(
        pid: u32,
        stream: EventStream,
        control: Arc<dyn ProcessControl>,
        listener: Arc<dyn ProcessListener>,
        timeout: Option<Duration>,
    ) -> Self {
        let timeout = timeout.filter(|t| !t.is_zero());
        let output = Arc::new(Mutex::new(String::new()));
        let (tx, rx) = watch::channel(None);
        let driver = tokio::spawn(drive(Driver {
            pid,
            stream,
            control: Arc::clone(&control),
            listener,
            timeout,
            output: Arc::clone(&output),
            outcome: tx,
        }));
        Self {
            pid,
            output,
            outcome: rx,
            control,
            driver,
        }
    }

    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Output received so far.
    pub fn data(&self) -> String {
        self.output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Exit code, once the process has exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        match &*self.outcome.borrow() {
            Some(Ok(result)) => Some(result.exit_code),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// Wait for the terminal transition.
    pub async fn wait(&self) -> Result<CommandResult> {
        let mut rx = self.outcome.clone();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            // The driver went away without publishing.
            Err(_) => None,
        };
        outcome
            .unwrap_or(Err(ProcessError::ExitedWithoutResult))
            .map_err(Error::from)
    }

    /// Send raw bytes to the process's stdin.
    pub async fn write(&self, data: impl AsRef<[u8]>) -> Result<()> {
        self.control
            .send_input(self.pid, data.as_ref().to_vec())
            .await
    }

    /// Resize the process's pseudo-terminal.
    pub async fn resize(&self, cols: u32, rows: u32) -> Result<()> {
        self.control.resize(self.pid, cols, rows).await
    }

    /// Send `SIGTERM`.
    pub async fn kill(&self) -> Result<()> {
        self.signal("SIGTERM").await
    }

    /// Send a named signal such as `SIGINT` or `SIGKILL`.
    pub async fn signal(&self, signal: &str) -> Result<()> {
        self.control.signal(self.pid, signal).await
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Consume events until the pid is known.
async fn wait_for_pid(stream: &mut EventStream) -> Result<u32> {
    while let Some(event) = stream.next().await {
        let event = event?;
        match ProcessEventType::try_from(event.r#type) {
            Ok(ProcessEventType::Start) => return Ok(event.pid),
            Ok(ProcessEventType::Error) => {
                return Err(ProcessError::Remote(event.error).into());
            }
            Ok(ProcessEventType::Exit) => return Err(ProcessError::KilledBeforeStart.into()),
            Ok(ProcessEventType::Data) => {}
            Err(_) => debug!(event_type = event.r#type, "Ignoring unknown process event"),
        }
    }
    Err(ProcessError::KilledBeforeStart.into())
}

struct Driver {
    pid: u32,
    stream: EventStream,
    control: Arc<dyn ProcessControl>,
    listener: Arc<dyn ProcessListener>,
    timeout: Option<Duration>,
    output: Arc<Mutex<String>>,
    outcome: watch::Sender<Option<Outcome>>,
}

impl Driver {
    fn append(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_str(text);
        self.listener.on_data(text);
    }

    fn fail(&self, error: ProcessError) -> Outcome {
        self.listener.on_error(&error);
        Err(error)
    }
}

async fn drive(mut d: Driver) {
    let mut decoder = Utf8Decoder::default();
    let sleep = tokio::time::sleep(d.timeout.unwrap_or_default());
    tokio::pin!(sleep);

    let outcome = loop {
        tokio::select! {
            biased;

            event = d.stream.next() => match event {
                Some(Ok(event)) => match ProcessEventType::try_from(event.r#type) {
                    Ok(ProcessEventType::Data) => {
                        let text = decoder.decode(&event.data);
                        d.append(&text);
                    }
                    Ok(ProcessEventType::Exit) => {
                        d.append(&decoder.finish());
                        d.listener.on_exit(event.exit_code);
                        let data = d.output.lock().unwrap_or_else(PoisonError::into_inner).clone();
                        break Ok(CommandResult {
                            exit_code: event.exit_code,
                            data,
                        });
                    }
                    Ok(ProcessEventType::Error) => break d.fail(ProcessError::Remote(event.error)),
                    Ok(ProcessEventType::Start) => {}
                    Err(_) => debug!(pid = d.pid, event_type = event.r#type, "Ignoring unknown process event"),
                },
                Some(Err(status)) => {
                    break d.fail(ProcessError::Stream(status.message().to_string()));
                }
                None => break d.fail(ProcessError::ExitedWithoutResult),
            },

            () = &mut sleep, if d.timeout.is_some() => {
                let error = ProcessError::TimedOut(d.timeout.unwrap_or_default());
                warn!(pid = d.pid, "{error}");
                // Detached: the signal must outlive this driver, which is
                // aborted as soon as the handle is dropped.
                let control = Arc::clone(&d.control);
                let pid = d.pid;
                tokio::spawn(async move {
                    if let Err(e) = control.signal(pid, "SIGTERM").await {
                        warn!(pid, error = %e, "Failed to terminate timed-out process");
                    }
                });
                break d.fail(error);
            }
        }
    };

    debug!(pid = d.pid, ok = outcome.is_ok(), "Process terminated");
    d.outcome.send_replace(Some(outcome));
}

/// Incremental UTF-8 decoder.
///
/// Holds back an incomplete trailing sequence until the next chunk and
/// replaces invalid bytes with U+FFFD.
#[derive(Debug, Default)]
pub(crate) struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub(crate) fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Flush anything held back; an incomplete sequence becomes U+FFFD.
    pub(crate) fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
#[path = "process_tests.rs"]
mod tests;
