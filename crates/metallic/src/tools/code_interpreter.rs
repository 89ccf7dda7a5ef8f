//! Stateful code execution through the computer's Jupyter gateway.
//!
//! `POST /execute` answers with an NDJSON body that is read until it ends.
//! Two deadlines apply: the request timeout covers sending the request and
//! receiving the response head, the execution timeout covers reading the
//! body. A zero duration disables either one.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use metallic_core::config::{CODE_EXECUTION_TIMEOUT, CODE_REQUEST_TIMEOUT, JUPYTER_PORT};
use metallic_core::ndjson::{
    ExecResult, Execution, ExecutionError, ExecutionEvent, LineBuffer, parse_line,
};
use serde::{Deserialize, Serialize};
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info};

use crate::client::error_from_response;
use crate::error::{Error, Result};
use crate::transport::host_for;

/// One line of stdout or stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputMessage {
    pub line: String,
    /// Receive time, nanoseconds since the Unix epoch.
    pub timestamp: u128,
    /// `true` for stderr.
    pub error: bool,
}

impl OutputMessage {
    fn now(line: &str, error: bool) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        Self {
            line: line.to_string(),
            timestamp,
            error,
        }
    }
}

/// Observer for a running execution, called in stream order.
pub trait ExecutionListener: Send + Sync {
    fn on_stdout(&self, _output: &OutputMessage) {}
    fn on_stderr(&self, _output: &OutputMessage) {}
    fn on_result(&self, _result: &ExecResult) {}
    fn on_error(&self, _error: &ExecutionError) {}
}

impl ExecutionListener for () {}

/// Kernel context that keeps its own variables and imports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub id: String,
    pub language: String,
    pub cwd: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunCodeOptions {
    /// Kernel language. Python when neither this nor `context` is set.
    pub language: Option<String>,
    pub context: Option<ExecutionContext>,
    pub env: HashMap<String, String>,
    /// Deadline for reading the result stream. Defaults to 60 s.
    pub timeout: Option<Duration>,
    /// Deadline for the response head. Defaults to 30 s.
    pub request_timeout: Option<Duration>,
}

impl RunCodeOptions {
    #[must_use]
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    #[must_use]
    pub fn context(mut self, context: ExecutionContext) -> Self {
        self.context = Some(context);
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateContextOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip)]
    pub request_timeout: Option<Duration>,
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    context_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<&'a str>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    env_vars: &'a HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct CodeInterpreter {
    http: reqwest::Client,
    url: String,
}

impl CodeInterpreter {
    /// `http` must carry auth headers and no overall timeout.
    pub(crate) const fn new(http: reqwest::Client, url: String) -> Self {
        Self { http, url }
    }

    pub(crate) fn for_computer(
        http: reqwest::Client,
        template: &str,
        virtual_machine_id: &str,
        domain: &str,
    ) -> Self {
        let url = format!(
            "https://{}",
            host_for(template, virtual_machine_id, JUPYTER_PORT, domain)
        );
        Self::new(http, url)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run `code` and collect its outputs.
    ///
    /// An exception raised by the code is reported in [`Execution::error`],
    /// not as `Err`; use [`Execution::into_result`] to turn it into one.
    pub async fn run(&self, code: &str, opts: RunCodeOptions) -> Result<Execution> {
        self.run_with(code, opts, &()).await
    }

    pub async fn run_with(
        &self,
        code: &str,
        opts: RunCodeOptions,
        listener: &dyn ExecutionListener,
    ) -> Result<Execution> {
        if opts.context.is_some() && opts.language.is_some() {
            return Err(Error::Config(
                "You can provide context or language, but not both at the same time.".into(),
            ));
        }

        let body = ExecuteRequest {
            code,
            context_id: opts.context.as_ref().map(|c| c.id.as_str()),
            language: opts.language.as_deref(),
            env_vars: &opts.env,
        };
        let request_timeout = opts.request_timeout.unwrap_or(CODE_REQUEST_TIMEOUT);
        let send = self
            .http
            .post(format!("{}/execute", self.url))
            .json(&body)
            .send();
        let resp = with_deadline(request_timeout, send)
            .await
            .ok_or_else(|| request_timed_out(request_timeout))?
            .map_err(|e| transport_error(&e))?;
        let resp = check_status(resp).await?;

        debug!(url = %self.url, "Reading execution stream");
        let mut execution = Execution::default();
        let body_timeout = opts.timeout.unwrap_or(CODE_EXECUTION_TIMEOUT);
        with_deadline(
            body_timeout,
            read_events(resp.bytes_stream(), &mut execution, listener),
        )
        .await
        .ok_or_else(|| {
            Error::Timeout(format!(
                "Execution timed out after {}ms",
                body_timeout.as_millis()
            ))
        })??;
        Ok(execution)
    }

    /// Create a new kernel context.
    pub async fn create_context(&self, opts: CreateContextOptions) -> Result<ExecutionContext> {
        let request_timeout = opts.request_timeout.unwrap_or(CODE_REQUEST_TIMEOUT);
        let exchange = async {
            let resp = self
                .http
                .post(format!("{}/contexts", self.url))
                .json(&opts)
                .send()
                .await
                .map_err(|e| transport_error(&e))?;
            let resp = check_status(resp).await?;
            let body = resp.bytes().await.map_err(|e| transport_error(&e))?;
            Ok::<_, Error>(serde_json::from_slice::<ExecutionContext>(&body)?)
        };
        let context = with_deadline(request_timeout, exchange)
            .await
            .ok_or_else(|| request_timed_out(request_timeout))??;
        info!(id = %context.id, language = %context.language, "Created execution context");
        Ok(context)
    }
}

/// `None` when `limit` elapses first. A zero limit never elapses.
async fn with_deadline<F: Future>(limit: Duration, fut: F) -> Option<F::Output> {
    if limit.is_zero() {
        Some(fut.await)
    } else {
        tokio::time::timeout(limit, fut).await.ok()
    }
}

fn request_timed_out(limit: Duration) -> Error {
    Error::Timeout(format!("Request timed out after {}ms", limit.as_millis()))
}

fn transport_error(e: &reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("Request timed out: {e}"))
    } else {
        Error::Transport(format!("Code interpreter request failed: {e}"))
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = match resp.text().await {
        Ok(body) => body,
        Err(e) => {
            debug!(status = status.as_u16(), error = %e, "Failed to read error response body");
            format!("<unreadable body: {e}>")
        }
    };
    Err(error_from_response(status.as_u16(), &body))
}

/// Fold an NDJSON body into `execution`, notifying `listener` per event.
pub(crate) async fn read_events<S, B>(
    stream: S,
    execution: &mut Execution,
    listener: &dyn ExecutionListener,
) -> Result<()>
where
    S: Stream<Item = std::result::Result<B, reqwest::Error>>,
    B: AsRef<[u8]>,
{
    tokio::pin!(stream);
    let mut lines = LineBuffer::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| transport_error(&e))?;
        for line in lines.push(chunk.as_ref()) {
            handle_line(&line, execution, listener)?;
        }
    }
    if let Some(rest) = lines.finish() {
        handle_line(&rest, execution, listener)?;
    }
    Ok(())
}

fn handle_line(
    line: &str,
    execution: &mut Execution,
    listener: &dyn ExecutionListener,
) -> Result<()> {
    if line.trim().is_empty() {
        return Ok(());
    }
    let event = parse_line(line)?;
    match &event {
        ExecutionEvent::Stdout { text } => listener.on_stdout(&OutputMessage::now(text, false)),
        ExecutionEvent::Stderr { text } => listener.on_stderr(&OutputMessage::now(text, true)),
        ExecutionEvent::Result(result) => listener.on_result(result),
        ExecutionEvent::Error(error) => listener.on_error(error),
        ExecutionEvent::NumberOfExecutions { .. } => {}
        ExecutionEvent::Unknown { msg_type, .. } => {
            debug!(msg_type, "Skipping unknown execution event");
        }
    }
    execution.apply(&event);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
#[path = "code_interpreter_tests.rs"]
mod tests;
