//! Error types for the Metallic SDK.
//!
//! Every failure a caller can see is one of these variants. HTTP failures are
//! normalised in one place ([`crate::client::ApiClient`]) and gRPC statuses
//! convert through `From<tonic::Status>`.

use std::time::Duration;

use metallic_core::ndjson::ExecutionError;
use thiserror::Error;

/// Result type alias using the SDK `Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// SDK error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or missing configuration. Raised before any network call.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The control plane answered with a non-2xx status.
    #[error("{message}")]
    Api {
        status: u16,
        message: String,
        /// Raw response body.
        body: String,
    },

    /// HTTP 429.
    #[error("Rate limited: {message}")]
    RateLimited { message: String, body: String },

    /// A request or body deadline was exceeded.
    #[error("{0}")]
    Timeout(String),

    /// No response was received, or the request could not be sent.
    #[error("{0}")]
    Transport(String),

    /// The agent returned a gRPC status other than OK or `DEADLINE_EXCEEDED`.
    #[error("RPC failed ({code:?}): {message}")]
    Rpc { code: tonic::Code, message: String },

    /// The agent answered but reported `success = false`.
    #[error("Agent error: {0}")]
    Remote(String),

    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Executed code raised an exception.
    #[error("Execution failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(metallic_core::Error),
}

impl Error {
    /// HTTP status for `Api` and `RateLimited` errors.
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    pub const fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Process(ProcessError::TimedOut(_))
        )
    }
}

impl From<metallic_core::Error> for Error {
    fn from(e: metallic_core::Error) -> Self {
        match e {
            metallic_core::Error::Config(msg) => Self::Config(msg),
            other => Self::Core(other),
        }
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::DeadlineExceeded => {
                Self::Timeout(format!("RPC deadline exceeded: {}", status.message()))
            }
            code => Self::Rpc {
                code,
                message: status.message().to_string(),
            },
        }
    }
}

/// Terminal failures of a process handle.
///
/// `Clone` so that every waiter observes the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessError {
    #[error("Process killed before starting")]
    KilledBeforeStart,

    #[error("Process exited without a result")]
    ExitedWithoutResult,

    #[error("Command timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),

    /// The agent sent an `ERROR` event.
    #[error("{0}")]
    Remote(String),

    /// The event stream failed at the transport level.
    #[error("Process stream failed: {0}")]
    Stream(String),
}

/// Fail with `Error::Remote` when an agent response has `success = false`.
pub(crate) fn check_success(success: bool, error: &str) -> Result<()> {
    if success {
        Ok(())
    } else {
        Err(Error::Remote(if error.is_empty() {
            "agent reported failure without a message".into()
        } else {
            error.to_string()
        }))
    }
}
