//! Metallic Core Library
//!
//! Shared functionality for the Metallic SDK and CLI:
//! - Client configuration resolution (explicit options, environment, defaults)
//! - NDJSON parsing for the code-execution event stream
//! - Common error types
//! - Tracing initialisation

pub mod config;
pub mod error;
pub mod ndjson;
pub mod tracing_init;

pub use config::{ClientConfig, ClientOptions};
pub use error::{Error, Result};
