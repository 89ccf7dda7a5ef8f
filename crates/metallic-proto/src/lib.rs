//! Metallic agent protocol
//!
//! Generated protobuf code for the services exposed by the agent running
//! inside every Metallic computer.
//!
//! This crate contains:
//! - `agent` for health checks, metrics and host resolution
//! - `filesystem` for file I/O, directory operations and watches
//! - `terminal` for process spawn/attach and process control
//! - `browser` for remote browser sessions

#![allow(clippy::derive_partial_eq_without_eq)]

/// `agent.Agent` messages and service.
pub mod agent {
    tonic::include_proto!("agent");
}

/// `filesystem.Filesystem` messages and service.
pub mod filesystem {
    tonic::include_proto!("filesystem");
}

/// `terminal.Terminal` messages and service.
pub mod terminal {
    tonic::include_proto!("terminal");
}

/// `browser.Browser` messages and service.
pub mod browser {
    tonic::include_proto!("browser");
}
