//! Metallic SDK
//!
//! Provision remote computers over the REST control plane and drive them
//! through the in-sandbox agent:
//! - [`ComputerClient`] and [`TemplateClient`] for lifecycle and templates
//! - [`Computer`] with filesystem, terminal and agent tools, plus browser or
//!   code interpreter depending on its template

pub mod client;
pub mod computer;
pub mod computers;
pub mod error;
pub mod templates;
pub mod tools;
pub mod transport;
pub mod types;

pub use client::ApiClient;
pub use computer::{Capabilities, Computer};
pub use computers::ComputerClient;
pub use error::{Error, ProcessError, Result};
pub use metallic_core::ndjson::{Chart, ExecResult, Execution, ExecutionError, Logs, ResultOutput};
pub use metallic_core::{ClientConfig, ClientOptions};
pub use templates::TemplateClient;
pub use types::*;

/// Entry point: one resolved configuration and its HTTP client.
#[derive(Debug, Clone)]
pub struct Metallic {
    pub computers: ComputerClient,
    pub templates: TemplateClient,
    api: ApiClient,
}

impl Metallic {
    /// Resolve `options` against the environment and build the client.
    ///
    /// Fails with [`Error::Config`] if no API key is available.
    pub fn new(options: ClientOptions) -> Result<Self> {
        Self::with_config(ClientConfig::resolve(options)?)
    }

    /// Configure entirely from the environment.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientOptions::default())
    }

    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let api = ApiClient::new(config)?;
        Ok(Self {
            computers: ComputerClient::new(api.clone()),
            templates: TemplateClient::new(api.clone()),
            api,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        self.api.config()
    }
}
