//! gRPC channel to a computer's in-sandbox agent.
//!
//! One [`AgentTransport`] exists per computer and is shared by all of its
//! tools. The channel is created on first use and connects lazily, so
//! building a `Computer` never touches the network.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use metallic_core::config::AGENT_PORT;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::Request;

use crate::error::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Public hostname for `port` on a computer.
///
/// Template slugs may contain underscores, which are not valid in DNS labels.
pub fn host_for(template_slug: &str, virtual_machine_id: &str, port: u16, domain: &str) -> String {
    format!(
        "{}-{virtual_machine_id}-{port}.{domain}",
        template_slug.replace('_', "-")
    )
}

/// TLS URL of the agent's gRPC endpoint.
pub fn agent_url(template_slug: &str, virtual_machine_id: &str, domain: &str) -> String {
    format!(
        "https://{}:443",
        host_for(template_slug, virtual_machine_id, AGENT_PORT, domain)
    )
}

#[derive(Debug)]
struct Inner {
    endpoint: Endpoint,
    channel: OnceLock<Channel>,
    authorization: Option<MetadataValue<Ascii>>,
}

/// Shared, lazily connected agent channel plus bearer credentials.
#[derive(Debug, Clone)]
pub struct AgentTransport {
    inner: Arc<Inner>,
}

impl AgentTransport {
    pub fn new(url: &str, api_key: &str) -> Result<Self> {
        let mut endpoint = Endpoint::from_shared(url.to_string())
            .map_err(|e| Error::Config(format!("Invalid agent address: {e}")))?
            .connect_timeout(CONNECT_TIMEOUT)
            .http2_keep_alive_interval(Duration::from_secs(30))
            .keep_alive_timeout(Duration::from_secs(10));
        if url.starts_with("https://") {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_enabled_roots())
                .map_err(|e| Error::Config(format!("TLS config error: {e}")))?;
        }

        let authorization = format!("Bearer {api_key}").parse().ok();

        Ok(Self {
            inner: Arc::new(Inner {
                endpoint,
                channel: OnceLock::new(),
                authorization,
            }),
        })
    }

    /// The shared channel. Must be called from within a tokio runtime.
    pub fn channel(&self) -> Channel {
        self.inner
            .channel
            .get_or_init(|| self.inner.endpoint.connect_lazy())
            .clone()
    }

    /// Wrap `message` in a request carrying the bearer token.
    pub fn request<T>(&self, message: T) -> Request<T> {
        let mut req = Request::new(message);
        if let Some(auth) = &self.inner.authorization {
            req.metadata_mut().insert("authorization", auth.clone());
        }
        req
    }
}
