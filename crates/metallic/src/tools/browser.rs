//! Remote browser sessions exposed over the Chrome DevTools Protocol.

use std::collections::HashMap;
use std::time::Duration;

use metallic_proto::browser::browser_client::BrowserClient;
use metallic_proto::browser::{CreateSessionRequest, Dimensions, TerminateSessionRequest};
use serde::{Deserialize, Serialize};
use tonic::transport::Channel;
use tracing::info;

use crate::error::{Result, check_success};
use crate::transport::{AgentTransport, host_for};

/// A cookie in CDP `Network.Cookie` shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    /// `Strict`, `Lax` or `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
    /// Expiry as seconds since the epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    /// Remaining CDP cookie attributes, passed through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// State to seed a new session with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub cookies: Vec<Cookie>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub local_storage: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct BrowserLaunchOptions {
    pub block_ads: Option<bool>,
    pub context: Option<SessionContext>,
    pub proxy_url: Option<String>,
    pub custom_headers: HashMap<String, String>,
    /// Session lifetime. The agent's default is ten minutes.
    pub timeout: Option<Duration>,
    /// IANA timezone, `UTC` by default.
    pub timezone: Option<String>,
    pub user_agent: Option<String>,
    /// Window size as `(width, height)`.
    pub dimensions: Option<(u32, u32)>,
}

impl BrowserLaunchOptions {
    pub(crate) fn into_request(self) -> Result<CreateSessionRequest> {
        let context = self
            .context
            .map(|ctx| serde_json::to_string(&ctx))
            .transpose()?;
        Ok(CreateSessionRequest {
            block_ads: self.block_ads,
            context,
            proxy_url: self.proxy_url,
            custom_headers: self.custom_headers,
            timeout: self
                .timeout
                .map(|t| u32::try_from(t.as_millis()).unwrap_or(u32::MAX)),
            timezone: self.timezone,
            user_agent: self.user_agent,
            dimensions: self
                .dimensions
                .map(|(width, height)| Dimensions { width, height }),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Browser {
    transport: AgentTransport,
    template: String,
    virtual_machine_id: String,
    domain: String,
}

impl Browser {
    pub(crate) const fn new(
        transport: AgentTransport,
        template: String,
        virtual_machine_id: String,
        domain: String,
    ) -> Self {
        Self {
            transport,
            template,
            virtual_machine_id,
            domain,
        }
    }

    fn client(&self) -> BrowserClient<Channel> {
        BrowserClient::new(self.transport.channel())
    }

    /// CDP endpoint for a session listening on `cdp_port`.
    pub fn cdp_url(&self, cdp_port: u16) -> String {
        format!(
            "https://{}",
            host_for(&self.template, &self.virtual_machine_id, cdp_port, &self.domain)
        )
    }

    pub async fn launch(&self, opts: BrowserLaunchOptions) -> Result<BrowserSession> {
        let resp = self
            .client()
            .create_session(self.transport.request(opts.into_request()?))
            .await?
            .into_inner();
        check_success(resp.success, &resp.error)?;

        let port = u16::try_from(resp.cdp_port).map_err(|_| {
            crate::Error::Remote(format!("Agent returned invalid CDP port {}", resp.cdp_port))
        })?;
        let cdp_url = self.cdp_url(port);
        info!(cdp_url, "Browser session launched");
        Ok(BrowserSession {
            cdp_url,
            browser: self.clone(),
        })
    }

    /// Terminate the current session.
    pub async fn close(&self) -> Result<()> {
        let resp = self
            .client()
            .terminate_session(self.transport.request(TerminateSessionRequest {}))
            .await?
            .into_inner();
        check_success(resp.success, &resp.error)
    }
}

/// A launched browser session.
#[derive(Debug, Clone)]
pub struct BrowserSession {
    /// Chrome DevTools Protocol URL for automation clients.
    pub cdp_url: String,
    browser: Browser,
}

impl BrowserSession {
    pub async fn close(&self) -> Result<()> {
        self.browser.close().await
    }
}
