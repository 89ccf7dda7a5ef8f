//! Client configuration resolution for Metallic.
//!
//! Every setting is resolved in this order:
//! 1. Explicit [`ClientOptions`] passed by the caller (highest priority)
//! 2. Environment variables
//! 3. Built-in defaults
//!
//! Environment access goes through a single lookup closure so resolution can
//! be tested without touching the process environment.

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default control-plane API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.metallic.dev/v1";

/// Default public domain computers are exposed under.
pub const DEFAULT_DOMAIN: &str = "metallic.computer";

/// Default control-plane request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Port the in-sandbox agent serves gRPC on.
pub const AGENT_PORT: u16 = 50051;

/// Port the code-interpreter (Jupyter) gateway listens on.
pub const JUPYTER_PORT: u16 = 49999;

/// Default deadline for reading a code execution's output stream.
pub const CODE_EXECUTION_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Default deadline for sending a code-interpreter request and receiving headers.
pub const CODE_REQUEST_TIMEOUT: Duration = Duration::from_millis(30_000);

pub const ENV_API_KEY: &str = "METALLIC_API_KEY";
pub const ENV_BASE_URL: &str = "METALLIC_BASE_URL";
pub const ENV_TIMEOUT_MS: &str = "METALLIC_TIMEOUT_MS";
pub const ENV_DOMAIN: &str = "METALLIC_DOMAIN";
/// Comma-separated `name:value` pairs appended to the default headers.
pub const ENV_HEADERS: &str = "METALLIC_HEADERS";

/// Explicit client settings. Unset fields fall back to the environment.
#[derive(Clone, Default)]
pub struct ClientOptions {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
    pub headers: Vec<(String, String)>,
    pub domain: Option<String>,
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("headers", &self.headers.len())
            .field("domain", &self.domain)
            .finish()
    }
}

/// Fully resolved client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    pub api_key: String,
    /// Base URL without a trailing slash.
    pub base_url: String,
    /// Per-request deadline. Zero disables it.
    pub timeout: Duration,
    pub headers: Vec<(String, String)>,
    pub domain: String,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("headers", &self.headers.len())
            .field("domain", &self.domain)
            .finish()
    }
}

impl ClientConfig {
    /// Resolve against the process environment.
    pub fn resolve(options: ClientOptions) -> Result<Self> {
        Self::resolve_with(options, |name| std::env::var(name).ok())
    }

    /// Resolve using `env` for every environment lookup.
    pub fn resolve_with(
        options: ClientOptions,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let lookup = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        let api_key = options
            .api_key
            .filter(|k| !k.trim().is_empty())
            .or_else(|| lookup(ENV_API_KEY))
            .ok_or_else(|| Error::Config(format!("{ENV_API_KEY} is not set")))?;

        let base_url = options
            .base_url
            .or_else(|| lookup(ENV_BASE_URL))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let timeout = match options.timeout {
            Some(t) => t,
            None => match lookup(ENV_TIMEOUT_MS) {
                Some(raw) => parse_timeout_ms(&raw)?,
                None => DEFAULT_TIMEOUT,
            },
        };

        let domain = options
            .domain
            .or_else(|| lookup(ENV_DOMAIN))
            .unwrap_or_else(|| DEFAULT_DOMAIN.to_string());

        let mut headers = options.headers;
        if let Some(raw) = lookup(ENV_HEADERS) {
            for (name, value) in parse_headers(&raw)? {
                // Explicit headers win over environment ones.
                if !headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(&name)) {
                    headers.push((name, value));
                }
            }
        }

        Ok(Self {
            api_key,
            base_url,
            timeout,
            headers,
            domain,
        })
    }

    /// Join `path` onto the base URL.
    pub fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

fn parse_timeout_ms(raw: &str) -> Result<Duration> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| Error::Config(format!("Invalid {ENV_TIMEOUT_MS} '{raw}': {e}")))
}

/// Parse `name:value` pairs separated by commas. Blank entries are skipped.
pub fn parse_headers(raw: &str) -> Result<Vec<(String, String)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, value) = entry.split_once(':').ok_or_else(|| {
                Error::Config(format!("Invalid header '{entry}' in {ENV_HEADERS}"))
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::Config(format!(
                    "Empty header name in {ENV_HEADERS}"
                )));
            }
            Ok((name.to_string(), value.trim().to_string()))
        })
        .collect()
}
