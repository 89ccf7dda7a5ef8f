//! Control-plane REST client.
//!
//! Uses reqwest with default headers for JSON and bearer auth. Every response
//! passes through [`ApiClient::send`], the single place where transport and
//! HTTP failures are turned into [`Error`] variants.

use std::sync::Arc;

use metallic_core::ClientConfig;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{Error, Result};

/// Shared HTTP client bound to one resolved configuration.
///
/// Cloning is cheap and shares the connection pool.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    /// Same headers, no overall deadline; used for long-lived response bodies.
    streaming: reqwest::Client,
    config: Arc<ClientConfig>,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let headers = default_headers(&config)?;

        // reqwest is built with rustls-no-provider; Err only means a provider
        // was already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        // A zero timeout means no deadline.
        let mut http = reqwest::Client::builder().default_headers(headers.clone());
        if !config.timeout.is_zero() {
            http = http.timeout(config.timeout);
        }
        let http = http
            .build()
            .map_err(|e| Error::Transport(format!("Request setup error: {e}")))?;
        let streaming = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Transport(format!("Request setup error: {e}")))?;

        Ok(Self {
            http,
            streaming,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn streaming_http(&self) -> &reqwest::Client {
        &self.streaming
    }

    /// Build the API URL for a given path.
    pub(crate) fn api_url(&self, path: &str) -> String {
        self.config.api_url(path)
    }

    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let req = self.http.get(self.api_url(path)).query(query);
        self.send(req).await
    }

    pub(crate) async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<T> {
        let mut req = self.http.post(self.api_url(path));
        if let Some(body) = body {
            req = req.json(body);
        }
        self.send(req).await
    }

    pub(crate) async fn put<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let req = self.http.put(self.api_url(path)).json(body);
        self.send(req).await
    }

    pub(crate) async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let req = self.http.delete(self.api_url(path));
        self.send(req).await
    }

    /// Send a request and decode a JSON body, normalising every failure.
    async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T> {
        let resp = req.send().await.map_err(|e| self.transport_error(&e))?;
        let status = resp.status();
        let body = resp.bytes().await.map_err(|e| self.transport_error(&e))?;
        debug!(status = status.as_u16(), len = body.len(), "API response");

        if !status.is_success() {
            return Err(error_from_response(
                status.as_u16(),
                &String::from_utf8_lossy(&body),
            ));
        }
        Ok(serde_json::from_slice(&body)?)
    }

    fn transport_error(&self, e: &reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(format!(
                "Request timed out after {}ms",
                self.config.timeout.as_millis()
            ))
        } else if e.is_builder() {
            Error::Transport(format!("Request setup error: {e}"))
        } else {
            Error::Transport("No response from server. Check your connection.".into())
        }
    }
}

fn default_headers(config: &ClientConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    let token = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
        .map_err(|_| Error::Config("Invalid API key format".into()))?;
    headers.insert(AUTHORIZATION, token);

    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::Config(format!("Invalid header name '{name}'")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| Error::Config(format!("Invalid value for header '{name}'")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Map a non-2xx response to the error taxonomy.
///
/// The message is the body's `message` field when present.
pub(crate) fn error_from_response(status: u16, body: &str) -> Error {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("Request failed with status {status}"));

    if status == 429 {
        Error::RateLimited {
            message,
            body: body.to_string(),
        }
    } else {
        Error::Api {
            status,
            message,
            body: body.to_string(),
        }
    }
}
