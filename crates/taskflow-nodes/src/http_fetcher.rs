//! HTTP-backed fetcher
//!
//! Sends handler requests to the canvas backend with `reqwest`. Paths are
//! joined onto a base URL, bodies go out as JSON and responses are decoded as
//! JSON.

use async_trait::async_trait;
use serde_json::Value;
use taskflow_engine::{FetchError, FetchMethod, FetchRequest, Fetcher};

/// Default backend base URL
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// [`Fetcher`] that talks to the backend over HTTP
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpFetcher {
    /// Create a fetcher for the backend at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Use a preconfigured client (proxies, timeouts, TLS)
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer_token: None,
        }
    }

    /// Authenticate every request with a bearer token
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL for a request path
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<Value, FetchError> {
        let url = self.url_for(&request.path);
        log::debug!("HttpFetcher: {:?} {}", request.method, url);

        let mut builder = match request.method {
            FetchMethod::Get => self.client.get(&url),
            FetchMethod::Post => self.client.post(&url),
        };
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FetchError::Transport(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            log::warn!("HttpFetcher: {} returned {}", url, status);
            return Err(FetchError::Status {
                path: request.path,
                status,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}
