//! HTTP network backed by `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Url};
use tracing::debug;

use super::Network;
use crate::error::NetworkError;
use crate::models::{Method, Request, StoredResponse};

/// HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Network client for live fetches.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpNetwork {
    client: Client,
    base_url: Option<Url>,
}

impl HttpNetwork {
    /// Create a client without a base URL; only absolute identifiers resolve.
    pub fn new(timeout: Duration) -> Result<Self, NetworkError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: None,
        })
    }

    /// Resolve relative identifiers such as `./index.html` against `base`.
    pub fn with_base_url(mut self, base: &str) -> Result<Self, NetworkError> {
        let url = Url::parse(base).map_err(|e| NetworkError::InvalidUrl {
            url: base.to_string(),
            reason: e.to_string(),
        })?;
        self.base_url = Some(url);
        Ok(self)
    }

    /// Turn a request identifier into an absolute URL.
    pub fn resolve(&self, id: &str) -> Result<Url, NetworkError> {
        if let Ok(url) = Url::parse(id) {
            return Ok(url);
        }
        match self.base_url {
            Some(ref base) => base.join(id).map_err(|e| NetworkError::InvalidUrl {
                url: id.to_string(),
                reason: e.to_string(),
            }),
            None => Err(NetworkError::InvalidUrl {
                url: id.to_string(),
                reason: "relative identifier and no base URL configured".to_string(),
            }),
        }
    }

    fn method(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }

    fn classify(url: &Url, err: reqwest::Error) -> NetworkError {
        if err.is_timeout() {
            NetworkError::Timeout {
                url: url.to_string(),
            }
        } else if err.is_connect() {
            NetworkError::Unreachable {
                url: url.to_string(),
                message: err.to_string(),
            }
        } else {
            NetworkError::Http(err)
        }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<StoredResponse, NetworkError> {
        let url = self.resolve(&request.url)?;
        debug!(method = %request.method, url = %url, "Fetching from network");

        let response = self
            .client
            .request(Self::method(request.method), url.clone())
            .send()
            .await
            .map_err(|e| Self::classify(&url, e))?;

        let status = response.status();
        let final_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| Self::classify(&url, e))?;

        debug!(url = %final_url, status = status.as_u16(), bytes = body.len(), "Network response");

        Ok(StoredResponse {
            url: final_url,
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body: body.to_vec(),
            fetched_at: Utc::now(),
        })
    }
}
