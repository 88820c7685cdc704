//! Network primitive used by the offline worker.
//!
//! The `Network` trait performs a request and yields a response or a
//! transport failure. `HttpNetwork` implements it over `reqwest`.

pub mod http;

use async_trait::async_trait;

pub use http::HttpNetwork;

use crate::error::NetworkError;
use crate::models::{Request, StoredResponse};

#[async_trait]
pub trait Network: Send + Sync {
    /// Perform the request. HTTP error statuses are responses, not errors.
    async fn fetch(&self, request: &Request) -> Result<StoredResponse, NetworkError>;
}
