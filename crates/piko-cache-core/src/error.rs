use thiserror::Error;

/// Errors raised by the network primitive.
///
/// Only transport failures live here. A response with an HTTP error status
/// is still a response.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Invalid request URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Network unreachable for {url}: {message}")]
    Unreachable { url: String, message: String },

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors raised by a cache storage backend.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Cache bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Duplicate request in bulk store: {0}")]
    DuplicateRequest(String),

    #[error("Only GET requests can be stored (got {method} {url})")]
    UnsupportedMethod { method: String, url: String },

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt cache file {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced by the offline worker and its host.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to pre-cache {url}: {source}")]
    Precache {
        url: String,
        #[source]
        source: NetworkError,
    },

    #[error("Failed to pre-cache {url}: server answered {status}")]
    BadStatus { url: String, status: u16 },

    #[error("Offline and no cached response for {url}: {source}")]
    Offline {
        url: String,
        #[source]
        source: NetworkError,
    },

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Worker is {state}, cannot {action}")]
    InvalidState { state: String, action: &'static str },

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A specialized `Result` type for piko-cache operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True when the error means the resource was unavailable offline.
    pub fn is_offline(&self) -> bool {
        matches!(self, Error::Offline { .. })
    }
}
