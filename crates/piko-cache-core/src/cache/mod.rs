//! Named cache buckets for offline response storage.
//!
//! This module provides the `CacheStorage` trait used by the offline worker
//! together with two backends:
//! - `MemoryStorage`: buckets held in process memory
//! - `DiskStorage`: one JSON file per bucket under a cache directory
//!
//! Buckets are identified by a version string and map request identifiers
//! to stored responses.

pub mod bucket;
pub mod disk;
pub mod memory;

use async_trait::async_trait;

pub use bucket::CachedBucket;
pub use disk::DiskStorage;
pub use memory::MemoryStorage;

use crate::error::StorageError;
use crate::models::{Request, StoredResponse};

/// Storage primitive behind the offline worker.
///
/// Implementations must serialize concurrent reads and writes themselves.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a bucket, creating it empty if absent.
    async fn open(&self, name: &str) -> Result<(), StorageError>;

    /// Store every entry into the bucket, creating it if needed.
    /// Either all entries land or none do.
    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(Request, StoredResponse)>,
    ) -> Result<(), StorageError>;

    /// Bucket names in creation order.
    async fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Delete a bucket. Returns false when it did not exist.
    async fn delete(&self, name: &str) -> Result<bool, StorageError>;

    /// Look up a request in one bucket.
    async fn match_in(
        &self,
        name: &str,
        request: &Request,
    ) -> Result<Option<StoredResponse>, StorageError>;

    /// The whole bucket, or `None` when it does not exist.
    async fn bucket(&self, name: &str) -> Result<Option<CachedBucket>, StorageError>;

    /// Request identifiers stored in a bucket.
    async fn entries(&self, name: &str) -> Result<Vec<String>, StorageError> {
        self.bucket(name)
            .await?
            .map(|b| b.entries.into_keys().collect())
            .ok_or_else(|| StorageError::BucketNotFound(name.to_string()))
    }

    /// Look up a request across all buckets, oldest bucket first.
    async fn match_request(&self, request: &Request) -> Result<Option<StoredResponse>, StorageError> {
        if !request.is_cacheable() {
            return Ok(None);
        }
        for name in self.keys().await? {
            if let Some(found) = self.match_in(&name, request).await? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    async fn has(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.keys().await?.iter().any(|k| k == name))
    }
}

/// Reject non-GET requests and duplicate identifiers before a bulk store.
pub(crate) fn validate_batch(entries: &[(Request, StoredResponse)]) -> Result<(), StorageError> {
    let mut seen = std::collections::HashSet::new();
    for (request, _) in entries {
        if !request.is_cacheable() {
            return Err(StorageError::UnsupportedMethod {
                method: request.method.to_string(),
                url: request.url.clone(),
            });
        }
        if !seen.insert(request.url.as_str()) {
            return Err(StorageError::DuplicateRequest(request.url.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Method;

    #[test]
    fn test_validate_batch_rejects_post() {
        let entries = vec![(
            Request::new(Method::Post, "./api"),
            StoredResponse::new("./api", 200, ""),
        )];
        assert!(matches!(
            validate_batch(&entries),
            Err(StorageError::UnsupportedMethod { .. })
        ));
    }

    #[test]
    fn test_validate_batch_rejects_duplicates() {
        let entries = vec![
            (Request::get("./"), StoredResponse::new("./", 200, "a")),
            (Request::get("./"), StoredResponse::new("./", 200, "b")),
        ];
        assert!(matches!(
            validate_batch(&entries),
            Err(StorageError::DuplicateRequest(_))
        ));
    }
}
