use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{validate_batch, CacheStorage, CachedBucket};
use crate::error::StorageError;
use crate::models::{Request, StoredResponse};

/// Buckets kept in process memory, in creation order.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: RwLock<Vec<CachedBucket>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().await;
        if !buckets.iter().any(|b| b.name == name) {
            debug!(bucket = name, "Creating cache bucket");
            buckets.push(CachedBucket::new(name));
        }
        Ok(())
    }

    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(Request, StoredResponse)>,
    ) -> Result<(), StorageError> {
        validate_batch(&entries)?;

        // Single write guard, so readers never observe a partial batch
        let mut buckets = self.buckets.write().await;
        let index = match buckets.iter().position(|b| b.name == name) {
            Some(index) => index,
            None => {
                buckets.push(CachedBucket::new(name));
                buckets.len() - 1
            }
        };
        let bucket = &mut buckets[index];
        for (request, response) in entries {
            bucket.insert(request.url, response);
        }
        debug!(bucket = name, entries = bucket.len(), "Stored batch");
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.buckets.read().await.iter().map(|b| b.name.clone()).collect())
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();
        buckets.retain(|b| b.name != name);
        Ok(buckets.len() != before)
    }

    async fn match_in(
        &self,
        name: &str,
        request: &Request,
    ) -> Result<Option<StoredResponse>, StorageError> {
        if !request.is_cacheable() {
            return Ok(None);
        }
        let buckets = self.buckets.read().await;
        Ok(buckets
            .iter()
            .find(|b| b.name == name)
            .and_then(|b| b.get(&request.url))
            .cloned())
    }

    async fn bucket(&self, name: &str) -> Result<Option<CachedBucket>, StorageError> {
        let buckets = self.buckets.read().await;
        Ok(buckets.iter().find(|b| b.name == name).cloned())
    }
}
