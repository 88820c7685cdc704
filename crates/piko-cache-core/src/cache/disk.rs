use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{validate_batch, CacheStorage, CachedBucket};
use crate::error::StorageError;
use crate::models::{Request, StoredResponse};

/// Extension used for bucket files.
const BUCKET_EXT: &str = "json";

/// Buckets persisted as one JSON file each under a cache directory.
///
/// Every write goes to a sibling temp file that is renamed over the bucket
/// file, so a crash mid-write leaves the previous contents intact.
///
/// A bucket's name comes from its file name, not its contents. A file that
/// no longer parses is still listed by `keys` and can be deleted; writes to
/// it replace it with a fresh bucket.
pub struct DiskStorage {
    cache_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl DiskStorage {
    pub async fn new(cache_dir: PathBuf) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(&cache_dir).await?;
        Ok(Self {
            cache_dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Escape a bucket name so any version string maps to exactly one
    /// safe file stem.
    fn escape(name: &str) -> String {
        let mut stem = String::with_capacity(name.len());
        for b in name.bytes() {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
                stem.push(b as char);
            } else {
                stem.push_str(&format!("%{:02X}", b));
            }
        }
        stem
    }

    /// Reverse of `escape`. Stems that `escape` could not have produced
    /// yield `None`.
    fn unescape(stem: &str) -> Option<String> {
        let bytes = stem.as_bytes();
        let mut out = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'%' {
                let hex = stem.get(i + 1..i + 3)?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            } else {
                out.push(bytes[i]);
                i += 1;
            }
        }
        let name = String::from_utf8(out).ok()?;
        (Self::escape(&name) == stem).then_some(name)
    }

    fn bucket_path(&self, name: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{}", Self::escape(name), BUCKET_EXT))
    }

    /// Bucket name for a file in the cache directory, if it is a bucket file.
    fn bucket_name(path: &Path) -> Option<String> {
        if path.extension().and_then(|e| e.to_str()) != Some(BUCKET_EXT) {
            return None;
        }
        Self::unescape(path.file_stem()?.to_str()?)
    }

    async fn load_path(path: &Path) -> Result<Option<CachedBucket>, StorageError> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let bucket = serde_json::from_str(&contents).map_err(|source| StorageError::Corrupt {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Some(bucket))
    }

    async fn load(&self, name: &str) -> Result<Option<CachedBucket>, StorageError> {
        Self::load_path(&self.bucket_path(name)).await
    }

    /// Load a bucket about to be rewritten. A corrupt file counts as absent.
    async fn load_for_write(&self, name: &str) -> Result<Option<CachedBucket>, StorageError> {
        match self.load(name).await {
            Err(StorageError::Corrupt { path, source }) => {
                warn!(bucket = name, path = %path, error = %source, "Replacing corrupt bucket file");
                Ok(None)
            }
            other => other,
        }
    }

    async fn save(&self, bucket: &CachedBucket) -> Result<(), StorageError> {
        let path = self.bucket_path(&bucket.name);
        let tmp = path.with_extension("tmp");
        let contents = serde_json::to_vec_pretty(bucket)?;
        tokio::fs::write(&tmp, contents).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Every bucket file on disk, oldest first. Corrupt files carry `None`
    /// and sort ahead of readable ones.
    async fn scan(&self) -> Result<Vec<(String, Option<CachedBucket>)>, StorageError> {
        let mut found = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.cache_dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            let Some(name) = Self::bucket_name(&path) else {
                continue;
            };
            match Self::load_path(&path).await {
                Ok(Some(bucket)) => found.push((name, Some(bucket))),
                Ok(None) => {}
                Err(StorageError::Corrupt { source, .. }) => {
                    warn!(bucket = %name, path = %path.display(), error = %source, "Unreadable bucket file");
                    found.push((name, None));
                }
                Err(e) => return Err(e),
            }
        }
        found.sort_by(|(a_name, a), (b_name, b)| {
            let a_created: Option<DateTime<Utc>> = a.as_ref().map(|bucket| bucket.created_at);
            let b_created: Option<DateTime<Utc>> = b.as_ref().map(|bucket| bucket.created_at);
            a_created.cmp(&b_created).then_with(|| a_name.cmp(b_name))
        });
        Ok(found)
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        if self.load_for_write(name).await?.is_none() {
            debug!(bucket = name, dir = %self.cache_dir.display(), "Creating cache bucket");
            self.save(&CachedBucket::new(name)).await?;
        }
        Ok(())
    }

    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(Request, StoredResponse)>,
    ) -> Result<(), StorageError> {
        validate_batch(&entries)?;

        let _guard = self.write_lock.lock().await;
        let mut bucket = self
            .load_for_write(name)
            .await?
            .unwrap_or_else(|| CachedBucket::new(name));
        bucket.name = name.to_string();
        for (request, response) in entries {
            bucket.insert(request.url, response);
        }
        self.save(&bucket).await?;
        debug!(bucket = name, entries = bucket.len(), "Stored batch");
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.scan().await?.into_iter().map(|(name, _)| name).collect())
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.bucket_path(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn match_in(
        &self,
        name: &str,
        request: &Request,
    ) -> Result<Option<StoredResponse>, StorageError> {
        if !request.is_cacheable() {
            return Ok(None);
        }
        Ok(self
            .load(name)
            .await?
            .and_then(|mut b| b.entries.remove(&request.url)))
    }

    async fn bucket(&self, name: &str) -> Result<Option<CachedBucket>, StorageError> {
        self.load(name).await
    }

    async fn match_request(&self, request: &Request) -> Result<Option<StoredResponse>, StorageError> {
        if !request.is_cacheable() {
            return Ok(None);
        }
        for (_, bucket) in self.scan().await? {
            if let Some(found) = bucket.and_then(|mut b| b.entries.remove(&request.url)) {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}
