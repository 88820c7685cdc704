//! The offline cache manager: install, activate and fetch handlers.
//!
//! `OfflineWorker` owns the name of the current cache bucket and the
//! manifest of assets to pre-cache. Storage and network are handed in as
//! shared handles, so several workers (for example an old and a new
//! version) can operate on the same buckets.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info, warn};

use crate::cache::CacheStorage;
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::models::{Request, StoredResponse};
use crate::net::Network;

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub cache_name: String,
    pub cached: usize,
    /// The worker asks the host to activate without waiting.
    pub skip_waiting: bool,
}

/// Where an intercepted fetch got its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Network(StoredResponse),
    Cache(StoredResponse),
}

impl FetchOutcome {
    pub fn response(&self) -> &StoredResponse {
        match self {
            FetchOutcome::Network(r) | FetchOutcome::Cache(r) => r,
        }
    }

    pub fn into_response(self) -> StoredResponse {
        match self {
            FetchOutcome::Network(r) | FetchOutcome::Cache(r) => r,
        }
    }

    pub fn is_from_cache(&self) -> bool {
        matches!(self, FetchOutcome::Cache(_))
    }

    pub fn source(&self) -> &'static str {
        match self {
            FetchOutcome::Network(_) => "network",
            FetchOutcome::Cache(_) => "cache",
        }
    }
}

pub struct OfflineWorker<S, N> {
    cache_name: String,
    manifest: Manifest,
    storage: Arc<S>,
    network: Arc<N>,
}

impl<S: CacheStorage, N: Network> OfflineWorker<S, N> {
    pub fn new(
        cache_name: impl Into<String>,
        manifest: Manifest,
        storage: Arc<S>,
        network: Arc<N>,
    ) -> Self {
        Self {
            cache_name: cache_name.into(),
            manifest,
            storage,
            network,
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn network(&self) -> &Arc<N> {
        &self.network
    }

    /// Pre-cache every manifest entry into the current bucket.
    ///
    /// All entries are fetched before anything is written. A transport
    /// failure or a non-2xx status on any entry fails the whole install
    /// and leaves storage untouched.
    pub async fn install(&self) -> Result<InstallOutcome> {
        info!(cache = %self.cache_name, entries = self.manifest.len(), "Installing offline cache");

        let fetches = self.manifest.requests().into_iter().map(|request| async move {
            match self.network.fetch(&request).await {
                Ok(response) if response.is_ok() => Ok((request, response)),
                Ok(response) => Err(Error::BadStatus {
                    url: request.url,
                    status: response.status,
                }),
                Err(source) => Err(Error::Precache {
                    url: request.url,
                    source,
                }),
            }
        });
        let entries = match try_join_all(fetches).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(cache = %self.cache_name, error = %e, "Install failed");
                return Err(e);
            }
        };

        let cached = entries.len();
        self.storage.open(&self.cache_name).await?;
        self.storage.put_all(&self.cache_name, entries).await?;

        info!(cache = %self.cache_name, cached, "Offline cache installed");
        Ok(InstallOutcome {
            cache_name: self.cache_name.clone(),
            cached,
            skip_waiting: true,
        })
    }

    /// Delete every bucket whose name differs from the current version.
    /// Returns the deleted names; an empty list means nothing was stale.
    pub async fn activate(&self) -> Result<Vec<String>> {
        let stale: Vec<String> = self
            .storage
            .keys()
            .await?
            .into_iter()
            .filter(|name| name != &self.cache_name)
            .collect();

        let deletions = stale.iter().map(|name| async move {
            let existed = self.storage.delete(name).await?;
            debug!(cache = %name, existed, "Deleted stale cache");
            Ok::<_, Error>(name.clone())
        });
        let deleted = try_join_all(deletions).await?;

        if deleted.is_empty() {
            debug!(cache = %self.cache_name, "Activated, no stale caches");
        } else {
            info!(cache = %self.cache_name, deleted = ?deleted, "Activated, evicted stale caches");
        }
        Ok(deleted)
    }

    /// Network first, falling back to any stored response on failure.
    ///
    /// Only transport failures trigger the fallback; an HTTP error status
    /// is returned as a network response. When nothing is stored for the
    /// request the original network error is returned as `Error::Offline`.
    pub async fn fetch(&self, request: &Request) -> Result<FetchOutcome> {
        let source = match self.network.fetch(request).await {
            Ok(response) => return Ok(FetchOutcome::Network(response)),
            Err(e) => e,
        };
        debug!(request = %request, error = %source, "Network failed, trying cache");

        match self.storage.match_request(request).await {
            Ok(Some(cached)) => {
                info!(request = %request, "Serving cached response");
                Ok(FetchOutcome::Cache(cached))
            }
            Ok(None) => Err(Error::Offline {
                url: request.url.clone(),
                source,
            }),
            Err(e) => {
                warn!(request = %request, error = %e, "Cache lookup failed");
                Err(Error::Offline {
                    url: request.url.clone(),
                    source,
                })
            }
        }
    }
}
