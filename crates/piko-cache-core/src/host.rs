//! Host side of the worker lifecycle.
//!
//! The host dispatches the three lifecycle events to an `OfflineWorker`
//! and awaits each handler before treating the event as resolved:
//! - install: pre-cache, then activate straight away if the worker asked
//!   to skip waiting
//! - activate: evict stale buckets
//! - fetch: intercept requests once the worker controls them
//!
//! Install and activate take `&mut self`, fetches take `&self`. Lifecycle
//! transitions therefore never overlap with fetch traffic.

use std::fmt;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::cache::CacheStorage;
use crate::error::{Error, Result};
use crate::models::Request;
use crate::net::Network;
use crate::worker::{FetchOutcome, InstallOutcome, OfflineWorker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Parsed,
    Installing,
    /// Installed and waiting for activation.
    Installed,
    Activating,
    Activated,
    /// Install failed; the worker will never control requests.
    Redundant,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        };
        f.write_str(s)
    }
}

/// A lifecycle event as delivered by the host.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Install,
    Activate,
    Fetch(Request),
}

/// What a dispatched event resolved to.
#[derive(Debug)]
pub enum EventOutcome {
    Installed(InstallOutcome),
    Activated(Vec<String>),
    Fetched(FetchOutcome),
}

pub struct Host<S, N> {
    worker: OfflineWorker<S, N>,
    state: WorkerState,
}

impl<S: CacheStorage, N: Network> Host<S, N> {
    pub fn new(worker: OfflineWorker<S, N>) -> Self {
        Self {
            worker,
            state: WorkerState::Parsed,
        }
    }

    /// Host for a worker started again after an earlier run. A worker whose
    /// bucket already exists resumes as activated, as it did last time.
    pub async fn restore(worker: OfflineWorker<S, N>) -> Result<Self> {
        let state = if worker.storage().has(worker.cache_name()).await? {
            WorkerState::Activated
        } else {
            WorkerState::Parsed
        };
        debug!(cache = %worker.cache_name(), state = %state, "Restored worker");
        Ok(Self { worker, state })
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn worker(&self) -> &OfflineWorker<S, N> {
        &self.worker
    }

    /// Whether fetches are routed through the worker.
    pub fn is_controlling(&self) -> bool {
        self.state == WorkerState::Activated
    }

    pub async fn dispatch(&mut self, event: LifecycleEvent) -> Result<EventOutcome> {
        match event {
            LifecycleEvent::Install => self.install().await.map(EventOutcome::Installed),
            LifecycleEvent::Activate => self.activate().await.map(EventOutcome::Activated),
            LifecycleEvent::Fetch(request) => self.fetch(&request).await.map(EventOutcome::Fetched),
        }
    }

    /// Run the install handler. On success with skip-waiting the activate
    /// handler runs immediately; otherwise the worker waits in `Installed`.
    ///
    /// The install outcome stands even if that activation fails. The worker
    /// then stays `Installed` and `activate` can be retried.
    pub async fn install(&mut self) -> Result<InstallOutcome> {
        self.expect_state(&[WorkerState::Parsed], "install")?;
        self.transition(WorkerState::Installing);

        let outcome = match self.worker.install().await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.transition(WorkerState::Redundant);
                return Err(e);
            }
        };
        self.transition(WorkerState::Installed);

        if outcome.skip_waiting {
            debug!(cache = %self.worker.cache_name(), "Skipping waiting phase");
            if self.activate().await.is_err() {
                debug!(cache = %self.worker.cache_name(), "Activation deferred, worker waiting");
            }
        }
        Ok(outcome)
    }

    /// Run the activate handler. A failed activation leaves the worker
    /// installed so it can be retried.
    pub async fn activate(&mut self) -> Result<Vec<String>> {
        self.expect_state(&[WorkerState::Installed, WorkerState::Activated], "activate")?;
        let previous = self.state;
        self.transition(WorkerState::Activating);

        match self.worker.activate().await {
            Ok(deleted) => {
                self.transition(WorkerState::Activated);
                Ok(deleted)
            }
            Err(e) => {
                warn!(error = %e, "Activation failed");
                self.transition(previous);
                Err(e)
            }
        }
    }

    /// Route a request through the worker once it controls fetches;
    /// before that the request goes straight to the network.
    pub async fn fetch(&self, request: &Request) -> Result<FetchOutcome> {
        if self.is_controlling() {
            self.worker.fetch(request).await
        } else {
            debug!(request = %request, state = %self.state, "Not controlled, plain network fetch");
            let response = self.worker.network().fetch(request).await?;
            Ok(FetchOutcome::Network(response))
        }
    }

    /// Dispatch several fetches concurrently. Outcomes keep request order.
    pub async fn fetch_all(&self, requests: &[Request]) -> Vec<Result<FetchOutcome>> {
        join_all(requests.iter().map(|r| self.fetch(r))).await
    }

    fn expect_state(&self, allowed: &[WorkerState], action: &'static str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState {
                state: self.state.to_string(),
                action,
            })
        }
    }

    fn transition(&mut self, next: WorkerState) {
        info!(cache = %self.worker.cache_name(), from = %self.state, to = %next, "Worker state change");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::cache::{CachedBucket, MemoryStorage};
    use crate::error::StorageError;
    use crate::manifest::Manifest;
    use crate::models::StoredResponse;
    use crate::worker::tests::{shell_network, MockNetwork};

    /// Memory storage whose bucket listing can be made to fail.
    #[derive(Default)]
    struct FlakyStorage {
        inner: MemoryStorage,
        fail_keys: AtomicBool,
    }

    #[async_trait]
    impl CacheStorage for FlakyStorage {
        async fn open(&self, name: &str) -> std::result::Result<(), StorageError> {
            self.inner.open(name).await
        }

        async fn put_all(
            &self,
            name: &str,
            entries: Vec<(Request, StoredResponse)>,
        ) -> std::result::Result<(), StorageError> {
            self.inner.put_all(name, entries).await
        }

        async fn keys(&self) -> std::result::Result<Vec<String>, StorageError> {
            if self.fail_keys.load(Ordering::SeqCst) {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "cache directory unreadable",
                )));
            }
            self.inner.keys().await
        }

        async fn delete(&self, name: &str) -> std::result::Result<bool, StorageError> {
            self.inner.delete(name).await
        }

        async fn match_in(
            &self,
            name: &str,
            request: &Request,
        ) -> std::result::Result<Option<StoredResponse>, StorageError> {
            self.inner.match_in(name, request).await
        }

        async fn bucket(&self, name: &str) -> std::result::Result<Option<CachedBucket>, StorageError> {
            self.inner.bucket(name).await
        }
    }

    fn host(
        name: &str,
        storage: &Arc<MemoryStorage>,
        network: &Arc<MockNetwork>,
    ) -> Host<MemoryStorage, MockNetwork> {
        Host::new(OfflineWorker::new(
            name,
            Manifest::default(),
            storage.clone(),
            network.clone(),
        ))
    }

    #[tokio::test]
    async fn test_install_skips_waiting_and_activates() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(shell_network());
        let mut host = host("piko-cache-v1", &storage, &network);

        assert_eq!(host.state(), WorkerState::Parsed);
        host.install().await.unwrap();
        assert_eq!(host.state(), WorkerState::Activated);
        assert!(host.is_controlling());
    }

    #[tokio::test]
    async fn test_failed_install_is_redundant() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(MockNetwork::serving(&[("./", "<root>")]));
        let mut host = host("piko-cache-v1", &storage, &network);

        assert!(host.install().await.is_err());
        assert_eq!(host.state(), WorkerState::Redundant);
        assert!(storage.keys().await.unwrap().is_empty());

        let err = host.install().await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_uncontrolled_fetch_has_no_fallback() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .put_all(
                "piko-cache-v1",
                vec![(
                    Request::get("./"),
                    StoredResponse::new("./", 200, "<root>"),
                )],
            )
            .await
            .unwrap();
        let network = Arc::new(shell_network());
        network.set_offline(true);
        let host = host("piko-cache-v1", &storage, &network);

        let err = host.fetch(&Request::get("./")).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }

    #[tokio::test]
    async fn test_dispatch_events_in_order() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(shell_network());
        let mut host = host("piko-cache-v1", &storage, &network);

        let installed = host.dispatch(LifecycleEvent::Install).await.unwrap();
        assert!(matches!(installed, EventOutcome::Installed(ref o) if o.cached == 3));

        let activated = host.dispatch(LifecycleEvent::Activate).await.unwrap();
        assert!(matches!(activated, EventOutcome::Activated(ref d) if d.is_empty()));

        network.set_offline(true);
        let fetched = host
            .dispatch(LifecycleEvent::Fetch(Request::get("./index.html")))
            .await
            .unwrap();
        assert!(matches!(fetched, EventOutcome::Fetched(FetchOutcome::Cache(_))));
    }

    #[tokio::test]
    async fn test_restore_resumes_activated_worker() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(shell_network());

        let fresh = Host::restore(OfflineWorker::new(
            "piko-cache-v1",
            Manifest::default(),
            storage.clone(),
            network.clone(),
        ))
        .await
        .unwrap();
        assert_eq!(fresh.state(), WorkerState::Parsed);

        host("piko-cache-v1", &storage, &network).install().await.unwrap();

        let resumed = Host::restore(OfflineWorker::new(
            "piko-cache-v1",
            Manifest::default(),
            storage.clone(),
            network.clone(),
        ))
        .await
        .unwrap();
        assert!(resumed.is_controlling());
    }

    #[tokio::test]
    async fn test_activation_failure_keeps_install() {
        let storage = Arc::new(FlakyStorage::default());
        storage.fail_keys.store(true, Ordering::SeqCst);
        let network = Arc::new(shell_network());
        let mut host = Host::new(OfflineWorker::new(
            "piko-cache-v1",
            Manifest::default(),
            storage.clone(),
            network.clone(),
        ));

        let outcome = host.install().await.unwrap();
        assert_eq!(outcome.cached, 3);
        assert_eq!(host.state(), WorkerState::Installed);
        assert!(!host.is_controlling());

        storage.fail_keys.store(false, Ordering::SeqCst);
        assert!(host.activate().await.unwrap().is_empty());
        assert_eq!(host.state(), WorkerState::Activated);
    }

    #[tokio::test]
    async fn test_restored_worker_without_bucket_cannot_activate() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(shell_network());
        host("piko-cache-v1", &storage, &network).install().await.unwrap();

        let mut v2 = Host::restore(OfflineWorker::new(
            "piko-cache-v2",
            Manifest::default(),
            storage.clone(),
            network.clone(),
        ))
        .await
        .unwrap();
        let err = v2.activate().await.unwrap_err();

        assert!(matches!(err, Error::InvalidState { .. }));
        assert_eq!(storage.keys().await.unwrap(), vec!["piko-cache-v1"]);
    }

    #[tokio::test]
    async fn test_fetch_all_keeps_request_order() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(shell_network());
        let mut host = host("piko-cache-v1", &storage, &network);
        host.install().await.unwrap();
        network.set_offline(true);

        let calls_before = network.calls();
        let requests = vec![
            Request::get("./manifest.json"),
            Request::get("./orders"),
            Request::get("./"),
        ];
        let results = host.fetch_all(&requests).await;

        assert_eq!(network.calls() - calls_before, 3);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().response().text(), "{\"name\":\"piko\"}");
        assert!(results[1].as_ref().unwrap_err().is_offline());
        assert_eq!(results[2].as_ref().unwrap().response().text(), "<root>");
    }
}
