//! Piko offline cache core library.
//!
//! Pre-caches a fixed manifest of assets into a versioned bucket on install,
//! evicts buckets from older versions on activation, and serves cached
//! responses when a live network request fails.
//!
//! The pieces:
//! - `worker`: the `OfflineWorker` lifecycle handlers (install, activate, fetch)
//! - `host`: dispatches lifecycle events and tracks worker state
//! - `cache`: the `CacheStorage` trait with memory and disk backends
//! - `net`: the `Network` trait with a `reqwest` implementation
//! - `config`: configuration file and environment overrides

pub mod cache;
pub mod config;
pub mod error;
pub mod host;
pub mod manifest;
pub mod models;
pub mod net;
pub mod worker;

pub use cache::{CacheStorage, DiskStorage, MemoryStorage};
pub use config::Config;
pub use error::{Error, NetworkError, Result, StorageError};
pub use host::{EventOutcome, Host, LifecycleEvent, WorkerState};
pub use manifest::{Manifest, DEFAULT_CACHE_NAME};
pub use models::{Method, Request, StoredResponse};
pub use net::{HttpNetwork, Network};
pub use worker::{FetchOutcome, InstallOutcome, OfflineWorker};
