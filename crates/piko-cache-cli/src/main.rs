//! piko-cache - command-line host for the Piko offline cache.
//!
//! Installs the app shell into a versioned disk cache, evicts older cache
//! versions, and fetches resources with a fallback to cached copies when
//! the network is down.

use std::io;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use piko_cache_core::{
    CacheStorage, Config, DiskStorage, Host, HttpNetwork, OfflineWorker, Request, WorkerState,
};

/// Directory for an optional rolling log file
const ENV_LOG_DIR: &str = "PIKO_LOG_DIR";

const USAGE: &str = "\
Usage: piko-cache <command>

Commands:
  init             Write the current settings to the config file
  install          Pre-cache the manifest and activate the current version
  activate         Delete cache buckets from other versions (needs install)
  fetch <id>...    Fetch resources, falling back to the cache when offline
  list             Show cache buckets
  clear            Delete every cache bucket

Environment:
  PIKO_BASE_URL    Base URL relative identifiers resolve against
  PIKO_CACHE_NAME  Cache version string
  PIKO_CACHE_DIR   Cache directory
  PIKO_LOG_DIR     Also write logs to a daily file in this directory
  RUST_LOG         Log filter (default: warn)";

type CliHost = Host<DiskStorage, HttpNetwork>;

/// Initialize the tracing subscriber for logging.
/// Returns the file writer guard, which must live until exit.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(ENV_LOG_DIR) {
        Ok(dir) if !dir.is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "piko-cache.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };
    if command == "-h" || command == "--help" || command == "help" {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = Config::load()?;
    info!(cache = %config.cache_name, "piko-cache starting");

    match command.as_str() {
        "init" => init(&config),
        "install" => install(&config).await,
        "activate" => activate(&config).await,
        "fetch" => fetch(&config, &args[1..]).await,
        "list" => list(&config).await,
        "clear" => clear(&config).await,
        other => {
            eprintln!("Unknown command: {}\n\n{}", other, USAGE);
            std::process::exit(2);
        }
    }
}

async fn storage(config: &Config) -> Result<Arc<DiskStorage>> {
    let dir = config.cache_dir()?;
    let storage = DiskStorage::new(dir.clone())
        .await
        .with_context(|| format!("Failed to open cache directory {}", dir.display()))?;
    Ok(Arc::new(storage))
}

fn network(config: &Config) -> Result<Arc<HttpNetwork>> {
    let mut network = HttpNetwork::new(config.request_timeout())?;
    if let Some(ref base) = config.base_url {
        network = network.with_base_url(base)?;
    }
    Ok(Arc::new(network))
}

async fn worker(config: &Config) -> Result<OfflineWorker<DiskStorage, HttpNetwork>> {
    Ok(OfflineWorker::new(
        config.cache_name.clone(),
        config.manifest.clone(),
        storage(config).await?,
        network(config)?,
    ))
}

fn init(config: &Config) -> Result<()> {
    let path = Config::config_path()?;
    if path.exists() {
        bail!("Config file {} already exists", path.display());
    }
    config.save()?;
    println!("Wrote {}", path.display());
    Ok(())
}

async fn install(config: &Config) -> Result<()> {
    let mut host = CliHost::new(worker(config).await?);
    let outcome = host
        .install()
        .await
        .with_context(|| format!("Install of {} failed", config.cache_name))?;

    println!("Installed {} entries into {}", outcome.cached, outcome.cache_name);
    if host.state() == WorkerState::Activated {
        println!("Activated {}", outcome.cache_name);
    } else {
        println!("Activation of {} pending; run `piko-cache activate`", outcome.cache_name);
    }
    Ok(())
}

async fn activate(config: &Config) -> Result<()> {
    let mut host = CliHost::restore(worker(config).await?).await?;
    if !host.is_controlling() {
        bail!("Cache {} is not installed; run `piko-cache install` first", config.cache_name);
    }
    let deleted = host.activate().await?;
    if deleted.is_empty() {
        println!("No stale caches");
    }
    for name in deleted {
        println!("Deleted {}", name);
    }
    Ok(())
}

async fn fetch(config: &Config, ids: &[String]) -> Result<()> {
    if ids.is_empty() {
        bail!("fetch needs at least one resource identifier");
    }

    let host = CliHost::restore(worker(config).await?).await?;
    if !host.is_controlling() {
        eprintln!("Cache {} is not installed; fetching without fallback", config.cache_name);
    }

    let requests: Vec<Request> = ids.iter().map(Request::get).collect();
    let mut failed = 0;
    for (request, result) in requests.iter().zip(host.fetch_all(&requests).await) {
        match result {
            Ok(outcome) => {
                let response = outcome.response();
                println!(
                    "{:<8} {} {} ({} bytes, {})",
                    outcome.source(),
                    response.status,
                    request.url,
                    response.body.len(),
                    response.header("content-type").unwrap_or("no content type")
                );
            }
            Err(e) => {
                failed += 1;
                println!("{:<8} --- {} ({})", "failed", request.url, e);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} fetches failed", failed, requests.len());
    }
    Ok(())
}

async fn list(config: &Config) -> Result<()> {
    let storage = storage(config).await?;
    let names = storage.keys().await?;
    if names.is_empty() {
        println!("No caches in {}", storage.cache_dir().display());
        return Ok(());
    }
    for name in names {
        let marker = if name == config.cache_name { "*" } else { " " };
        let bucket = match storage.bucket(&name).await {
            Ok(Some(bucket)) => bucket,
            Ok(None) => continue,
            Err(e) => {
                println!("{} {} (unreadable: {})", marker, name, e);
                continue;
            }
        };
        println!(
            "{} {} ({} entries, {})",
            marker,
            name,
            bucket.len(),
            bucket.age_display()
        );
        for entry in bucket.entries.keys() {
            println!("    {}", entry);
        }
    }
    Ok(())
}

async fn clear(config: &Config) -> Result<()> {
    let storage = storage(config).await?;
    for name in storage.keys().await? {
        storage.delete(&name).await?;
        println!("Deleted {}", name);
    }
    Ok(())
}
