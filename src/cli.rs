use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

use crate::config::OfflineConfig;
use crate::offline::{
  CacheStore, Destination, Disconnected, FetchOutcome, HttpNetwork, Network, OfflineWorker,
  Request, SqliteCacheStore, WorkerHandle, WorkerMessage, WorkerState,
};
use crate::session::parse_manifest;

#[derive(Parser, Debug)]
#[command(name = "qrscan")]
#[command(about = "Collect QR codes into scan lists and export them as XML")]
#[command(version)]
pub struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/qrscan/config.yaml)
  #[arg(short, long, global = true)]
  pub config: Option<PathBuf>,

  /// Without a command the scanner UI starts
  #[command(subcommand)]
  pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
  /// Manage the offline asset cache
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },

  /// Print an exported scan list
  Inspect {
    /// XML file written by the scanner
    file: PathBuf,
  },
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
  /// Precache the application shell
  Install {
    /// Activate right away when the install is set to wait
    #[arg(long)]
    activate: bool,
  },

  /// Delete caches left by older versions
  Activate,

  /// Run one request through the cache
  Fetch {
    /// Absolute URL, or a path resolved against the configured origin
    url: String,

    /// Act as if the network were down
    #[arg(long)]
    offline: bool,
  },

  /// Delete every cache
  Clear,

  /// Show caches and their entries
  List,
}

pub async fn run_cache(action: CacheAction, config: &OfflineConfig) -> Result<()> {
  let store = Arc::new(SqliteCacheStore::open_at(config.database.as_deref())?);

  let needs_network = match &action {
    CacheAction::Install { .. } => true,
    CacheAction::Fetch { offline, .. } => !offline,
    _ => false,
  };

  if needs_network {
    let network = HttpNetwork::new(Some(&config.origin_url()?), config.timeout())?;
    run_worker(action, store, network, config).await
  } else {
    run_worker(action, store, Disconnected, config).await
  }
}

async fn run_worker<N: Network + 'static>(
  action: CacheAction,
  store: Arc<SqliteCacheStore>,
  network: N,
  config: &OfflineConfig,
) -> Result<()> {
  let worker = Arc::new(OfflineWorker::restore(
    store,
    network,
    config.worker_settings()?,
  )?);

  match action {
    CacheAction::Install { activate } => {
      let handle = WorkerHandle::spawn(Arc::clone(&worker));
      let mut state = handle.subscribe_state();
      let report = worker.install().await?;
      println!(
        "Cached {} of {} assets into {}",
        report.cached.len(),
        report.cached.len() + report.failed.len(),
        config.precache_name
      );
      for (url, reason) in &report.failed {
        println!("  failed  {}  ({})", url, reason);
      }
      for name in &report.deleted {
        println!("  deleted {}", name);
      }

      if activate && handle.state() == WorkerState::Waiting {
        handle.post_message(WorkerMessage::SkipWaiting)?;
        state
          .wait_for(|s| *s == WorkerState::Active)
          .await
          .map_err(|e| eyre!("Worker stopped before activating: {}", e))?;
      }
      println!("Worker is {}", handle.state());
    }

    CacheAction::Activate => {
      let deleted = worker.activate().await?;
      if deleted.is_empty() {
        println!("No old caches");
      }
      for name in &deleted {
        println!("Deleted {}", name);
      }
    }

    CacheAction::Fetch { url, .. } => {
      let url = resolve(&worker.settings().origin, &url)?;
      let destination = Destination::for_url(&url);
      let request = Request::get(url).with_destination(destination);
      match worker.handle_fetch(&request).await {
        FetchOutcome::Passthrough => {
          println!("passthrough (worker is {})", worker.state());
        }
        FetchOutcome::Respond { response, source } => {
          println!(
            "{} {}  {:?}  {} bytes",
            response.status,
            response.status_text,
            source,
            response.body.len()
          );
        }
      }
      worker.flush().await;
    }

    CacheAction::Clear => {
      let handle = WorkerHandle::spawn(worker);
      let reply = handle
        .request(WorkerMessage::ClearCache)
        .await?
        .ok_or_else(|| eyre!("Worker did not reply"))?;
      println!(
        "{}",
        serde_json::to_string(&reply).map_err(|e| eyre!("Failed to encode reply: {}", e))?
      );
    }

    CacheAction::List => {
      let store = worker.store();
      let names = store.keys()?;
      if names.is_empty() {
        println!("No caches");
      }
      for name in names {
        let entries = store.entries(&name)?;
        println!("{} ({} entries)", name, entries.len());
        for entry in entries {
          println!(
            "  {} {} {}  {} bytes  {}",
            entry.status,
            entry.method,
            entry.url,
            entry.size,
            entry.cached_at.format("%Y-%m-%d %H:%M:%S")
          );
        }
      }
    }
  }

  Ok(())
}

fn resolve(origin: &Url, target: &str) -> Result<Url> {
  origin
    .join(target)
    .map_err(|e| eyre!("Invalid URL {}: {}", target, e))
}

pub fn run_inspect(file: &Path) -> Result<()> {
  let xml = std::fs::read_to_string(file)
    .map_err(|e| eyre!("Failed to read {}: {}", file.display(), e))?;
  let manifest = parse_manifest(&xml)?;

  println!("{}", manifest.title);
  println!("scanned: {} / {}", manifest.entries.len(), manifest.target_count);
  for entry in &manifest.entries {
    let text = if entry.is_placeholder() {
      "(skipped)"
    } else {
      entry.text.as_str()
    };
    println!("{:>4}  {}", entry.ordinal(), text);
  }
  Ok(())
}
