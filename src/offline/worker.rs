//! Cache-first offline worker: install, activate, fetch and message handling.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use color_eyre::Result;

use super::network::Network;
use super::storage::CacheStore;
use super::types::{Destination, Request, Response};

/// Lifecycle of the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
  /// Precache is being filled
  Installing,
  /// Installed, waiting for the previous worker's clients to go away
  Waiting,
  /// Controlling clients and intercepting fetches
  Active,
}

impl std::fmt::Display for WorkerState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      WorkerState::Installing => write!(f, "installing"),
      WorkerState::Waiting => write!(f, "waiting"),
      WorkerState::Active => write!(f, "active"),
    }
  }
}

/// Control messages accepted from clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
  SkipWaiting,
  ClearCache,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReply {
  pub success: bool,
}

/// Where a response handed back to the requester came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  Cache,
  Network,
  OfflineFallback,
  Synthesized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
  /// Not intercepted; the requester goes to the network on its own
  Passthrough,
  Respond {
    response: Response,
    source: ResponseSource,
  },
}

#[derive(Debug, Clone, Default)]
pub struct InstallReport {
  pub cached: Vec<Url>,
  /// URL (as configured) and the reason it could not be cached
  pub failed: Vec<(String, String)>,
  /// Caches removed when the install ran straight into activation
  pub deleted: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
  pub origin: Url,
  pub precache_name: String,
  pub runtime_name: String,
  /// Paths or absolute URLs, resolved against `origin`
  pub precache: Vec<String>,
  pub offline_fallback: Option<String>,
  pub skip_waiting_on_install: bool,
}

pub struct OfflineWorker<S, N> {
  store: Arc<S>,
  network: N,
  settings: WorkerSettings,
  state: watch::Sender<WorkerState>,
  skip_waiting: AtomicBool,
  /// Runtime cache writes still in flight
  pending: Mutex<Vec<JoinHandle<()>>>,
}

impl<S, N> OfflineWorker<S, N>
where
  S: CacheStore + 'static,
  N: Network,
{
  pub fn new(store: Arc<S>, network: N, settings: WorkerSettings) -> Self {
    let (state, _) = watch::channel(WorkerState::Installing);
    Self {
      store,
      network,
      settings,
      state,
      skip_waiting: AtomicBool::new(false),
      pending: Mutex::new(Vec::new()),
    }
  }

  /// Reopen a worker over an existing store. When its precache is already
  /// present the worker resumes as active.
  pub fn restore(store: Arc<S>, network: N, settings: WorkerSettings) -> Result<Self> {
    let installed = store.has(&settings.precache_name)?;
    let worker = Self::new(store, network, settings);
    if installed {
      worker.state.send_replace(WorkerState::Active);
    }
    Ok(worker)
  }

  pub fn state(&self) -> WorkerState {
    *self.state.borrow()
  }

  pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
    self.state.subscribe()
  }

  pub fn settings(&self) -> &WorkerSettings {
    &self.settings
  }

  pub fn store(&self) -> &Arc<S> {
    &self.store
  }

  /// Fill the precache. Each URL is fetched independently; failures are
  /// logged and reported but never abort the install.
  pub async fn install(&self) -> Result<InstallReport> {
    info!("Installing offline worker");
    self.state.send_replace(WorkerState::Installing);
    self.store.open(&self.settings.precache_name)?;

    let mut report = InstallReport::default();
    let mut requests = Vec::new();
    for entry in &self.settings.precache {
      match self.settings.origin.join(entry) {
        Ok(url) => requests.push((entry.clone(), Request::get(url))),
        Err(e) => report.failed.push((entry.clone(), e.to_string())),
      }
    }

    info!(count = requests.len(), "Caching app shell");
    let fetches = requests.iter().map(|(_, req)| self.network.fetch(req));
    let results = join_all(fetches).await;

    for ((entry, req), result) in requests.into_iter().zip(results) {
      let outcome = match result {
        Ok(resp) if resp.status == 200 => self
          .store
          .put(&self.settings.precache_name, &req, &resp)
          .map_err(|e| e.to_string()),
        Ok(resp) => Err(format!("HTTP {}", resp.status)),
        Err(e) => Err(e.to_string()),
      };

      match outcome {
        Ok(()) => report.cached.push(req.url),
        Err(reason) => {
          warn!(url = %entry, reason = %reason, "Precache failed");
          report.failed.push((entry, reason));
        }
      }
    }

    self.state.send_replace(WorkerState::Waiting);
    if self.settings.skip_waiting_on_install || self.skip_waiting.load(Ordering::SeqCst) {
      debug!("Skip waiting");
      report.deleted = self.activate().await?;
    }

    Ok(report)
  }

  /// Drop caches that belong to older versions, then take control of clients.
  pub async fn activate(&self) -> Result<Vec<String>> {
    info!("Activating offline worker");
    let mut deleted = Vec::new();
    for name in self.store.keys()? {
      if name != self.settings.precache_name && name != self.settings.runtime_name {
        info!(cache = %name, "Deleting old cache");
        self.store.delete(&name)?;
        deleted.push(name);
      }
    }

    self.skip_waiting.store(false, Ordering::SeqCst);
    self.state.send_replace(WorkerState::Active);
    info!("Claiming clients");
    Ok(deleted)
  }

  /// Activate a waiting worker now. During an install, activation happens as
  /// soon as the install finishes.
  pub async fn skip_waiting(&self) -> Result<()> {
    match self.state() {
      WorkerState::Waiting => {
        self.activate().await?;
      }
      WorkerState::Installing => self.skip_waiting.store(true, Ordering::SeqCst),
      WorkerState::Active => {}
    }
    Ok(())
  }

  /// Requests the worker leaves alone: non-http(s) schemes and camera/media
  /// streams.
  pub fn should_intercept(&self, request: &Request) -> bool {
    if !matches!(request.url.scheme(), "http" | "https") {
      return false;
    }
    let url = request.url.as_str();
    !(url.contains("getUserMedia")
      || url.contains("mediaDevices")
      || request.destination == Destination::Video)
  }

  pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
    if self.state() != WorkerState::Active || !self.should_intercept(request) {
      return FetchOutcome::Passthrough;
    }

    match self.store.match_any(request) {
      Ok(Some(hit)) => {
        debug!(
          url = %request.url,
          cache = %hit.cache_name,
          cached_at = %hit.cached_at,
          "Found in cache"
        );
        return FetchOutcome::Respond {
          response: hit.response,
          source: ResponseSource::Cache,
        };
      }
      Ok(None) => {}
      Err(e) => warn!(url = %request.url, error = %e, "Cache lookup failed"),
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_cacheable() && request.is_get() {
          self.store_runtime(request, &response);
        }
        FetchOutcome::Respond {
          response,
          source: ResponseSource::Network,
        }
      }
      Err(e) => {
        error!(url = %request.url, error = %e, "Fetch failed");
        self.offline_response()
      }
    }
  }

  /// Write to the runtime cache off the request path.
  fn store_runtime(&self, request: &Request, response: &Response) {
    let store = Arc::clone(&self.store);
    let cache = self.settings.runtime_name.clone();
    let request = request.clone();
    let response = response.clone();
    let write = tokio::task::spawn_blocking(move || {
      if let Err(e) = store.put(&cache, &request, &response) {
        warn!(url = %request.url, error = %e, "Runtime cache write failed");
      }
    });

    if let Ok(mut pending) = self.pending.lock() {
      pending.retain(|w| !w.is_finished());
      pending.push(write);
    }
  }

  /// Wait for runtime cache writes started so far.
  pub async fn flush(&self) {
    let writes = match self.pending.lock() {
      Ok(mut pending) => std::mem::take(&mut *pending),
      Err(_) => return,
    };
    join_all(writes).await;
  }

  fn offline_response(&self) -> FetchOutcome {
    let fallback = self
      .settings
      .offline_fallback
      .as_deref()
      .and_then(|path| self.settings.origin.join(path).ok())
      .and_then(|url| self.store.match_any(&Request::get(url)).ok().flatten());

    match fallback {
      Some(hit) => FetchOutcome::Respond {
        response: hit.response,
        source: ResponseSource::OfflineFallback,
      },
      None => FetchOutcome::Respond {
        response: Response::service_unavailable(),
        source: ResponseSource::Synthesized,
      },
    }
  }

  pub async fn handle_message(&self, message: WorkerMessage) -> Result<Option<MessageReply>> {
    match message {
      WorkerMessage::SkipWaiting => {
        self.skip_waiting().await?;
        Ok(None)
      }
      WorkerMessage::ClearCache => {
        // A runtime write still in flight would recreate its cache after the reply.
        self.flush().await;
        for name in self.store.keys()? {
          self.store.delete(&name)?;
        }
        info!("All caches cleared");
        Ok(Some(MessageReply { success: true }))
      }
    }
  }
}
