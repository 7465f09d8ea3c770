//! Facade over queue, cache, overlay and sync: the read and write paths the
//! rest of the application uses.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheLayer, CacheSource, CacheStore, Provenance, ResourceKey};
use crate::config::Config;
use crate::connectivity::{Connectivity, ConnectivityEvent, ConnectivityMonitor};
use crate::error::{PersistenceError, RemoteError, SyncError};
use crate::event::SyncNotification;
use crate::overlay;
use crate::preload::Preloader;
use crate::queue::{DeadLetter, DeadLetterStore, NewTask, SyncTask, TaskId, TaskStore, Verb};
use crate::registry::Registry;
use crate::remote::RemoteService;
use crate::store::DurableStore;
use crate::sync::{DrainReport, SyncEngine};

/// Tunables for [`FieldClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
  pub schema_version: u32,
  pub stale_after: chrono::Duration,
  pub request_timeout: Duration,
  /// Path prefixes that always go through the queue.
  pub queued_paths: Vec<String>,
  pub refresh_keys: Vec<ResourceKey>,
  pub preload_concurrency: usize,
  pub detail_limit: usize,
  /// Sibling listing views warmed after a listing of the same kind loads.
  pub preload_keys: Vec<ResourceKey>,
}

impl Default for ClientOptions {
  fn default() -> Self {
    Self {
      schema_version: 2,
      stale_after: chrono::Duration::hours(24),
      request_timeout: Duration::from_secs(15),
      queued_paths: Vec::new(),
      refresh_keys: vec![ResourceKey::listing("customer", None)],
      preload_concurrency: 4,
      detail_limit: 10,
      preload_keys: Vec::new(),
    }
  }
}

impl ClientOptions {
  pub fn from_config(config: &Config) -> Result<Self, SyncError> {
    let parse_keys = |keys: &[String]| {
      keys
        .iter()
        .map(|key| key.parse())
        .collect::<Result<Vec<ResourceKey>, _>>()
    };
    let refresh_keys = parse_keys(&config.refresh_keys)?;
    let preload_keys = parse_keys(&config.preload.keys)?;
    Ok(Self {
      schema_version: config.cache.schema_version,
      stale_after: config.stale_after(),
      request_timeout: config.request_timeout(),
      queued_paths: config.sync.queued_paths.clone(),
      refresh_keys,
      preload_concurrency: config.preload.concurrency,
      detail_limit: config.preload.detail_limit,
      preload_keys,
    })
  }
}

/// Where the base of a view came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewSource {
  Network,
  Cache,
  /// The network was down or failed; cached data served instead.
  Offline,
}

/// Server data with pending local writes overlaid.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticView {
  pub data: Value,
  pub source: ViewSource,
  pub provenance: Provenance,
  pub captured_at: DateTime<Utc>,
  /// Older than the staleness threshold. Advisory.
  pub stale: bool,
  /// Rebuilt from a listing; nested collections are missing.
  pub incomplete: bool,
  /// Nodes in `data` carrying the pending marker.
  pub pending: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
  Available(OptimisticView),
  /// Offline and nothing of any provenance is cached.
  Unavailable { key: ResourceKey },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
  Delivered,
  Queued(TaskId),
}

pub struct FieldClient {
  registry: Arc<Registry>,
  queue: TaskStore,
  dead_letters: DeadLetterStore,
  cache: CacheLayer,
  remote: Arc<dyn RemoteService>,
  connectivity: Arc<Connectivity>,
  engine: SyncEngine,
  preloader: Preloader,
  notifications: broadcast::Sender<SyncNotification>,
  options: ClientOptions,
}

impl FieldClient {
  pub fn new(
    store: Arc<dyn DurableStore>,
    remote: Arc<dyn RemoteService>,
    connectivity: Arc<Connectivity>,
    registry: Registry,
    options: ClientOptions,
  ) -> Self {
    let registry = Arc::new(registry);
    let (notifications, _) = broadcast::channel(64);
    let queue = TaskStore::new(store.clone());
    let dead_letters = DeadLetterStore::new(store.clone());
    let cache_store = CacheStore::new(store, registry.clone(), options.schema_version);
    let monitor: Arc<dyn ConnectivityMonitor> = connectivity.clone();

    let engine = SyncEngine::new(
      queue.clone(),
      dead_letters.clone(),
      cache_store.clone(),
      remote.clone(),
      monitor.clone(),
      notifications.clone(),
    )
    .with_request_timeout(options.request_timeout);

    let preloader = Preloader::new(
      cache_store.clone(),
      registry.clone(),
      remote.clone(),
      monitor,
      options.preload_concurrency,
    );

    Self {
      cache: CacheLayer::new(cache_store).with_stale_time(options.stale_after),
      registry,
      queue,
      dead_letters,
      remote,
      connectivity,
      engine,
      preloader,
      notifications,
      options,
    }
  }

  /// Check the connection once, drain if there is anything to send, then
  /// react to every reconnection by draining and refreshing.
  pub async fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, PersistenceError> {
    let mut edges = self.connectivity.subscribe();
    let pending = self.queue.load_all()?.len();
    if self.is_reachable() && pending > 0 {
      self.drain_and_refresh().await;
    }

    let client = Arc::clone(self);
    Ok(tokio::spawn(async move {
      loop {
        match edges.recv().await {
          Ok(ConnectivityEvent::BecameReachable) => client.drain_and_refresh().await,
          Ok(ConnectivityEvent::BecameUnreachable) => {
            info!("Connection lost, writes will be queued")
          }
          Err(RecvError::Lagged(skipped)) => {
            debug!(skipped, "Connectivity events lagged");
            if client.is_reachable() {
              client.drain_and_refresh().await;
            }
          }
          Err(RecvError::Closed) => break,
        }
      }
    }))
  }

  /// Read a resource with pending writes overlaid.
  ///
  /// Goes to the network when reachable and the cache has nothing fresh;
  /// otherwise serves whatever the cache can produce, derived partials
  /// included.
  pub async fn read(&self, key: &ResourceKey) -> Result<ReadOutcome, SyncError> {
    let path = key.remote_path(&self.registry)?;
    let online = self.connectivity.is_reachable();
    let remote = self.remote.clone();

    let Some(result) = self
      .cache
      .fetch(key, online, || async move { remote.fetch(&path).await })
      .await?
    else {
      debug!(key = %key, "Nothing cached for offline read");
      return Ok(ReadOutcome::Unavailable { key: key.clone() });
    };

    let source = match result.source {
      CacheSource::Network => ViewSource::Network,
      CacheSource::CacheFresh | CacheSource::CacheStale => ViewSource::Cache,
      CacheSource::Offline => ViewSource::Offline,
    };
    let entry = result.data;

    if source == ViewSource::Network && key.is_listing() {
      if let Some(items) = entry.data.as_array() {
        self
          .preloader
          .preload_details_of(key.kind(), items, self.options.detail_limit);
      }
      let siblings: Vec<ResourceKey> = self
        .options
        .preload_keys
        .iter()
        .filter(|other| other.kind() == key.kind() && *other != key)
        .cloned()
        .collect();
      if !siblings.is_empty() {
        self.preloader.preload(siblings);
      }
    }

    let tasks = self.queue.list()?;
    let data = overlay::merge(&entry.data, key.kind(), &tasks, &self.registry);
    Ok(ReadOutcome::Available(OptimisticView {
      pending: overlay::count_pending(&data),
      stale: source != ViewSource::Network && entry.is_stale(self.cache.stale_time()),
      incomplete: entry.is_partial(),
      provenance: entry.provenance,
      captured_at: entry.captured_at,
      source,
      data,
    }))
  }

  /// Send a write now if possible, otherwise queue it.
  ///
  /// Queues when unreachable, when the path is configured to always queue,
  /// or when earlier writes are still waiting (order is preserved). A direct
  /// attempt that fails transiently is queued too; a direct rejection is
  /// returned as an error and nothing is queued.
  pub async fn write_or_queue(
    &self,
    verb: Verb,
    path: &str,
    payload: Value,
  ) -> Result<WriteOutcome, SyncError> {
    if self.must_queue(path)? {
      return Ok(self.enqueue(verb, path, payload)?);
    }

    let delivery = self.remote.deliver(verb, path, &payload);
    let result = tokio::time::timeout(self.options.request_timeout, delivery)
      .await
      .unwrap_or_else(|_| Err(RemoteError::transient("request timed out")));

    match result {
      Ok(()) => {
        info!(verb = %verb, path, "Write delivered");
        self.cache.store().invalidate()?;
        Ok(WriteOutcome::Delivered)
      }
      Err(RemoteError::Transient { reason }) => {
        warn!(verb = %verb, path, reason = %reason, "Direct write failed, queueing");
        Ok(self.enqueue(verb, path, payload)?)
      }
      Err(RemoteError::Rejected { status, reason }) => {
        Err(SyncError::DefinitiveRejection { status, reason })
      }
    }
  }

  pub fn queue_length(&self) -> Result<usize, PersistenceError> {
    self.queue.len()
  }

  pub fn pending_tasks(&self) -> Result<Vec<SyncTask>, PersistenceError> {
    self.queue.list()
  }

  pub fn is_syncing(&self) -> bool {
    self.engine.is_draining()
  }

  pub fn is_reachable(&self) -> bool {
    self.connectivity.is_reachable()
  }

  pub fn connectivity(&self) -> &Arc<Connectivity> {
    &self.connectivity
  }

  pub fn notifications(&self) -> broadcast::Receiver<SyncNotification> {
    self.notifications.subscribe()
  }

  pub fn dead_letters(&self) -> Result<Vec<DeadLetter>, PersistenceError> {
    self.dead_letters.list()
  }

  pub fn clear_dead_letters(&self) -> Result<usize, PersistenceError> {
    self.dead_letters.clear()
  }

  pub fn registry(&self) -> &Registry {
    &self.registry
  }

  pub async fn drain(&self) -> Result<DrainReport, PersistenceError> {
    self.engine.drain().await
  }

  /// Mark the whole cache for re-fetch and reload the configured keys.
  ///
  /// Reloading is best-effort; returns how many keys came back from the
  /// network.
  pub async fn refresh_all(&self) -> Result<usize, PersistenceError> {
    self.cache.store().invalidate()?;
    let _ = self.notifications.send(SyncNotification::CacheRefreshed);

    let mut refreshed = 0;
    for key in &self.options.refresh_keys {
      match self.read(key).await {
        Ok(ReadOutcome::Available(view)) if view.source == ViewSource::Network => refreshed += 1,
        Ok(_) => debug!(key = %key, "Refresh served from cache"),
        Err(e) => debug!(key = %key, error = %e, "Refresh failed"),
      }
    }
    info!(refreshed, "Refreshed cached data");
    Ok(refreshed)
  }

  async fn drain_and_refresh(&self) {
    match self.drain().await {
      Ok(report) => debug!(summary = %report.summary(), "Reconnect drain done"),
      Err(e) => error!(error = %e, "Drain failed"),
    }
    if let Err(e) = self.refresh_all().await {
      warn!(error = %e, "Refresh after reconnect failed");
    }
  }

  fn must_queue(&self, path: &str) -> Result<bool, PersistenceError> {
    if !self.connectivity.is_reachable() || self.engine.is_draining() {
      return Ok(true);
    }
    if self
      .options
      .queued_paths
      .iter()
      .any(|prefix| path.starts_with(prefix.as_str()))
    {
      return Ok(true);
    }
    Ok(!self.queue.is_empty()?)
  }

  fn enqueue(&self, verb: Verb, path: &str, payload: Value) -> Result<WriteOutcome, PersistenceError> {
    let task_id = self.queue.enqueue(NewTask::new(verb, path, payload))?;
    let _ = self.notifications.send(SyncNotification::WriteQueued {
      task_id: task_id.clone(),
      description: format!("{} {}", verb, path),
    });
    Ok(WriteOutcome::Queued(task_id))
  }
}
