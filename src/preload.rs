//! Background warm-up of the cache while the network is up.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::{CacheStore, Provenance, ResourceKey};
use crate::connectivity::ConnectivityMonitor;
use crate::registry::Registry;
use crate::remote::RemoteService;

/// Fetches resources ahead of need so they are readable offline later.
///
/// Best-effort: errors are logged at debug level and otherwise ignored.
#[derive(Clone)]
pub struct Preloader {
  cache: CacheStore,
  registry: Arc<Registry>,
  remote: Arc<dyn RemoteService>,
  connectivity: Arc<dyn ConnectivityMonitor>,
  in_flight: Arc<Mutex<HashSet<ResourceKey>>>,
  concurrency: usize,
}

impl Preloader {
  pub fn new(
    cache: CacheStore,
    registry: Arc<Registry>,
    remote: Arc<dyn RemoteService>,
    connectivity: Arc<dyn ConnectivityMonitor>,
    concurrency: usize,
  ) -> Self {
    Self {
      cache,
      registry,
      remote,
      connectivity,
      in_flight: Arc::new(Mutex::new(HashSet::new())),
      concurrency: concurrency.max(1),
    }
  }

  /// Warm `keys` in the background. The handle resolves to the number of
  /// entries stored; callers normally drop it.
  pub fn preload(&self, keys: Vec<ResourceKey>) -> JoinHandle<usize> {
    let this = self.clone();
    tokio::spawn(async move { this.run(keys).await })
  }

  /// Warm the detail entries of the first `limit` items of a listing.
  pub fn preload_details_of(&self, kind: &str, items: &[Value], limit: usize) -> JoinHandle<usize> {
    let keys = items
      .iter()
      .take(limit)
      .filter_map(|item| ResourceKey::for_item(kind, item))
      .collect();
    self.preload(keys)
  }

  async fn run(&self, keys: Vec<ResourceKey>) -> usize {
    if !self.connectivity.is_reachable() {
      debug!(count = keys.len(), "Offline, preload skipped");
      return 0;
    }

    let claimed: Vec<ResourceKey> = keys.into_iter().filter(|key| self.claim(key)).collect();
    if claimed.is_empty() {
      return 0;
    }

    let stored = stream::iter(claimed)
      .map(|key| async move {
        let stored = self.load(&key).await;
        self.release(&key);
        stored
      })
      .buffer_unordered(self.concurrency)
      .filter(|stored| futures::future::ready(*stored))
      .count()
      .await;

    debug!(stored, "Preload finished");
    stored
  }

  /// Reserve a key unless it is cached exactly or already being fetched.
  fn claim(&self, key: &ResourceKey) -> bool {
    match self.cache.has_exact(key) {
      Ok(false) => {}
      Ok(true) => return false,
      Err(e) => {
        debug!(key = %key, error = %e, "Preload cache check failed");
        return false;
      }
    }
    self
      .in_flight
      .lock()
      .map(|mut keys| keys.insert(key.clone()))
      .unwrap_or(false)
  }

  fn release(&self, key: &ResourceKey) {
    if let Ok(mut keys) = self.in_flight.lock() {
      keys.remove(key);
    }
  }

  async fn load(&self, key: &ResourceKey) -> bool {
    if !self.connectivity.is_reachable() {
      return false;
    }
    let path = match key.remote_path(&self.registry) {
      Ok(path) => path,
      Err(e) => {
        debug!(key = %key, error = %e, "Preload skipped");
        return false;
      }
    };

    // Stamped before the fetch so a read that lands meanwhile stays newer.
    let started = Utc::now();
    let data = match self.remote.fetch(&path).await {
      Ok(data) => data,
      Err(e) => {
        debug!(key = %key, error = %e, "Preload fetch failed");
        return false;
      }
    };

    let written = match &data {
      Value::Array(items) if key.is_listing() => self.cache.put_listing_at(key, items, started),
      _ => self.cache.put_at(key, data, Provenance::Exact, started),
    };
    match written {
      Ok(written) => written,
      Err(e) => {
        debug!(key = %key, error = %e, "Preload store failed");
        false
      }
    }
  }

  #[cfg(test)]
  fn in_flight_len(&self) -> usize {
    self.in_flight.lock().map(|keys| keys.len()).unwrap_or(0)
  }
}
