//! Cache layer that orchestrates caching logic with network fetching.

use chrono::Duration;
use serde_json::Value;
use std::future::Future;
use tracing::{debug, warn};

use super::entry::{CacheEntry, CacheResult, Provenance};
use super::key::ResourceKey;
use super::store::CacheStore;
use crate::error::{RemoteError, SyncError};

/// Cache-first access to remote resources.
///
/// This layer sits between the read path and the remote client, providing
/// transparent caching with offline support.
#[derive(Clone)]
pub struct CacheLayer {
  store: CacheStore,
  /// How long before cached data is considered stale
  stale_time: Duration,
}

impl CacheLayer {
  pub fn new(store: CacheStore) -> Self {
    Self {
      store,
      stale_time: Duration::hours(24),
    }
  }

  /// Set the stale time for cached data.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  pub fn stale_time(&self) -> Duration {
    self.stale_time
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  /// Fetch a resource with a cache-first strategy.
  ///
  /// 1. A fresh, exact, not-invalidated entry is returned immediately
  /// 2. Otherwise, if `online`, fetch from the network and store the result
  /// 3. On a transient network failure (or when offline) serve whatever the
  ///    cache has, derived partials included
  /// 4. `Ok(None)` means no data of any provenance exists
  ///
  /// A rejection from the service is returned as an error only when there is
  /// nothing cached to fall back on.
  pub async fn fetch<F, Fut>(
    &self,
    key: &ResourceKey,
    online: bool,
    fetcher: F,
  ) -> Result<Option<CacheResult<CacheEntry>>, SyncError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, RemoteError>>,
  {
    let cached = self.store.get(key)?;

    if let Some(entry) = &cached {
      let usable = entry.provenance == Provenance::Exact
        && !entry.invalidated
        && !entry.is_stale(self.stale_time);
      if usable {
        return Ok(Some(CacheResult::from_cache(entry.clone(), false)));
      }
    }

    if !online {
      return Ok(cached.map(CacheResult::offline));
    }

    match fetcher().await {
      Ok(data) => {
        match &data {
          Value::Array(items) if key.is_listing() => self.store.put_listing(key, items)?,
          _ => {
            self.store.put(key, data.clone(), Provenance::Exact)?;
          }
        }
        debug!(key = %key, "Fetched from network");
        Ok(Some(CacheResult::from_network(CacheEntry::new(
          key.to_string(),
          data,
          Provenance::Exact,
        ))))
      }
      Err(err @ RemoteError::Transient { .. }) => {
        // Network failed, return cached data (offline mode)
        debug!(key = %key, error = %err, "Fetch failed, falling back to cache");
        Ok(cached.map(CacheResult::offline))
      }
      Err(RemoteError::Rejected { status, reason }) => match cached {
        Some(entry) => {
          warn!(key = %key, status, reason = %reason, "Fetch rejected, serving cached copy");
          let stale = entry.is_stale(self.stale_time);
          Ok(Some(CacheResult::from_cache(entry, stale)))
        }
        None => Err(SyncError::DefinitiveRejection { status, reason }),
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheSource;
  use crate::registry::Registry;
  use crate::store::MemoryStore;
  use serde_json::json;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;

  fn layer() -> CacheLayer {
    CacheLayer::new(CacheStore::new(
      Arc::new(MemoryStore::new()),
      Arc::new(Registry::field_visits()),
      2,
    ))
  }

  #[tokio::test]
  async fn test_miss_fetches_and_stores() {
    let layer = layer();
    let key = ResourceKey::detail("visit", "7");

    let result = layer
      .fetch(&key, true, || async { Ok(json!({ "id": 7 })) })
      .await
      .unwrap()
      .unwrap();
    assert_eq!(result.source, CacheSource::Network);
    assert!(layer.store().has_exact(&key).unwrap());
  }

  #[tokio::test]
  async fn test_fresh_cache_skips_network() {
    let layer = layer();
    let key = ResourceKey::detail("visit", "7");
    layer.store().put(&key, json!({ "id": 7 }), Provenance::Exact).unwrap();

    let calls = AtomicU32::new(0);
    let result = layer
      .fetch(&key, true, || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "id": 7, "fetched": true }))
      })
      .await
      .unwrap()
      .unwrap();
    assert_eq!(result.source, CacheSource::CacheFresh);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_stale_cache_served_offline_on_transient_failure() {
    let layer = layer().with_stale_time(Duration::zero());
    let key = ResourceKey::detail("visit", "7");
    layer.store().put(&key, json!({ "id": 7 }), Provenance::Exact).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(2));

    let result = layer
      .fetch(&key, true, || async { Err(RemoteError::transient("timeout")) })
      .await
      .unwrap()
      .unwrap();
    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data.data["id"], 7);
  }

  #[tokio::test]
  async fn test_offline_with_nothing_cached_is_none() {
    let layer = layer();
    let key = ResourceKey::detail("visit", "404");
    let result = layer
      .fetch(&key, false, || async { Ok(json!({})) })
      .await
      .unwrap();
    assert!(result.is_none());
  }

  #[tokio::test]
  async fn test_rejection_without_cache_is_error() {
    let layer = layer();
    let key = ResourceKey::detail("visit", "404");
    let err = layer
      .fetch(&key, true, || async { Err(RemoteError::rejected(404, "Not Found")) })
      .await
      .unwrap_err();
    assert!(matches!(err, SyncError::DefinitiveRejection { status: 404, .. }));
  }

  #[tokio::test]
  async fn test_listing_fetch_seeds_details() {
    let layer = layer();
    let key = ResourceKey::listing("visit", None);
    layer
      .fetch(&key, true, || async {
        Ok(json!([{ "id": 1, "observations": [{ "id": 9 }] }, { "id": 2 }]))
      })
      .await
      .unwrap();

    let entry = layer
      .store()
      .get(&ResourceKey::detail("visit", "1"))
      .unwrap()
      .unwrap();
    assert_eq!(entry.provenance, Provenance::Derived);
    assert_eq!(entry.data["observations"], json!([]));
  }
}
