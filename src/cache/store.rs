//! Cache store over the durable key-value store.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use super::entry::{CacheEntry, Provenance};
use super::key::ResourceKey;
use crate::error::PersistenceError;
use crate::registry::Registry;
use crate::store::{DurableStore, CACHE_NAMESPACE, META_NAMESPACE};

const REFRESH_WATERMARK: &str = "cache_refresh_watermark";

/// Keyed, timestamped snapshots with provenance.
///
/// Entries are only ever replaced by a newer capture; a global refresh moves
/// a watermark rather than deleting anything, so offline reads keep working.
#[derive(Clone)]
pub struct CacheStore {
  store: Arc<dyn DurableStore>,
  registry: Arc<Registry>,
  schema_version: u32,
}

impl CacheStore {
  pub fn new(store: Arc<dyn DurableStore>, registry: Arc<Registry>, schema_version: u32) -> Self {
    Self {
      store,
      registry,
      schema_version,
    }
  }

  /// Look up a snapshot.
  ///
  /// Resolution order for details: stored entry (EXACT or DERIVED), then a
  /// partial rebuilt from any cached listing of the same kind that contains
  /// the resource. A filtered listing falls back to the unfiltered listing of
  /// its kind, marked DERIVED. `None` only when nothing applies.
  pub fn get(&self, key: &ResourceKey) -> Result<Option<CacheEntry>, PersistenceError> {
    let watermark = self.refresh_watermark()?;
    let mut entry = match self.read_stored(key)? {
      Some(entry) => Some(entry),
      None => match key {
        ResourceKey::Detail { kind, id } => self.derive_from_listings(key, kind, id)?,
        ResourceKey::Listing { kind, query: Some(_) } => self.derive_from_full_listing(key, kind)?,
        ResourceKey::Listing { query: None, .. } => None,
      },
    };

    if let (Some(entry), Some(watermark)) = (entry.as_mut(), watermark) {
      entry.invalidated = entry.captured_at < watermark;
    }
    Ok(entry)
  }

  /// Store a snapshot captured now. Returns whether it was written.
  pub fn put(
    &self,
    key: &ResourceKey,
    data: Value,
    provenance: Provenance,
  ) -> Result<bool, PersistenceError> {
    self.put_at(key, data, provenance, Utc::now())
  }

  /// Store a snapshot captured at `captured_at`, typically when its fetch
  /// started. A newer EXACT entry stored meanwhile wins.
  pub fn put_at(
    &self,
    key: &ResourceKey,
    data: Value,
    provenance: Provenance,
    captured_at: DateTime<Utc>,
  ) -> Result<bool, PersistenceError> {
    let mut entry = CacheEntry::new(key.to_string(), data, provenance);
    entry.captured_at = captured_at;
    self.put_entry(key, entry)
  }

  /// Store a prepared entry, honoring the supersede rules: a DERIVED entry
  /// never replaces an EXACT one, and nothing replaces a newer EXACT capture.
  pub fn put_entry(&self, key: &ResourceKey, entry: CacheEntry) -> Result<bool, PersistenceError> {
    if let Some(existing) = self.read_stored(key)? {
      if existing.provenance == Provenance::Exact {
        if entry.provenance == Provenance::Derived {
          debug!(key = %key, "Derived snapshot not stored over exact entry");
          return Ok(false);
        }
        if entry.captured_at < existing.captured_at {
          debug!(key = %key, "Older snapshot not stored over newer capture");
          return Ok(false);
        }
      }
    }

    let storage_key = key.storage_key(self.schema_version);
    let data =
      serde_json::to_vec(&entry).map_err(|e| PersistenceError::codec(storage_key.as_str(), e))?;
    self.store.set(CACHE_NAMESPACE, &storage_key, &data)?;
    debug!(key = %key, provenance = ?entry.provenance, "Cached snapshot");
    Ok(true)
  }

  /// Store a fetched listing, seeding a DERIVED detail entry for every item
  /// that has no entry yet.
  pub fn put_listing(&self, key: &ResourceKey, items: &[Value]) -> Result<(), PersistenceError> {
    self.put_listing_at(key, items, Utc::now()).map(|_| ())
  }

  /// [`Self::put_listing`] for a capture taken at `captured_at`. Returns
  /// whether the listing itself was written.
  pub fn put_listing_at(
    &self,
    key: &ResourceKey,
    items: &[Value],
    captured_at: DateTime<Utc>,
  ) -> Result<bool, PersistenceError> {
    if !self.put_at(key, Value::Array(items.to_vec()), Provenance::Exact, captured_at)? {
      return Ok(false);
    }

    let kind = key.kind();
    let mut seeded = 0usize;
    for item in items {
      let Some(item_key) = ResourceKey::for_item(kind, item) else {
        continue;
      };
      if self.read_stored(&item_key)?.is_some() {
        continue;
      }
      let mut partial = item.clone();
      self.registry.strip_nested(kind, &mut partial);
      if self.put_at(&item_key, partial, Provenance::Derived, captured_at)? {
        seeded += 1;
      }
    }

    debug!(key = %key, items = items.len(), seeded, "Cached listing");
    Ok(true)
  }

  /// Age strictly greater than `threshold` means stale.
  pub fn is_stale(&self, entry: &CacheEntry, threshold: Duration) -> bool {
    entry.is_stale(threshold)
  }

  /// Mark every current snapshot as needing a re-fetch.
  pub fn invalidate(&self) -> Result<DateTime<Utc>, PersistenceError> {
    let now = Utc::now();
    self
      .store
      .set(META_NAMESPACE, REFRESH_WATERMARK, now.to_rfc3339().as_bytes())?;
    info!(watermark = %now, "Cache invalidated");
    Ok(now)
  }

  pub fn refresh_watermark(&self) -> Result<Option<DateTime<Utc>>, PersistenceError> {
    let Some(raw) = self.store.get(META_NAMESPACE, REFRESH_WATERMARK)? else {
      return Ok(None);
    };
    Ok(
      std::str::from_utf8(&raw)
        .ok()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc)),
    )
  }

  /// Whether an EXACT entry exists for `key`.
  pub fn has_exact(&self, key: &ResourceKey) -> Result<bool, PersistenceError> {
    Ok(
      self
        .read_stored(key)?
        .is_some_and(|e| e.provenance == Provenance::Exact),
    )
  }

  fn read_stored(&self, key: &ResourceKey) -> Result<Option<CacheEntry>, PersistenceError> {
    let storage_key = key.storage_key(self.schema_version);
    match self.store.get(CACHE_NAMESPACE, &storage_key)? {
      Some(data) => serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| PersistenceError::codec(storage_key, e)),
      None => Ok(None),
    }
  }

  /// Serve the unfiltered listing of `kind` in place of a filtered one. The
  /// items are not filtered, so the result is flagged partial.
  fn derive_from_full_listing(
    &self,
    key: &ResourceKey,
    kind: &str,
  ) -> Result<Option<CacheEntry>, PersistenceError> {
    let Some(full) = self.read_stored(&ResourceKey::listing(kind, None))? else {
      return Ok(None);
    };
    debug!(key = %key, "Serving unfiltered listing as fallback");
    Ok(Some(CacheEntry {
      key: key.to_string(),
      provenance: Provenance::Derived,
      ..full
    }))
  }

  /// Rebuild a partial detail from the newest cached listing containing it.
  fn derive_from_listings(
    &self,
    key: &ResourceKey,
    kind: &str,
    id: &str,
  ) -> Result<Option<CacheEntry>, PersistenceError> {
    let prefix = ResourceKey::listing_prefix(kind, self.schema_version);
    let mut best: Option<CacheEntry> = None;

    for (_, data) in self.store.list_prefix(CACHE_NAMESPACE, &prefix)? {
      let Ok(listing) = serde_json::from_slice::<CacheEntry>(&data) else {
        continue;
      };
      let found = listing.data.as_array().and_then(|items| {
        items
          .iter()
          .find(|item| ResourceKey::for_item(kind, item).as_ref() == Some(key))
      });
      let Some(item) = found else {
        continue;
      };
      if best
        .as_ref()
        .is_some_and(|b| b.captured_at >= listing.captured_at)
      {
        continue;
      }

      let mut partial = item.clone();
      self.registry.strip_nested(kind, &mut partial);
      best = Some(CacheEntry {
        key: key.to_string(),
        data: partial,
        captured_at: listing.captured_at,
        provenance: Provenance::Derived,
        invalidated: false,
      });
    }

    if best.is_some() {
      debug!(kind, id, "Derived partial snapshot from cached listing");
    }
    Ok(best)
  }
}
