//! Core types for cached snapshots.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a snapshot came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
  /// Fetched directly for its key.
  Exact,
  /// Rebuilt from a broader listing; nested collections are missing.
  Derived,
}

/// A snapshot of a previously fetched or derived resource graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
  /// Text form of the resource key (`visit:7`, `visit?status=open`).
  pub key: String,
  pub data: Value,
  pub captured_at: DateTime<Utc>,
  pub provenance: Provenance,
  /// Captured before the last global refresh; still servable, but the read
  /// path should try the network first.
  #[serde(skip)]
  pub invalidated: bool,
}

impl CacheEntry {
  pub fn new(key: String, data: Value, provenance: Provenance) -> Self {
    Self {
      key,
      data,
      captured_at: Utc::now(),
      provenance,
      invalidated: false,
    }
  }

  /// Age strictly greater than `threshold`. Advisory only.
  pub fn is_stale(&self, threshold: Duration) -> bool {
    self.age() > threshold
  }

  pub fn age(&self) -> Duration {
    Utc::now() - self.captured_at
  }

  /// Structurally incomplete (derived from a listing).
  pub fn is_partial(&self) -> bool {
    self.provenance == Provenance::Derived
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
    }
  }

  pub fn from_cache(data: T, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
    }
  }

  /// Network unreachable or failed; serving whatever the cache had.
  pub fn offline(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
    }
  }
}

/// Indicates where served data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache past the staleness threshold
  CacheStale,
  /// Network unavailable, serving cached data
  Offline,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_staleness_is_strict() {
    let mut entry = CacheEntry::new("visit:1".into(), json!({}), Provenance::Exact);
    entry.captured_at = Utc::now() - Duration::hours(25);
    assert!(entry.is_stale(Duration::hours(24)));
    assert!(!entry.is_stale(Duration::hours(26)));
  }

  #[test]
  fn test_provenance_serializes_lowercase() {
    let entry = CacheEntry::new("visit:1".into(), json!({}), Provenance::Derived);
    let value = serde_json::to_value(&entry).unwrap();
    assert_eq!(value["provenance"], "derived");
    assert!(entry.is_partial());
  }
}
