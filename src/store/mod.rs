//! Durable key-value storage shared by the task queue and the cache.
//!
//! Everything persisted by this crate goes through [`DurableStore`], split
//! into namespaces so the pending-write queue never collides with cache
//! entries.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::PersistenceError;

/// Namespace holding the ordered pending-write queue.
pub const QUEUE_NAMESPACE: &str = "sync_queue";
/// Namespace holding writes the remote service refused.
pub const DEAD_LETTER_NAMESPACE: &str = "dead_letter";
/// Namespace holding cached resource snapshots.
pub const CACHE_NAMESPACE: &str = "cache";
/// Namespace for bookkeeping values (refresh watermark and similar).
pub const META_NAMESPACE: &str = "meta";

/// Ordered, namespaced byte store.
///
/// Every mutating call is durable once it returns `Ok`. `list` yields entries
/// in first-insertion order; overwriting an existing key keeps its position.
pub trait DurableStore: Send + Sync {
  /// Fetch a single value.
  fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, PersistenceError>;

  /// Insert or overwrite a value.
  fn set(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), PersistenceError>;

  /// All entries of a namespace in insertion order.
  fn list(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>, PersistenceError>;

  /// Entries whose key starts with `prefix`, in insertion order.
  fn list_prefix(
    &self,
    namespace: &str,
    prefix: &str,
  ) -> Result<Vec<(String, Vec<u8>)>, PersistenceError> {
    Ok(
      self
        .list(namespace)?
        .into_iter()
        .filter(|(key, _)| key.starts_with(prefix))
        .collect(),
    )
  }

  /// Delete a value. Removing a missing key is not an error.
  fn remove(&self, namespace: &str, key: &str) -> Result<(), PersistenceError>;
}
