//! Volatile store for tests and throwaway sessions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::DurableStore;
use crate::error::PersistenceError;

struct Row {
  namespace: String,
  key: String,
  value: Vec<u8>,
}

/// In-memory [`DurableStore`] with optional write-failure injection.
#[derive(Default)]
pub struct MemoryStore {
  rows: Mutex<Vec<Row>>,
  fail_writes: AtomicBool,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make every subsequent `set`/`remove` fail, simulating a full disk.
  pub fn fail_writes(&self, fail: bool) {
    self.fail_writes.store(fail, Ordering::SeqCst);
  }

  fn lock(&self) -> Result<MutexGuard<'_, Vec<Row>>, PersistenceError> {
    self
      .rows
      .lock()
      .map_err(|e| PersistenceError::Poisoned(e.to_string()))
  }

  fn check_writable(&self) -> Result<(), PersistenceError> {
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(PersistenceError::Io(std::io::Error::other(
        "simulated write failure",
      )));
    }
    Ok(())
  }
}

impl DurableStore for MemoryStore {
  fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
    let rows = self.lock()?;
    Ok(
      rows
        .iter()
        .find(|r| r.namespace == namespace && r.key == key)
        .map(|r| r.value.clone()),
    )
  }

  fn set(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), PersistenceError> {
    self.check_writable()?;
    let mut rows = self.lock()?;
    match rows
      .iter_mut()
      .find(|r| r.namespace == namespace && r.key == key)
    {
      Some(row) => row.value = value.to_vec(),
      None => rows.push(Row {
        namespace: namespace.to_string(),
        key: key.to_string(),
        value: value.to_vec(),
      }),
    }
    Ok(())
  }

  fn list(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>, PersistenceError> {
    let rows = self.lock()?;
    Ok(
      rows
        .iter()
        .filter(|r| r.namespace == namespace)
        .map(|r| (r.key.clone(), r.value.clone()))
        .collect(),
    )
  }

  fn remove(&self, namespace: &str, key: &str) -> Result<(), PersistenceError> {
    self.check_writable()?;
    let mut rows = self.lock()?;
    rows.retain(|r| !(r.namespace == namespace && r.key == key));
    Ok(())
  }
}
