//! Writes the remote service refused, kept for manual reconciliation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use super::task::SyncTask;
use crate::error::PersistenceError;
use crate::store::{DurableStore, DEAD_LETTER_NAMESPACE};

/// A task abandoned after a definitive rejection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
  pub task: SyncTask,
  pub status: u16,
  pub reason: String,
  pub rejected_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct DeadLetterStore {
  store: Arc<dyn DurableStore>,
}

impl DeadLetterStore {
  pub fn new(store: Arc<dyn DurableStore>) -> Self {
    Self { store }
  }

  pub fn record(&self, task: SyncTask, status: u16, reason: &str) -> Result<(), PersistenceError> {
    let letter = DeadLetter {
      task,
      status,
      reason: reason.to_string(),
      rejected_at: Utc::now(),
    };
    let key = letter.task.id.to_string();
    let data = serde_json::to_vec(&letter).map_err(|e| PersistenceError::codec(&key, e))?;
    self.store.set(DEAD_LETTER_NAMESPACE, &key, &data)?;
    warn!(task_id = %key, status, reason, "Write moved to dead-letter store");
    Ok(())
  }

  /// Oldest rejection first.
  pub fn list(&self) -> Result<Vec<DeadLetter>, PersistenceError> {
    self
      .store
      .list(DEAD_LETTER_NAMESPACE)?
      .into_iter()
      .map(|(key, data)| serde_json::from_slice(&data).map_err(|e| PersistenceError::codec(key, e)))
      .collect()
  }

  /// Forget every dead letter. Returns how many were dropped.
  pub fn clear(&self) -> Result<usize, PersistenceError> {
    let rows = self.store.list(DEAD_LETTER_NAMESPACE)?;
    for (key, _) in &rows {
      self.store.remove(DEAD_LETTER_NAMESPACE, key)?;
    }
    Ok(rows.len())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::queue::{NewTask, Verb};
  use crate::store::MemoryStore;
  use serde_json::json;

  #[test]
  fn test_record_list_clear() {
    let dead = DeadLetterStore::new(Arc::new(MemoryStore::new()));
    let task = SyncTask::stamp(NewTask::new(Verb::Action, "/visits/3/close", json!({})));
    dead.record(task.clone(), 400, "Visite déjà clôturée").unwrap();

    let letters = dead.list().unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].task.id, task.id);
    assert_eq!(letters[0].status, 400);

    assert_eq!(dead.clear().unwrap(), 1);
    assert!(dead.list().unwrap().is_empty());
  }
}
