//! Durable task store.

use std::sync::Arc;
use tracing::{debug, error, info};

use super::task::{NewTask, SyncTask, TaskId};
use crate::error::PersistenceError;
use crate::store::{DurableStore, QUEUE_NAMESPACE};

/// FIFO queue of pending writes, persisted on every mutation.
///
/// There is no in-memory copy: the durable store is read on every `list`, so
/// a restarted process sees exactly what was acknowledged before the crash.
#[derive(Clone)]
pub struct TaskStore {
  store: Arc<dyn DurableStore>,
}

impl TaskStore {
  pub fn new(store: Arc<dyn DurableStore>) -> Self {
    Self { store }
  }

  /// Append a task to the tail of the queue.
  ///
  /// Only fails if the write could not be persisted; the caller must surface
  /// that, since the user's change would otherwise vanish.
  pub fn enqueue(&self, task: NewTask) -> Result<TaskId, PersistenceError> {
    let task = SyncTask::stamp(task);
    self.write(&task)?;
    info!(
      task_id = %task.id,
      verb = %task.verb,
      path = %task.resource_path,
      "Queued write"
    );
    Ok(task.id)
  }

  /// Tasks in enqueue order.
  pub fn list(&self) -> Result<Vec<SyncTask>, PersistenceError> {
    let rows = self.store.list(QUEUE_NAMESPACE)?;
    Ok(
      rows
        .into_iter()
        .filter_map(|(key, data)| match serde_json::from_slice(&data) {
          Ok(task) => Some(task),
          Err(e) => {
            // Left in place on disk; a later version may still read it.
            error!(key = %key, error = %e, "Unreadable queued task skipped");
            None
          }
        })
        .collect(),
    )
  }

  /// Reload the queue from durable storage.
  pub fn load_all(&self) -> Result<Vec<SyncTask>, PersistenceError> {
    let tasks = self.list()?;
    info!(count = tasks.len(), "Loaded pending writes");
    Ok(tasks)
  }

  pub fn get(&self, id: &TaskId) -> Result<Option<SyncTask>, PersistenceError> {
    match self.store.get(QUEUE_NAMESPACE, id.as_str())? {
      Some(data) => serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| PersistenceError::codec(id.as_str(), e)),
      None => Ok(None),
    }
  }

  /// Number of readable tasks, matching what [`Self::list`] returns.
  pub fn len(&self) -> Result<usize, PersistenceError> {
    Ok(self.list()?.len())
  }

  pub fn is_empty(&self) -> Result<bool, PersistenceError> {
    Ok(self.len()? == 0)
  }

  /// Remove a task. Reserved for the sync engine.
  pub(crate) fn remove(&self, id: &TaskId) -> Result<(), PersistenceError> {
    self.store.remove(QUEUE_NAMESPACE, id.as_str())?;
    debug!(task_id = %id, "Removed task from queue");
    Ok(())
  }

  /// Bump the attempt counter in place. Queue position is unchanged.
  pub(crate) fn record_attempt(&self, task: &mut SyncTask) -> Result<(), PersistenceError> {
    task.attempt_count += 1;
    self.write(task)
  }

  fn write(&self, task: &SyncTask) -> Result<(), PersistenceError> {
    let data = serde_json::to_vec(task).map_err(|e| PersistenceError::codec(task.id.as_str(), e))?;
    self.store.set(QUEUE_NAMESPACE, task.id.as_str(), &data)
  }
}
