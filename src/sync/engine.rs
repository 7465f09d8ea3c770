//! Queue drain: replay pending writes in order, stop at the first transient
//! failure, abandon definitive rejections.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::guard::DrainLatch;
use crate::cache::CacheStore;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{PersistenceError, RemoteError};
use crate::event::SyncNotification;
use crate::queue::{DeadLetterStore, SyncTask, TaskStore};
use crate::remote::{AuditRecord, RemoteService};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_AUDIT_TIMEOUT: Duration = Duration::from_secs(5);

/// How a drain ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
  /// Every task in the snapshot was delivered or abandoned.
  Completed,
  /// Stopped at a transient failure; that task and the rest stay queued.
  Halted { reason: String },
  /// Another drain held the latch; nothing was attempted.
  AlreadyRunning,
  /// Unreachable at start; nothing was attempted.
  Offline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
  pub outcome: DrainOutcome,
  pub delivered: usize,
  pub rejected: usize,
  /// Queue length after the drain.
  pub remaining: usize,
  /// Whether the cache was invalidated at the end.
  pub refreshed: bool,
}

impl DrainReport {
  fn idle(outcome: DrainOutcome, remaining: usize) -> Self {
    Self {
      outcome,
      delivered: 0,
      rejected: 0,
      remaining,
      refreshed: false,
    }
  }

  pub fn is_complete(&self) -> bool {
    self.outcome == DrainOutcome::Completed
  }

  /// One line for a status bar.
  pub fn summary(&self) -> String {
    match &self.outcome {
      DrainOutcome::Completed if self.delivered + self.rejected == 0 => "Nothing to sync".to_string(),
      DrainOutcome::Completed if self.rejected == 0 => {
        format!("Synced {} item(s)", self.delivered)
      }
      DrainOutcome::Completed => format!(
        "Synced {} item(s), {} abandoned",
        self.delivered, self.rejected
      ),
      DrainOutcome::Halted { reason } => format!(
        "Sync paused, {} pending ({})",
        self.remaining, reason
      ),
      DrainOutcome::AlreadyRunning => "Sync already in progress".to_string(),
      DrainOutcome::Offline => format!("Offline, {} pending", self.remaining),
    }
  }
}

/// Replays the queue against the remote service.
///
/// Tasks are sent strictly one at a time in enqueue order: task N+1 is never
/// sent before task N has been removed, so a server-side dependency on an
/// earlier creation always holds.
pub struct SyncEngine {
  queue: TaskStore,
  dead_letters: DeadLetterStore,
  cache: CacheStore,
  remote: Arc<dyn RemoteService>,
  connectivity: Arc<dyn ConnectivityMonitor>,
  notifications: broadcast::Sender<SyncNotification>,
  latch: DrainLatch,
  request_timeout: Duration,
  audit_timeout: Duration,
}

impl SyncEngine {
  pub fn new(
    queue: TaskStore,
    dead_letters: DeadLetterStore,
    cache: CacheStore,
    remote: Arc<dyn RemoteService>,
    connectivity: Arc<dyn ConnectivityMonitor>,
    notifications: broadcast::Sender<SyncNotification>,
  ) -> Self {
    Self {
      queue,
      dead_letters,
      cache,
      remote,
      connectivity,
      notifications,
      latch: DrainLatch::new(),
      request_timeout: DEFAULT_REQUEST_TIMEOUT,
      audit_timeout: DEFAULT_AUDIT_TIMEOUT,
    }
  }

  /// A delivery that takes longer than this counts as a transient failure.
  pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
    self.request_timeout = timeout;
    self
  }

  pub fn with_audit_timeout(mut self, timeout: Duration) -> Self {
    self.audit_timeout = timeout;
    self
  }

  pub fn is_draining(&self) -> bool {
    self.latch.is_held()
  }

  /// Drain the queue once.
  ///
  /// Works on a snapshot taken at the start; tasks enqueued meanwhile wait
  /// for the next drain. Only persistence failures are returned as errors,
  /// network outcomes are reported in the [`DrainReport`].
  pub async fn drain(&self) -> Result<DrainReport, PersistenceError> {
    let Some(_permit) = self.latch.try_acquire() else {
      debug!("Drain requested while another is running");
      return Ok(DrainReport::idle(DrainOutcome::AlreadyRunning, self.queue.len()?));
    };

    if !self.connectivity.is_reachable() {
      return Ok(DrainReport::idle(DrainOutcome::Offline, self.queue.len()?));
    }

    let snapshot = self.queue.list()?;
    if snapshot.is_empty() {
      return Ok(DrainReport::idle(DrainOutcome::Completed, 0));
    }

    info!(pending = snapshot.len(), "Draining write queue");
    self.notify(SyncNotification::DrainStarted {
      pending: snapshot.len(),
    });

    let mut delivered = 0;
    let mut rejected = 0;
    let mut halted = None;

    for mut task in snapshot {
      if !self.connectivity.is_reachable() {
        halted = Some("connection lost".to_string());
        break;
      }

      self.queue.record_attempt(&mut task)?;

      match self.send(&task).await {
        Ok(()) => {
          self.queue.remove(&task.id)?;
          delivered += 1;
          info!(task_id = %task.id, path = %task.resource_path, "Delivered queued write");
        }
        Err(RemoteError::Rejected { status, reason }) => {
          self.abandon(&task, status, &reason).await?;
          rejected += 1;
        }
        Err(RemoteError::Transient { reason }) => {
          warn!(
            task_id = %task.id,
            attempts = task.attempt_count,
            reason = %reason,
            "Transient failure, halting drain"
          );
          halted = Some(reason);
          break;
        }
      }
    }

    let remaining = self.queue.len()?;
    let refreshed = halted.is_none() && self.refresh_cache();
    let outcome = match halted {
      Some(reason) => DrainOutcome::Halted { reason },
      None => DrainOutcome::Completed,
    };

    let report = DrainReport {
      outcome,
      delivered,
      rejected,
      remaining,
      refreshed,
    };
    info!(
      delivered,
      rejected,
      remaining,
      refreshed,
      "Drain finished"
    );
    self.notify(SyncNotification::DrainFinished(report.clone()));
    Ok(report)
  }

  async fn send(&self, task: &SyncTask) -> Result<(), RemoteError> {
    let delivery = self
      .remote
      .deliver(task.verb, &task.resource_path, &task.payload);
    match tokio::time::timeout(self.request_timeout, delivery).await {
      Ok(result) => result,
      Err(_) => Err(RemoteError::transient(format!(
        "no answer within {}s",
        self.request_timeout.as_secs_f32()
      ))),
    }
  }

  /// Drop a refused task from the queue, keep it as a dead letter and report
  /// it. The audit call may fail or time out without consequence.
  async fn abandon(&self, task: &SyncTask, status: u16, reason: &str) -> Result<(), PersistenceError> {
    // Dead letter first: a crash in between leaves a duplicate, not a loss.
    self.dead_letters.record(task.clone(), status, reason)?;
    self.queue.remove(&task.id)?;

    let record = AuditRecord::for_rejection(task, status, reason);
    match tokio::time::timeout(self.audit_timeout, self.remote.audit(&record)).await {
      Ok(Ok(())) => debug!(task_id = %task.id, "Rejection audited"),
      Ok(Err(e)) => warn!(task_id = %task.id, error = %e, "Audit report failed"),
      Err(_) => warn!(task_id = %task.id, "Audit report timed out"),
    }

    self.notify(SyncNotification::TaskRejected {
      task_id: task.id.clone(),
      description: task.describe(),
      status,
      reason: reason.to_string(),
    });
    Ok(())
  }

  fn refresh_cache(&self) -> bool {
    match self.cache.invalidate() {
      Ok(_) => {
        self.notify(SyncNotification::CacheRefreshed);
        true
      }
      Err(e) => {
        warn!(error = %e, "Cache invalidation failed after drain");
        false
      }
    }
  }

  fn notify(&self, notification: SyncNotification) {
    // No subscribers is fine.
    let _ = self.notifications.send(notification);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{Provenance, ResourceKey};
  use crate::connectivity::Connectivity;
  use crate::queue::{NewTask, TaskId, Verb};
  use crate::registry::Registry;
  use crate::remote::scripted::{Outcome, ScriptedRemote};
  use crate::store::{DurableStore, MemoryStore};
  use serde_json::json;

  struct Harness {
    store: Arc<MemoryStore>,
    queue: TaskStore,
    dead_letters: DeadLetterStore,
    cache: CacheStore,
    remote: Arc<ScriptedRemote>,
    connectivity: Arc<Connectivity>,
    notifications: broadcast::Sender<SyncNotification>,
  }

  impl Harness {
    fn new() -> Self {
      let store = Arc::new(MemoryStore::new());
      let durable: Arc<dyn DurableStore> = store.clone();
      let (notifications, _) = broadcast::channel(64);
      Self {
        queue: TaskStore::new(durable.clone()),
        dead_letters: DeadLetterStore::new(durable.clone()),
        cache: CacheStore::new(durable, Arc::new(Registry::field_visits()), 2),
        store,
        remote: Arc::new(ScriptedRemote::new()),
        connectivity: Arc::new(Connectivity::new(true)),
        notifications,
      }
    }

    fn engine(&self) -> SyncEngine {
      SyncEngine::new(
        self.queue.clone(),
        self.dead_letters.clone(),
        self.cache.clone(),
        self.remote.clone(),
        self.connectivity.clone(),
        self.notifications.clone(),
      )
      .with_request_timeout(Duration::from_millis(200))
      .with_audit_timeout(Duration::from_millis(100))
    }

    fn enqueue(&self, verb: Verb, path: &str) -> TaskId {
      self
        .queue
        .enqueue(NewTask::new(verb, path, json!({ "path": path })))
        .unwrap()
    }

    fn queued_paths(&self) -> Vec<String> {
      self
        .queue
        .list()
        .unwrap()
        .into_iter()
        .map(|t| t.resource_path)
        .collect()
    }
  }

  #[tokio::test]
  async fn test_transient_failure_halts_and_keeps_order() {
    let h = Harness::new();
    h.enqueue(Verb::Create, "/buildings");
    h.enqueue(Verb::Create, "/flocks");
    h.enqueue(Verb::Create, "/observations");
    h.remote
      .script("/flocks", Outcome::Fail(RemoteError::transient("connection reset")));

    let report = h.engine().drain().await.unwrap();

    assert_eq!(
      report.outcome,
      DrainOutcome::Halted {
        reason: "connection reset".to_string()
      }
    );
    assert_eq!(report.delivered, 1);
    assert_eq!(report.remaining, 2);
    assert!(!report.refreshed);
    assert_eq!(h.queued_paths(), vec!["/flocks", "/observations"]);
    assert_eq!(h.remote.delivered_paths(), vec!["/buildings"]);
    assert_eq!(h.queue.list().unwrap()[0].attempt_count, 1);
    assert_eq!(h.queue.list().unwrap()[1].attempt_count, 0);
  }

  #[tokio::test]
  async fn test_rejection_is_abandoned_and_drain_continues() {
    let h = Harness::new();
    let closed = h.enqueue(Verb::Action, "/visits/3/close");
    h.enqueue(Verb::Create, "/observations");
    h.remote.script(
      "/visits/3/close",
      Outcome::Fail(RemoteError::rejected(400, "Visit already closed")),
    );
    let mut rx = h.notifications.subscribe();

    let report = h.engine().drain().await.unwrap();

    assert_eq!(report.outcome, DrainOutcome::Completed);
    assert_eq!((report.delivered, report.rejected, report.remaining), (1, 1, 0));
    assert_eq!(h.remote.delivered_paths(), vec!["/observations"]);

    let audits = h.remote.audits();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].task_id, closed);
    assert_eq!(audits[0].rejection_reason, "Visit already closed");
    assert_eq!(audits[0].status, 400);
    assert_eq!(audits[0].error_message(), "Status 400: Visit already closed");

    let letters = h.dead_letters.list().unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].status, 400);

    let mut saw_rejection = false;
    while let Ok(notification) = rx.try_recv() {
      if let SyncNotification::TaskRejected { task_id, .. } = notification {
        assert_eq!(task_id, closed);
        saw_rejection = true;
      }
    }
    assert!(saw_rejection);
  }

  #[tokio::test]
  async fn test_audit_failure_does_not_block_drain() {
    let h = Harness::new();
    h.enqueue(Verb::Update, "/visits/3");
    h.enqueue(Verb::Create, "/observations");
    h.remote
      .script("/visits/3", Outcome::Fail(RemoteError::rejected(422, "invalid")));
    h.remote.fail_audits();

    let report = h.engine().drain().await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.remaining, 0);
    assert_eq!(h.remote.delivered_paths(), vec!["/observations"]);
  }

  #[tokio::test]
  async fn test_concurrent_drain_returns_already_running() {
    let h = Harness::new();
    h.enqueue(Verb::Create, "/buildings");
    h.remote
      .script("/buildings", Outcome::Slow(Duration::from_millis(50)));
    let engine = h.engine();

    let (first, second) = tokio::join!(engine.drain(), async {
      tokio::time::sleep(Duration::from_millis(10)).await;
      engine.drain().await
    });

    assert_eq!(first.unwrap().delivered, 1);
    assert_eq!(second.unwrap().outcome, DrainOutcome::AlreadyRunning);
    assert_eq!(h.remote.delivered_paths(), vec!["/buildings"]);
    assert!(!engine.is_draining());
  }

  #[tokio::test]
  async fn test_timeout_counts_as_transient() {
    let h = Harness::new();
    h.enqueue(Verb::Create, "/buildings");
    h.enqueue(Verb::Create, "/flocks");
    h.remote.script("/buildings", Outcome::Hang);

    let report = h.engine().drain().await.unwrap();
    assert!(matches!(report.outcome, DrainOutcome::Halted { .. }));
    assert_eq!(h.queued_paths(), vec!["/buildings", "/flocks"]);
    assert!(h.remote.delivered_paths().is_empty());
  }

  #[tokio::test]
  async fn test_offline_attempts_nothing() {
    let h = Harness::new();
    h.enqueue(Verb::Create, "/buildings");
    h.connectivity.set_reachable(false);

    let report = h.engine().drain().await.unwrap();
    assert_eq!(report.outcome, DrainOutcome::Offline);
    assert_eq!(report.remaining, 1);
    assert!(h.remote.delivered_paths().is_empty());
    assert_eq!(h.queue.list().unwrap()[0].attempt_count, 0);
  }

  #[tokio::test]
  async fn test_connection_lost_mid_drain_halts() {
    let h = Harness::new();
    h.enqueue(Verb::Create, "/buildings");
    h.enqueue(Verb::Create, "/flocks");
    h.remote
      .script("/buildings", Outcome::Slow(Duration::from_millis(50)));
    let engine = h.engine();

    let (report, _) = tokio::join!(engine.drain(), async {
      tokio::time::sleep(Duration::from_millis(10)).await;
      h.connectivity.set_reachable(false);
    });

    let report = report.unwrap();
    assert_eq!(report.delivered, 1);
    assert!(matches!(report.outcome, DrainOutcome::Halted { .. }));
    assert_eq!(h.queued_paths(), vec!["/flocks"]);
  }

  #[tokio::test]
  async fn test_full_drain_invalidates_cache() {
    let h = Harness::new();
    let key = ResourceKey::detail("visit", "7");
    h.cache.put(&key, json!({ "id": 7 }), Provenance::Exact).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(2));
    h.enqueue(Verb::Create, "/observations");
    let mut rx = h.notifications.subscribe();

    let report = h.engine().drain().await.unwrap();
    assert!(report.refreshed);
    assert!(h.cache.get(&key).unwrap().unwrap().invalidated);

    let mut saw_refresh = false;
    while let Ok(notification) = rx.try_recv() {
      saw_refresh |= notification == SyncNotification::CacheRefreshed;
    }
    assert!(saw_refresh);
  }

  #[tokio::test]
  async fn test_empty_queue_does_not_refresh() {
    let h = Harness::new();
    let report = h.engine().drain().await.unwrap();
    assert_eq!(report.outcome, DrainOutcome::Completed);
    assert!(!report.refreshed);
    assert_eq!(report.summary(), "Nothing to sync");
  }

  #[tokio::test]
  async fn test_persistence_failure_surfaces() {
    let h = Harness::new();
    h.enqueue(Verb::Create, "/buildings");
    h.store.fail_writes(true);

    assert!(h.engine().drain().await.is_err());
    h.store.fail_writes(false);
    assert_eq!(h.queued_paths(), vec!["/buildings"]);
    assert!(h.remote.delivered_paths().is_empty());
  }
}
