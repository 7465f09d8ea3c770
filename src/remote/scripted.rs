//! Scripted remote service for tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{AuditRecord, RemoteService};
use crate::error::RemoteError;
use crate::queue::Verb;

/// Outcome of one scripted delivery.
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
  Accept,
  Fail(RemoteError),
  /// Never answers within any sane timeout.
  Hang,
  /// Accepts after a delay.
  Slow(Duration),
}

/// Remote whose answers are scripted per path. Unscripted deliveries are
/// accepted; unscripted fetches fail transiently.
#[derive(Default)]
pub(crate) struct ScriptedRemote {
  deliveries: Mutex<HashMap<String, VecDeque<Outcome>>>,
  resources: Mutex<HashMap<String, Result<Value, RemoteError>>>,
  fetch_delays: Mutex<HashMap<String, Duration>>,
  delivered: Mutex<Vec<(Verb, String, Value)>>,
  fetched: Mutex<Vec<String>>,
  audits: Mutex<Vec<AuditRecord>>,
  audit_fails: AtomicBool,
  unreachable: AtomicBool,
}

impl ScriptedRemote {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn script(&self, path: &str, outcome: Outcome) {
    self
      .deliveries
      .lock()
      .unwrap()
      .entry(path.to_string())
      .or_default()
      .push_back(outcome);
  }

  pub(crate) fn serve(&self, path: &str, response: Result<Value, RemoteError>) {
    self
      .resources
      .lock()
      .unwrap()
      .insert(path.to_string(), response);
  }

  /// Serve `path` only after `delay`.
  pub(crate) fn serve_slowly(&self, path: &str, delay: Duration, response: Result<Value, RemoteError>) {
    self
      .fetch_delays
      .lock()
      .unwrap()
      .insert(path.to_string(), delay);
    self.serve(path, response);
  }

  pub(crate) fn fail_audits(&self) {
    self.audit_fails.store(true, Ordering::SeqCst);
  }

  pub(crate) fn set_unreachable(&self, unreachable: bool) {
    self.unreachable.store(unreachable, Ordering::SeqCst);
  }

  pub(crate) fn delivered_paths(&self) -> Vec<String> {
    self
      .delivered
      .lock()
      .unwrap()
      .iter()
      .map(|(_, path, _)| path.clone())
      .collect()
  }

  pub(crate) fn fetched_paths(&self) -> Vec<String> {
    self.fetched.lock().unwrap().clone()
  }

  pub(crate) fn audits(&self) -> Vec<AuditRecord> {
    self.audits.lock().unwrap().clone()
  }
}

#[async_trait]
impl RemoteService for ScriptedRemote {
  async fn fetch(&self, path: &str) -> Result<Value, RemoteError> {
    self.fetched.lock().unwrap().push(path.to_string());
    if self.unreachable.load(Ordering::SeqCst) {
      return Err(RemoteError::transient("unreachable"));
    }
    let delay = self.fetch_delays.lock().unwrap().get(path).copied();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    self
      .resources
      .lock()
      .unwrap()
      .get(path)
      .cloned()
      .unwrap_or_else(|| Err(RemoteError::transient(format!("no route to {}", path))))
  }

  async fn deliver(&self, verb: Verb, path: &str, payload: &Value) -> Result<(), RemoteError> {
    let outcome = self
      .deliveries
      .lock()
      .unwrap()
      .get_mut(path)
      .and_then(VecDeque::pop_front)
      .unwrap_or(Outcome::Accept);

    match outcome {
      Outcome::Accept => {}
      Outcome::Fail(err) => return Err(err),
      Outcome::Hang => {
        tokio::time::sleep(Duration::from_secs(3600)).await;
      }
      Outcome::Slow(delay) => tokio::time::sleep(delay).await,
    }
    self
      .delivered
      .lock()
      .unwrap()
      .push((verb, path.to_string(), payload.clone()));
    Ok(())
  }

  async fn audit(&self, record: &AuditRecord) -> Result<(), RemoteError> {
    if self.audit_fails.load(Ordering::SeqCst) {
      return Err(RemoteError::transient("audit endpoint down"));
    }
    self.audits.lock().unwrap().push(record.clone());
    Ok(())
  }

  async fn ping(&self) -> Result<(), RemoteError> {
    if self.unreachable.load(Ordering::SeqCst) {
      Err(RemoteError::transient("unreachable"))
    } else {
      Ok(())
    }
  }
}
