//! Remote service collaborator: the single source of truth.

mod http;
#[cfg(test)]
pub(crate) mod scripted;

pub use http::HttpRemote;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::RemoteError;
use crate::queue::{SyncTask, TaskId, Verb};

/// A permanently abandoned write, reported for the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
  pub task_id: TaskId,
  pub resource_path: String,
  pub verb: Verb,
  pub payload: Value,
  /// HTTP status of the refusal.
  pub status: u16,
  pub rejection_reason: String,
}

impl AuditRecord {
  pub fn for_rejection(task: &SyncTask, status: u16, reason: &str) -> Self {
    Self {
      task_id: task.id.clone(),
      resource_path: task.resource_path.clone(),
      verb: task.verb,
      payload: task.payload.clone(),
      status,
      rejection_reason: reason.to_string(),
    }
  }

  /// Human-readable message for the audit trail: `Status 400: reason`.
  pub fn error_message(&self) -> String {
    format!("Status {}: {}", self.status, self.rejection_reason)
  }
}

/// Operations the core needs from the remote service.
///
/// Implementations must keep transport failures (`RemoteError::Transient`)
/// distinct from application-level refusals (`RemoteError::Rejected`).
#[async_trait]
pub trait RemoteService: Send + Sync {
  /// GET a resource path. Collections come back as a JSON array of members.
  async fn fetch(&self, path: &str) -> Result<Value, RemoteError>;

  /// Deliver a write.
  async fn deliver(&self, verb: Verb, path: &str, payload: &Value) -> Result<(), RemoteError>;

  /// Record an abandoned write. Best-effort.
  async fn audit(&self, record: &AuditRecord) -> Result<(), RemoteError>;

  /// Cheap reachability check.
  async fn ping(&self) -> Result<(), RemoteError>;
}
