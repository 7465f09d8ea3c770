//! Queued write intents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque, never reused task identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
  pub(crate) fn generate() -> Self {
    Self(Uuid::new_v4().to_string())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// First characters of the id, enough to name a task in a notification.
  pub fn short(&self) -> &str {
    self.0.get(..8).unwrap_or(&self.0)
  }
}

impl fmt::Display for TaskId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for TaskId {
  fn from(value: &str) -> Self {
    Self(value.to_string())
  }
}

/// What kind of write a task describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
  /// New resource (POST to the collection).
  Create,
  /// Partial update of an existing resource (merge-patch).
  Update,
  /// State transition trigger such as `/visits/{id}/close`; the body carries
  /// no meaning.
  Action,
}

impl Verb {
  /// HTTP method used to deliver this verb.
  pub fn http_method(self) -> &'static str {
    match self {
      Verb::Create => "POST",
      Verb::Update | Verb::Action => "PATCH",
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Verb::Create => "create",
      Verb::Update => "update",
      Verb::Action => "action",
    }
  }
}

impl fmt::Display for Verb {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Verb {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "create" | "post" => Ok(Verb::Create),
      "update" | "patch" => Ok(Verb::Update),
      "action" => Ok(Verb::Action),
      other => Err(format!("unknown verb '{}'", other)),
    }
  }
}

/// Caller-supplied part of a task, before the queue stamps it.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
  pub resource_path: String,
  pub verb: Verb,
  pub payload: Value,
}

impl NewTask {
  pub fn new(verb: Verb, resource_path: impl Into<String>, payload: Value) -> Self {
    Self {
      resource_path: resource_path.into(),
      verb,
      payload,
    }
  }
}

/// A queued, not yet confirmed write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTask {
  pub id: TaskId,
  pub resource_path: String,
  pub verb: Verb,
  pub payload: Value,
  pub enqueued_at: DateTime<Utc>,
  #[serde(default)]
  pub attempt_count: u32,
}

impl SyncTask {
  pub(crate) fn stamp(task: NewTask) -> Self {
    Self {
      id: TaskId::generate(),
      resource_path: task.resource_path,
      verb: task.verb,
      payload: task.payload,
      enqueued_at: Utc::now(),
      attempt_count: 0,
    }
  }

  /// Human label for notifications, e.g. `create /buildings`.
  pub fn describe(&self) -> String {
    format!("{} {}", self.verb, self.resource_path)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_verb_parse() {
    assert_eq!("create".parse::<Verb>(), Ok(Verb::Create));
    assert_eq!("PATCH".parse::<Verb>(), Ok(Verb::Update));
    assert_eq!("action".parse::<Verb>(), Ok(Verb::Action));
    assert!("delete".parse::<Verb>().is_err());
  }

  #[test]
  fn test_stamp_assigns_fresh_ids() {
    let a = SyncTask::stamp(NewTask::new(Verb::Create, "/buildings", json!({})));
    let b = SyncTask::stamp(NewTask::new(Verb::Create, "/buildings", json!({})));
    assert_ne!(a.id, b.id);
    assert_eq!(a.attempt_count, 0);
  }

  #[test]
  fn test_task_json_shape() {
    let task = SyncTask::stamp(NewTask::new(
      Verb::Action,
      "/visits/7/close",
      json!({}),
    ));
    let value = serde_json::to_value(&task).unwrap();
    assert_eq!(value["resourcePath"], "/visits/7/close");
    assert_eq!(value["verb"], "action");
    assert_eq!(value["attemptCount"], 0);
  }
}
