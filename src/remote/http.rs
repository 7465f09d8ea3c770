//! HTTP implementation of the remote service (JSON-LD API).

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{AuditRecord, RemoteService};
use crate::config::RemoteConfig;
use crate::error::RemoteError;
use crate::queue::Verb;

const LD_JSON: &str = "application/ld+json";
const MERGE_PATCH: &str = "application/merge-patch+json";

/// reqwest-based client for the remote API.
#[derive(Clone)]
pub struct HttpRemote {
  client: Client,
  base: String,
  token: Option<String>,
  audit_path: String,
  probe_path: String,
}

impl HttpRemote {
  pub fn new(config: &RemoteConfig, token: Option<String>) -> Result<Self> {
    let base = Url::parse(&config.url)
      .map_err(|e| eyre!("Invalid remote url '{}': {}", config.url, e))?;

    let client = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .connect_timeout(Duration::from_secs(config.timeout_secs.min(10)))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base: base.as_str().trim_end_matches('/').to_string(),
      token,
      audit_path: config.audit_path.clone(),
      probe_path: config.probe_path.clone(),
    })
  }

  fn url(&self, path: &str) -> String {
    join_url(&self.base, path)
  }

  fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
    match &self.token {
      Some(token) => request.bearer_auth(token),
      None => request,
    }
  }

  async fn send(&self, request: RequestBuilder) -> Result<Vec<u8>, RemoteError> {
    let response = self
      .authorize(request)
      .send()
      .await
      .map_err(|e| RemoteError::transient(e.to_string()))?;

    let status = response.status();
    let body = response
      .bytes()
      .await
      .map_err(|e| RemoteError::transient(e.to_string()))?;

    if status.is_success() {
      Ok(body.to_vec())
    } else {
      Err(classify_failure(status, &body))
    }
  }
}

#[async_trait]
impl RemoteService for HttpRemote {
  async fn fetch(&self, path: &str) -> Result<Value, RemoteError> {
    let body = self
      .send(self.client.get(self.url(path)).header(ACCEPT, LD_JSON))
      .await?;
    let value: Value = serde_json::from_slice(&body)
      .map_err(|e| RemoteError::transient(format!("unreadable response body: {}", e)))?;
    Ok(unwrap_collection(value))
  }

  async fn deliver(&self, verb: Verb, path: &str, payload: &Value) -> Result<(), RemoteError> {
    let url = self.url(path);
    let request = match verb {
      Verb::Create => self
        .client
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .json(payload),
      Verb::Update => self
        .client
        .patch(url)
        .header(CONTENT_TYPE, MERGE_PATCH)
        .body(payload.to_string()),
      // Trigger endpoints take an empty document.
      Verb::Action => self
        .client
        .patch(url)
        .header(CONTENT_TYPE, MERGE_PATCH)
        .body("{}"),
    };
    let request = request.header(ACCEPT, LD_JSON);

    self.send(request).await?;
    debug!(verb = %verb, path, "Delivered write");
    Ok(())
  }

  async fn audit(&self, record: &AuditRecord) -> Result<(), RemoteError> {
    let body = audit_body(record);
    self
      .send(self.client.post(self.url(&self.audit_path)).json(&body))
      .await?;
    Ok(())
  }

  async fn ping(&self) -> Result<(), RemoteError> {
    // Any HTTP answer proves the route works; only transport errors count.
    self
      .authorize(self.client.get(self.url(&self.probe_path)))
      .send()
      .await
      .map(|_| ())
      .map_err(|e| RemoteError::transient(e.to_string()))
  }
}

fn audit_body(record: &AuditRecord) -> Value {
  json!({
    "action": "SYNC_ERROR",
    "taskId": record.task_id,
    "endpoint": format!("{} {}", record.verb.http_method(), record.resource_path),
    "statusCode": record.status,
    "errorMessage": record.error_message(),
    "requestPayload": record.payload,
  })
}

fn join_url(base: &str, path: &str) -> String {
  let base = base.trim_end_matches('/');
  if path.starts_with('/') {
    format!("{}{}", base, path)
  } else {
    format!("{}/{}", base, path)
  }
}

/// Split non-2xx answers into "try again later" and "never going to work".
fn classify_failure(status: StatusCode, body: &[u8]) -> RemoteError {
  match status.as_u16() {
    // Expired credentials, throttling, gateways: the write itself is fine.
    401 | 408 | 425 | 429 | 502 | 503 | 504 => {
      RemoteError::transient(format!("HTTP {}", status.as_u16()))
    }
    code => RemoteError::rejected(code, rejection_reason(code, body)),
  }
}

/// Pull the human message out of an API error document.
fn rejection_reason(status: u16, body: &[u8]) -> String {
  serde_json::from_slice::<Value>(body)
    .ok()
    .and_then(|doc| {
      ["hydra:description", "description", "detail", "error"]
        .iter()
        .find_map(|field| doc.get(*field).and_then(Value::as_str).map(String::from))
    })
    .unwrap_or_else(|| format!("HTTP {}", status))
}

/// Collections arrive as `{"hydra:member": [...]}` (or `member`); hand back
/// the bare array.
fn unwrap_collection(value: Value) -> Value {
  match value {
    Value::Object(mut obj) => match obj.remove("hydra:member").or_else(|| obj.remove("member")) {
      Some(members @ Value::Array(_)) => members,
      Some(other) => {
        obj.insert("member".to_string(), other);
        Value::Object(obj)
      }
      None => Value::Object(obj),
    },
    other => other,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_classify_transient_statuses() {
    for code in [401u16, 429, 502, 503, 504] {
      let status = StatusCode::from_u16(code).unwrap();
      assert!(classify_failure(status, b"").is_transient(), "{}", code);
    }
  }

  #[test]
  fn test_classify_rejection_reason() {
    let body = br#"{"hydra:description": "name: This value should not be blank."}"#;
    assert_eq!(
      classify_failure(StatusCode::UNPROCESSABLE_ENTITY, body),
      RemoteError::rejected(422, "name: This value should not be blank.")
    );

    let body = r#"{"error": "Visite déjà clôturée"}"#;
    assert_eq!(
      classify_failure(StatusCode::BAD_REQUEST, body.as_bytes()),
      RemoteError::rejected(400, "Visite déjà clôturée")
    );

    assert_eq!(
      classify_failure(StatusCode::INTERNAL_SERVER_ERROR, b"<html>"),
      RemoteError::rejected(500, "HTTP 500")
    );
  }

  #[test]
  fn test_audit_body_carries_status() {
    let task = crate::queue::SyncTask::stamp(crate::queue::NewTask::new(
      Verb::Action,
      "/visits/3/close",
      json!({}),
    ));
    let record = AuditRecord::for_rejection(&task, 400, "Visit already closed");
    let body = audit_body(&record);

    assert_eq!(body["action"], "SYNC_ERROR");
    assert_eq!(body["endpoint"], "PATCH /visits/3/close");
    assert_eq!(body["statusCode"], 400);
    assert_eq!(body["errorMessage"], "Status 400: Visit already closed");
    assert_eq!(body["taskId"], task.id.as_str());
  }

  #[test]
  fn test_unwrap_collection() {
    let doc = json!({ "hydra:member": [{ "id": 1 }], "hydra:totalItems": 1 });
    assert_eq!(unwrap_collection(doc), json!([{ "id": 1 }]));

    let doc = json!({ "member": [{ "id": 2 }] });
    assert_eq!(unwrap_collection(doc), json!([{ "id": 2 }]));

    let doc = json!({ "@id": "/api/visits/1", "id": 1 });
    assert_eq!(unwrap_collection(doc.clone()), doc);
  }

  #[test]
  fn test_join_url() {
    let base = "https://field.example.com/api/";
    assert_eq!(join_url(base, "/visits/7"), "https://field.example.com/api/visits/7");
    assert_eq!(join_url(base, "visits"), "https://field.example.com/api/visits");
  }
}
