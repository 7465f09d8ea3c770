//! Cache keys for resource details and listings.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;
use crate::registry::{scalar_key, Registry};

/// Logical identity of something a consumer can read.
///
/// Text form: `customer:C1` for a detail, `visit` or `visit?status=open` for
/// a listing.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKey {
  Detail { kind: String, id: String },
  Listing { kind: String, query: Option<String> },
}

impl ResourceKey {
  pub fn detail(kind: impl Into<String>, id: impl Into<String>) -> Self {
    Self::Detail {
      kind: kind.into(),
      id: id.into(),
    }
  }

  pub fn listing(kind: impl Into<String>, query: Option<&str>) -> Self {
    Self::Listing {
      kind: kind.into(),
      query: query.map(normalize_query).filter(|q| !q.is_empty()),
    }
  }

  /// Detail key for an item found in a listing, keyed by its `id` (or the
  /// last segment of its IRI).
  pub fn for_item(kind: &str, item: &Value) -> Option<Self> {
    let id = item
      .get("id")
      .and_then(scalar_key)
      .or_else(|| {
        item
          .get("@id")
          .and_then(Value::as_str)
          .and_then(|iri| iri.rsplit('/').next())
          .map(String::from)
      })?;
    Some(Self::detail(kind, id))
  }

  pub fn kind(&self) -> &str {
    match self {
      Self::Detail { kind, .. } | Self::Listing { kind, .. } => kind,
    }
  }

  pub fn is_listing(&self) -> bool {
    matches!(self, Self::Listing { .. })
  }

  /// Key under which the snapshot is persisted.
  ///
  /// The schema version is part of the key, so bumping it orphans old
  /// entries instead of misreading them.
  pub fn storage_key(&self, schema_version: u32) -> String {
    match self {
      Self::Detail { kind, id } => format!("detail:{}:v{}:{}", kind, schema_version, id),
      Self::Listing { kind, query } => {
        let input = query.as_deref().unwrap_or("");
        // SHA256 hash for stable, fixed-length keys
        let mut hasher = Sha256::new();
        hasher.update(input.as_bytes());
        format!(
          "{}{}",
          Self::listing_prefix(kind, schema_version),
          hex::encode(hasher.finalize())
        )
      }
    }
  }

  /// Storage prefix shared by every listing of `kind`.
  pub fn listing_prefix(kind: &str, schema_version: u32) -> String {
    format!("listing:{}:v{}:", kind, schema_version)
  }

  /// Path on the remote service, relative to the API base.
  pub fn remote_path(&self, registry: &Registry) -> Result<String, SyncError> {
    let schema = registry
      .schema(self.kind())
      .ok_or_else(|| SyncError::UnknownResource(self.kind().to_string()))?;
    Ok(match self {
      Self::Detail { id, .. } => format!("{}/{}", schema.endpoint, id),
      Self::Listing { query: Some(q), .. } => format!("{}?{}", schema.endpoint, q),
      Self::Listing { query: None, .. } => schema.endpoint.clone(),
    })
  }
}

impl fmt::Display for ResourceKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Detail { kind, id } => write!(f, "{}:{}", kind, id),
      Self::Listing { kind, query: None } => write!(f, "{}", kind),
      Self::Listing {
        kind,
        query: Some(q),
      } => write!(f, "{}?{}", kind, q),
    }
  }
}

impl FromStr for ResourceKey {
  type Err = SyncError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    let invalid = || SyncError::InvalidKey(s.to_string());
    let is_kind = |k: &str| !k.is_empty() && k.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if let Some((kind, query)) = s.split_once('?') {
      if !is_kind(kind) {
        return Err(invalid());
      }
      return Ok(Self::listing(kind, Some(query)));
    }

    match s.split_once(':') {
      Some((kind, id)) if is_kind(kind) && !id.is_empty() => Ok(Self::detail(kind, id)),
      Some(_) => Err(invalid()),
      None if is_kind(s) => Ok(Self::listing(s, None)),
      None => Err(invalid()),
    }
  }
}

/// Sort query pairs so `a=1&b=2` and `b=2&a=1` share a cache entry.
fn normalize_query(query: &str) -> String {
  let mut pairs: Vec<&str> = query
    .trim()
    .trim_start_matches('?')
    .split('&')
    .map(str::trim)
    .filter(|p| !p.is_empty())
    .collect();
  pairs.sort_unstable();
  pairs.join("&")
}
