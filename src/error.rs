//! Error taxonomy shared by the library modules.
//!
//! The binary and TUI wrap these in `color_eyre::Report`; everything below
//! the facade keeps them typed so callers can tell a dropped connection from
//! a write the server will never accept.

use thiserror::Error;

/// The durable store failed to read or write.
///
/// Never swallowed: a queued write that silently failed to persist is a lost
/// write.
#[derive(Error, Debug)]
pub enum PersistenceError {
  #[error("Storage backend error: {0}")]
  Backend(#[from] rusqlite::Error),
  #[error("Failed to (de)serialize stored document '{key}': {source}")]
  Codec {
    key: String,
    #[source]
    source: serde_json::Error,
  },
  #[error("Storage lock poisoned: {0}")]
  Poisoned(String),
  #[error("Storage I/O error: {0}")]
  Io(#[from] std::io::Error),
}

impl PersistenceError {
  pub(crate) fn codec(key: impl Into<String>, source: serde_json::Error) -> Self {
    Self::Codec {
      key: key.into(),
      source,
    }
  }
}

/// Failure talking to the remote service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
  /// Nothing definitive came back: no route, timeout, gateway trouble.
  #[error("Transient network failure: {reason}")]
  Transient { reason: String },
  /// The service answered and refused the request.
  #[error("Rejected by remote service ({status}): {reason}")]
  Rejected { status: u16, reason: String },
}

impl RemoteError {
  pub fn transient(reason: impl Into<String>) -> Self {
    Self::Transient {
      reason: reason.into(),
    }
  }

  pub fn rejected(status: u16, reason: impl Into<String>) -> Self {
    Self::Rejected {
      status,
      reason: reason.into(),
    }
  }

  pub fn is_transient(&self) -> bool {
    matches!(self, Self::Transient { .. })
  }
}

/// Errors surfaced by [`crate::FieldClient`].
#[derive(Error, Debug)]
pub enum SyncError {
  #[error("Network unavailable: {0}")]
  TransientNetwork(String),
  #[error("Remote service rejected the request ({status}): {reason}")]
  DefinitiveRejection { status: u16, reason: String },
  #[error(transparent)]
  Persistence(#[from] PersistenceError),
  #[error("Invalid resource key '{0}'")]
  InvalidKey(String),
  #[error("Unknown resource kind '{0}'")]
  UnknownResource(String),
}

impl From<RemoteError> for SyncError {
  fn from(err: RemoteError) -> Self {
    match err {
      RemoteError::Transient { reason } => Self::TransientNetwork(reason),
      RemoteError::Rejected { status, reason } => Self::DefinitiveRejection { status, reason },
    }
  }
}
