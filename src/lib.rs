//! Offline-first client core for field data collection.
//!
//! Writes made without a connection are persisted in a FIFO queue and
//! replayed in order once the remote service is reachable again. Reads blend
//! the last known server state with those pending writes, so the user sees
//! their own changes immediately.

pub mod cache;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod event;
pub mod overlay;
pub mod preload;
pub mod queue;
pub mod registry;
pub mod remote;
pub mod store;
pub mod sync;

pub use client::{ClientOptions, FieldClient, OptimisticView, ReadOutcome, ViewSource, WriteOutcome};
pub use error::{PersistenceError, RemoteError, SyncError};
