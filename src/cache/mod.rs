//! Snapshot cache for server-fetched resource graphs.
//!
//! This module provides:
//! - Composed, schema-versioned keys for details and listings
//! - Provenance tracking (fetched directly vs. derived from a listing)
//! - A derived fallback that reconstructs a partial detail from any cached
//!   listing containing it
//! - A cache-first layer that serves stale or partial data when offline

mod entry;
mod key;
mod layer;
mod store;

pub use entry::{CacheEntry, CacheResult, CacheSource, Provenance};
pub use key::ResourceKey;
pub use layer::CacheLayer;
pub use store::CacheStore;
