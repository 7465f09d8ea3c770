//! Replays the pending-write queue against the remote service.

mod engine;
mod guard;

pub use engine::{DrainOutcome, DrainReport, SyncEngine};
pub use guard::{DrainLatch, DrainPermit};
