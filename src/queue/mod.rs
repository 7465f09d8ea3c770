//! Durable FIFO queue of writes waiting for the remote service.

mod dead_letter;
mod store;
mod task;

pub use dead_letter::{DeadLetter, DeadLetterStore};
pub use store::TaskStore;
pub use task::{NewTask, SyncTask, TaskId, Verb};
