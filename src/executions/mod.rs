//! Execution submission, caching and status polling.

mod store;
mod submitter;
mod watch;

pub use store::ExecutionStore;
pub use submitter::ExecutionSubmitter;
pub use watch::{watch_execution, WatchParams};
