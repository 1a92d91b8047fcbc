//! flotilla-tasks — run blocking driver calls concurrently and join them.
//!
//! Driver operations (provisioning a VM, converging a node over SSH) are
//! slow and blocking. The [`TaskExecutor`] runs each one on tokio's
//! blocking pool, bounded by a semaphore and a per-task timeout, and
//! joins whole batches: every task runs to completion or timeout, and
//! all failures are reported together in a [`BatchError`].

pub mod error;
pub mod executor;

pub use error::{BatchError, TaskFailure};
pub use executor::{DEFAULT_MAX_PARALLEL, DEFAULT_TIMEOUT, Task, TaskExecutor};
