//! Job registry and bounded worker pool.
//!
//! [`JobRegistry`] owns the in-memory job table, schedules each submitted
//! request onto a [`WorkerPool`] permit, and mirrors every status change to
//! the history store on a blocking task.

pub mod controller;
pub mod pool;
pub mod registry;

pub use controller::{
    JobRegistry, JobRegistryPerfSnapshot, MSG_TASK_FAILED, MSG_TASK_STARTED, MSG_TASK_SUCCEEDED,
};
pub use pool::{WorkerPool, DEFAULT_POOL_CAPACITY};
pub use registry::{JobStatusCounts, JobTable, JobTransition};
