use std::sync::Arc;

use analysis_jobs_protocol::{AnalysisError, AnalysisResult};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub const DEFAULT_POOL_CAPACITY: usize = 2;

/// Bounds how many pipelines execute at once.
///
/// Workers wait on [`WorkerPool::acquire`] and hold the permit for the whole
/// run; waiting workers form the unbounded submission queue.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn acquire(&self) -> AnalysisResult<OwnedSemaphorePermit> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AnalysisError::Internal("worker pool is closed".to_owned()))
    }
}
