use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use analysis_jobs_driver::{ExecutionDriver, JobLog};
use analysis_jobs_history::{HistoryBridge, UpsertOutcome};
use analysis_jobs_protocol::{
    AnalysisError, AnalysisRequest, AnalysisResult, Job, JobId, JobOutcome, JobStatus,
};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

use crate::pool::WorkerPool;
use crate::registry::{JobTable, JobTransition};

pub const MSG_TASK_STARTED: &str = "Task started";
pub const MSG_TASK_SUCCEEDED: &str = "Task completed successfully";
pub const MSG_TASK_FAILED: &str = "Task failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JobRegistryPerfSnapshot {
    pub job_count: usize,
    pub queued_jobs: usize,
    pub running_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub cancelled_jobs: usize,
    pub pool_capacity: usize,
    pub pool_available: usize,
    pub submit_requests_total: u64,
    pub submit_failures_total: u64,
    pub dispatched_total: u64,
    pub completed_total: u64,
    pub failed_total: u64,
    pub stop_requests_total: u64,
    pub cancelled_total: u64,
    pub rejected_transitions_total: u64,
    pub history_failures_total: u64,
}

#[derive(Debug, Default)]
struct JobRegistryPerfCounters {
    submit_requests_total: AtomicU64,
    submit_failures_total: AtomicU64,
    dispatched_total: AtomicU64,
    completed_total: AtomicU64,
    failed_total: AtomicU64,
    stop_requests_total: AtomicU64,
    cancelled_total: AtomicU64,
    rejected_transitions_total: AtomicU64,
    history_failures_total: AtomicU64,
}

impl JobRegistryPerfCounters {
    fn record_transition(&self, transition: JobTransition) {
        match transition.resulting_status {
            JobStatus::Running => {
                self.dispatched_total.fetch_add(1, Ordering::Relaxed);
            }
            JobStatus::Completed => {
                self.completed_total.fetch_add(1, Ordering::Relaxed);
            }
            JobStatus::Failed => {
                self.failed_total.fetch_add(1, Ordering::Relaxed);
            }
            JobStatus::Cancelled => {
                self.cancelled_total.fetch_add(1, Ordering::Relaxed);
            }
            JobStatus::Queued => {}
        }
    }
}

/// Worker and history bookkeeping for one job, kept beside the job table.
struct JobTracker {
    /// Serializes history writes for this job only.
    history_lock: Mutex<()>,
    history_writes: Mutex<Vec<JoinHandle<()>>>,
    finished: watch::Sender<bool>,
}

impl JobTracker {
    fn new() -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            history_lock: Mutex::new(()),
            history_writes: Mutex::new(Vec::new()),
            finished,
        }
    }

    fn lock_writes(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.history_writes
            .lock()
            .expect("history writes lock poisoned")
    }
}

/// Flags the worker as finished when `run_job` returns, whichever way it exits.
struct FinishedSignal(Arc<JobTracker>);

impl Drop for FinishedSignal {
    fn drop(&mut self) {
        self.0.finished.send_replace(true);
    }
}

struct JobRegistryShared {
    table: Mutex<JobTable>,
    trackers: Mutex<HashMap<JobId, Arc<JobTracker>>>,
    driver: ExecutionDriver,
    history: HistoryBridge,
    pool: WorkerPool,
    results_dir: PathBuf,
    perf: JobRegistryPerfCounters,
    runtime: Handle,
}

/// Accepts analysis jobs and runs them on a bounded worker pool.
///
/// The job table lock is only held for map operations; pipeline execution,
/// log writes and history upserts all happen outside it. History upserts run
/// on the blocking pool and are never awaited by a worker.
#[derive(Clone)]
pub struct JobRegistry {
    shared: Arc<JobRegistryShared>,
}

impl JobRegistry {
    /// Builds a registry bound to the current tokio runtime.
    pub fn new(
        driver: ExecutionDriver,
        history: HistoryBridge,
        pool: WorkerPool,
    ) -> AnalysisResult<Self> {
        let runtime = Handle::try_current().map_err(|err| {
            AnalysisError::Configuration(format!(
                "job registry must be created inside a tokio runtime: {err}"
            ))
        })?;
        Ok(Self::with_runtime(driver, history, pool, runtime))
    }

    pub fn with_runtime(
        driver: ExecutionDriver,
        history: HistoryBridge,
        pool: WorkerPool,
        runtime: Handle,
    ) -> Self {
        let results_dir = driver.baseline().results_dir.clone();
        Self {
            shared: Arc::new(JobRegistryShared {
                table: Mutex::new(JobTable::default()),
                trackers: Mutex::new(HashMap::new()),
                driver,
                history,
                pool,
                results_dir,
                perf: JobRegistryPerfCounters::default(),
                runtime,
            }),
        }
    }

    /// Registers a job and schedules it. Never waits on the pipeline.
    ///
    /// Fails synchronously when the request lacks the ticker or date needed to
    /// place the job log.
    pub fn submit(&self, request: AnalysisRequest) -> AnalysisResult<Job> {
        let perf = &self.shared.perf;
        perf.submit_requests_total.fetch_add(1, Ordering::Relaxed);

        let log = match JobLog::prepare(&self.shared.results_dir, &request) {
            Ok(log) => log,
            Err(error) => {
                perf.submit_failures_total.fetch_add(1, Ordering::Relaxed);
                return Err(error);
            }
        };
        let job = Job::queued(JobId::generate(), request, log.path().to_path_buf());
        if let Err(error) = self.shared.lock_table().insert(job.clone()) {
            perf.submit_failures_total.fetch_add(1, Ordering::Relaxed);
            return Err(error);
        }

        self.shared
            .lock_trackers()
            .insert(job.id.clone(), Arc::new(JobTracker::new()));

        tracing::debug!(job_id = %job.id, log_path = %job.log_path.display(), "analysis job queued");
        self.shared
            .runtime
            .spawn(run_job(self.shared.clone(), job.id.clone()));
        Ok(job)
    }

    /// Resolves once the job's worker has returned and every history write
    /// issued for the job has landed.
    ///
    /// A stopped job settles only when its pipeline does, since stopping
    /// never interrupts the worker.
    pub async fn wait_settled(&self, job_id: &JobId) -> AnalysisResult<Job> {
        let tracker = self
            .shared
            .tracker(job_id)
            .ok_or_else(|| AnalysisError::NotFound(job_id.to_string()))?;

        let mut finished = tracker.finished.subscribe();
        if finished.wait_for(|finished| *finished).await.is_err() {
            return Err(AnalysisError::Internal(format!(
                "worker signal for job {job_id} was dropped"
            )));
        }

        loop {
            let writes = std::mem::take(&mut *tracker.lock_writes());
            if writes.is_empty() {
                break;
            }
            for write in writes {
                if let Err(error) = write.await {
                    self.shared
                        .perf
                        .history_failures_total
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(job_id = %job_id, error = %error, "history sync task failed");
                }
            }
        }

        self.get(job_id)
            .ok_or_else(|| AnalysisError::NotFound(job_id.to_string()))
    }

    pub fn get(&self, job_id: &JobId) -> Option<Job> {
        self.shared.snapshot(job_id)
    }

    pub fn list(&self) -> Vec<Job> {
        self.shared.lock_table().list()
    }

    /// Jobs owned by `username` plus jobs submitted without an owner.
    pub fn list_visible_to(&self, username: &str) -> Vec<Job> {
        self.list()
            .into_iter()
            .filter(|job| job.owner.as_deref().map_or(true, |owner| owner == username))
            .collect()
    }

    pub fn log_tail(&self, job_id: &JobId, limit: usize) -> AnalysisResult<Vec<String>> {
        let job = self
            .get(job_id)
            .ok_or_else(|| AnalysisError::NotFound(job_id.to_string()))?;
        JobLog::at(job.log_path).tail(limit)
    }

    /// Relabels a running job as cancelled.
    ///
    /// The worker is not interrupted; its eventual result is rejected by the
    /// state machine. Jobs in any other status are returned unchanged.
    pub fn stop(&self, job_id: &JobId) -> AnalysisResult<Job> {
        self.shared
            .perf
            .stop_requests_total
            .fetch_add(1, Ordering::Relaxed);

        let job = {
            let mut table = self.shared.lock_table();
            let status = table
                .get(job_id)
                .map(|job| job.status)
                .ok_or_else(|| AnalysisError::NotFound(job_id.to_string()))?;
            if status == JobStatus::Running {
                let transition = table.mark_cancelled(job_id)?;
                self.shared.perf.record_transition(transition);
            }
            table
                .get(job_id)
                .cloned()
                .ok_or_else(|| AnalysisError::NotFound(job_id.to_string()))?
        };

        if job.status == JobStatus::Cancelled {
            self.shared.spawn_history_sync(job_id);
        }
        Ok(job)
    }

    pub fn history(&self) -> &HistoryBridge {
        &self.shared.history
    }

    pub fn pool_capacity(&self) -> usize {
        self.shared.pool.capacity()
    }

    pub fn perf_snapshot(&self) -> JobRegistryPerfSnapshot {
        let counts = self.shared.lock_table().status_counts();
        let perf = &self.shared.perf;
        JobRegistryPerfSnapshot {
            job_count: counts.total,
            queued_jobs: counts.queued,
            running_jobs: counts.running,
            completed_jobs: counts.completed,
            failed_jobs: counts.failed,
            cancelled_jobs: counts.cancelled,
            pool_capacity: self.shared.pool.capacity(),
            pool_available: self.shared.pool.available(),
            submit_requests_total: perf.submit_requests_total.load(Ordering::Relaxed),
            submit_failures_total: perf.submit_failures_total.load(Ordering::Relaxed),
            dispatched_total: perf.dispatched_total.load(Ordering::Relaxed),
            completed_total: perf.completed_total.load(Ordering::Relaxed),
            failed_total: perf.failed_total.load(Ordering::Relaxed),
            stop_requests_total: perf.stop_requests_total.load(Ordering::Relaxed),
            cancelled_total: perf.cancelled_total.load(Ordering::Relaxed),
            rejected_transitions_total: perf.rejected_transitions_total.load(Ordering::Relaxed),
            history_failures_total: perf.history_failures_total.load(Ordering::Relaxed),
        }
    }
}

impl JobRegistryShared {
    fn lock_table(&self) -> MutexGuard<'_, JobTable> {
        self.table.lock().expect("job table lock poisoned")
    }

    fn lock_trackers(&self) -> MutexGuard<'_, HashMap<JobId, Arc<JobTracker>>> {
        self.trackers.lock().expect("job trackers lock poisoned")
    }

    fn tracker(&self, job_id: &JobId) -> Option<Arc<JobTracker>> {
        self.lock_trackers().get(job_id).cloned()
    }

    fn snapshot(&self, job_id: &JobId) -> Option<Job> {
        self.lock_table().get(job_id).cloned()
    }

    fn apply_transition(
        &self,
        job_id: &JobId,
        transition: impl FnOnce(&mut JobTable) -> AnalysisResult<JobTransition>,
    ) -> Option<Job> {
        let mut table = self.lock_table();
        match transition(&mut table) {
            Ok(transition) => {
                self.perf.record_transition(transition);
                table.get(job_id).cloned()
            }
            Err(error) => {
                self.perf
                    .rejected_transitions_total
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(job_id = %job_id, error = %error, "job transition rejected");
                None
            }
        }
    }

    /// Queues a history write for `job_id` without waiting on it.
    fn spawn_history_sync(self: &Arc<Self>, job_id: &JobId) {
        if !self.history.is_enabled() {
            return;
        }
        let Some(tracker) = self.tracker(job_id) else {
            return;
        };

        let shared = self.clone();
        let task_tracker = tracker.clone();
        let task_job_id = job_id.clone();
        let write = self.runtime.spawn_blocking(move || {
            shared.sync_history_blocking(&task_tracker, &task_job_id)
        });
        tracker.lock_writes().push(write);
    }

    /// Mirrors the latest snapshot of `job_id`. The snapshot is read under the
    /// job's own history lock, so the last write carries the newest status.
    fn sync_history_blocking(&self, tracker: &JobTracker, job_id: &JobId) {
        let _ordered = tracker
            .history_lock
            .lock()
            .expect("job history lock poisoned");
        let Some(job) = self.snapshot(job_id) else {
            return;
        };
        if self.history.upsert(&job) == UpsertOutcome::Failed {
            self.perf
                .history_failures_total
                .fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn append_log(log: &JobLog, job_id: &JobId, message: &str) {
    if let Err(error) = log.append(message) {
        tracing::warn!(job_id = %job_id, error = %error, "failed to append job log");
    }
}

async fn run_job(shared: Arc<JobRegistryShared>, job_id: JobId) {
    let _finished = shared.tracker(&job_id).map(FinishedSignal);
    shared.spawn_history_sync(&job_id);

    let permit = match shared.pool.acquire().await {
        Ok(permit) => permit,
        Err(error) => {
            tracing::error!(job_id = %job_id, error = %error, "worker pool unavailable");
            return;
        }
    };

    let Some(job) = shared.apply_transition(&job_id, |table| table.mark_running(&job_id)) else {
        return;
    };
    shared.spawn_history_sync(&job_id);

    let log = JobLog::at(job.log_path.clone());
    append_log(&log, &job_id, MSG_TASK_STARTED);

    let result = execute(&shared.driver, job.request, log.clone()).await;
    match result {
        Ok(outcome) => {
            shared.apply_transition(&job_id, |table| table.mark_completed(&job_id, outcome));
            append_log(&log, &job_id, MSG_TASK_SUCCEEDED);
        }
        Err(error) => {
            append_log(&log, &job_id, &format!("{MSG_TASK_FAILED}: {error}"));
            tracing::warn!(job_id = %job_id, error = %error, "analysis job failed");
            let message = error.to_string();
            shared.apply_transition(&job_id, |table| table.mark_failed(&job_id, message));
        }
    }
    drop(permit);

    shared.spawn_history_sync(&job_id);
}

/// Runs the driver on its own task so a panicking pipeline becomes an error.
async fn execute(
    driver: &ExecutionDriver,
    request: AnalysisRequest,
    log: JobLog,
) -> AnalysisResult<JobOutcome> {
    let driver = driver.clone();
    match tokio::spawn(async move { driver.run(&request, &log).await }).await {
        Ok(result) => result,
        Err(join_error) => Err(AnalysisError::Internal(format!(
            "analysis pipeline panicked: {}",
            panic_message(join_error)
        ))),
    }
}

fn panic_message(join_error: JoinError) -> String {
    match join_error.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|message| (*message).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned()),
        Err(join_error) => join_error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use analysis_jobs_protocol::{AnalysisPipeline, PipelineConfig, PipelineFactory};

    use super::*;

    struct UnbuildableFactory;

    impl PipelineFactory for UnbuildableFactory {
        fn build(
            &self,
            _config: &PipelineConfig,
            _analysts: &[String],
        ) -> AnalysisResult<Arc<dyn AnalysisPipeline>> {
            Err(AnalysisError::Pipeline("not available".to_owned()))
        }
    }

    fn driver() -> ExecutionDriver {
        ExecutionDriver::new(PipelineConfig::default(), Arc::new(UnbuildableFactory))
    }

    #[test]
    fn new_outside_runtime_is_a_configuration_error() {
        let result = JobRegistry::new(driver(), HistoryBridge::disabled(), WorkerPool::default());

        assert!(matches!(result, Err(AnalysisError::Configuration(_))));
    }

    #[test]
    fn perf_counters_track_resulting_status() {
        let counters = JobRegistryPerfCounters::default();
        for (previous_status, resulting_status) in [
            (JobStatus::Queued, JobStatus::Running),
            (JobStatus::Running, JobStatus::Completed),
            (JobStatus::Queued, JobStatus::Running),
            (JobStatus::Running, JobStatus::Failed),
        ] {
            counters.record_transition(JobTransition {
                previous_status,
                resulting_status,
            });
        }

        assert_eq!(counters.dispatched_total.load(Ordering::Relaxed), 2);
        assert_eq!(counters.completed_total.load(Ordering::Relaxed), 1);
        assert_eq!(counters.failed_total.load(Ordering::Relaxed), 1);
        assert_eq!(counters.cancelled_total.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn panic_message_carries_the_payload() {
        let borrowed = tokio::spawn(async { panic!("stream adapter broke") })
            .await
            .expect_err("task panics");
        let owned = tokio::spawn(async { panic!("stage {} failed", 3) })
            .await
            .expect_err("task panics");

        assert_eq!(panic_message(borrowed), "stream adapter broke");
        assert_eq!(panic_message(owned), "stage 3 failed");
    }

    #[tokio::test]
    async fn wait_settled_rejects_unknown_jobs() {
        let registry =
            JobRegistry::new(driver(), HistoryBridge::disabled(), WorkerPool::new(1))
                .expect("registry");

        let error = registry
            .wait_settled(&JobId::new("ghost"))
            .await
            .expect_err("unknown job");

        assert_eq!(error, AnalysisError::NotFound("ghost".to_owned()));
    }

    #[tokio::test]
    async fn fresh_registry_reports_idle_pool() {
        let registry =
            JobRegistry::new(driver(), HistoryBridge::disabled(), WorkerPool::new(3))
                .expect("registry");

        let snapshot = registry.perf_snapshot();

        assert_eq!(snapshot.pool_capacity, 3);
        assert_eq!(snapshot.pool_available, 3);
        assert_eq!(snapshot.job_count, 0);
        assert!(registry.list().is_empty());
        assert!(!registry.history().is_enabled());
    }
}
