use std::collections::hash_map::Entry;
use std::collections::HashMap;

use analysis_jobs_protocol::{AnalysisError, AnalysisResult, Job, JobId, JobOutcome, JobStatus};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobTransition {
    pub previous_status: JobStatus,
    pub resulting_status: JobStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JobStatusCounts {
    pub total: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// In-memory job records and their state machine.
///
/// Every transition is checked against [`JobStatus::can_transition_to`], so no
/// record ever leaves a terminal status.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: HashMap<JobId, Job>,
}

impl JobTable {
    pub fn insert(&mut self, job: Job) -> AnalysisResult<()> {
        match self.jobs.entry(job.id.clone()) {
            Entry::Occupied(_) => Err(AnalysisError::Internal(format!(
                "job id already registered: {}",
                job.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(job);
                Ok(())
            }
        }
    }

    pub fn get(&self, job_id: &JobId) -> Option<&Job> {
        self.jobs.get(job_id)
    }

    /// Snapshot of all jobs, oldest first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs = self.jobs.values().cloned().collect::<Vec<_>>();
        jobs.sort_by(|left, right| {
            left.created_at
                .cmp(&right.created_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        jobs
    }

    pub fn mark_running(&mut self, job_id: &JobId) -> AnalysisResult<JobTransition> {
        self.transition(job_id, JobStatus::Running, |_| {})
    }

    pub fn mark_completed(
        &mut self,
        job_id: &JobId,
        outcome: JobOutcome,
    ) -> AnalysisResult<JobTransition> {
        self.transition(job_id, JobStatus::Completed, |job| {
            job.log_path = outcome.log_path.clone();
            job.result = Some(outcome);
            job.error = None;
        })
    }

    pub fn mark_failed(&mut self, job_id: &JobId, error: String) -> AnalysisResult<JobTransition> {
        self.transition(job_id, JobStatus::Failed, |job| {
            job.error = Some(error);
        })
    }

    pub fn mark_cancelled(&mut self, job_id: &JobId) -> AnalysisResult<JobTransition> {
        self.transition(job_id, JobStatus::Cancelled, |_| {})
    }

    pub fn status_counts(&self) -> JobStatusCounts {
        let mut counts = JobStatusCounts {
            total: self.jobs.len(),
            ..JobStatusCounts::default()
        };
        for job in self.jobs.values() {
            match job.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn transition(
        &mut self,
        job_id: &JobId,
        next: JobStatus,
        apply: impl FnOnce(&mut Job),
    ) -> AnalysisResult<JobTransition> {
        let job = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| AnalysisError::NotFound(job_id.to_string()))?;
        let previous = job.status;
        if !previous.can_transition_to(next) {
            return Err(AnalysisError::InvalidTransition {
                job_id: job_id.to_string(),
                from: previous.as_str(),
                to: next.as_str(),
            });
        }

        job.status = next;
        job.updated_at = OffsetDateTime::now_utc();
        apply(job);
        Ok(JobTransition {
            previous_status: previous,
            resulting_status: next,
        })
    }
}
