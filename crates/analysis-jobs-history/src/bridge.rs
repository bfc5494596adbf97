use std::sync::Arc;

use analysis_jobs_protocol::Job;

use crate::error::HistoryError;
use crate::record::{HistoryRecord, UserJobCount};
use crate::store::HistoryStore;

pub const MAX_HISTORY_LIST_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Disabled,
    /// Job has no owner, ticker or date and is not mirrored.
    Skipped,
    Inserted,
    Updated,
    Failed,
}

/// Best-effort mirror of registry jobs into a [`HistoryStore`].
///
/// `upsert` never returns an error; failures are logged and reported as
/// [`UpsertOutcome::Failed`].
#[derive(Clone, Default)]
pub struct HistoryBridge {
    store: Option<Arc<dyn HistoryStore>>,
}

impl HistoryBridge {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store: Some(store) }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn upsert(&self, job: &Job) -> UpsertOutcome {
        let Some(store) = self.store.as_deref() else {
            return UpsertOutcome::Disabled;
        };

        match Self::try_upsert(store, job) {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(
                    job_id = %job.id,
                    status = job.status.as_str(),
                    error = %error,
                    "history upsert failed"
                );
                UpsertOutcome::Failed
            }
        }
    }

    fn try_upsert(store: &dyn HistoryStore, job: &Job) -> Result<UpsertOutcome, HistoryError> {
        match store.find_by_job_id(job.id.as_str())? {
            Some(mut existing) => {
                existing.refresh_from(job)?;
                store.update(&existing)?;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                let Some(record) = HistoryRecord::from_job(job)? else {
                    return Ok(UpsertOutcome::Skipped);
                };
                store.insert(&record)?;
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    /// Rows owned by `username`, newest first. `limit` is clamped to `1..=200`.
    pub fn list_for_username(
        &self,
        username: &str,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, HistoryError> {
        let Some(store) = self.store.as_deref() else {
            return Ok(vec![]);
        };
        store.list_for_username(username, limit.clamp(1, MAX_HISTORY_LIST_LIMIT))
    }

    pub fn count_by_username(&self) -> Result<Vec<UserJobCount>, HistoryError> {
        let Some(store) = self.store.as_deref() else {
            return Ok(vec![]);
        };
        store.count_by_username()
    }
}
