use analysis_jobs_protocol::clock::format_rfc3339;
use analysis_jobs_protocol::request::non_blank;
use analysis_jobs_protocol::Job;
use serde::{Deserialize, Serialize};

use crate::error::HistoryError;

/// Durable mirror of one job, keyed by job id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub job_id: String,
    pub username: String,
    pub ticker: String,
    pub analysis_date: String,
    pub status: String,
    pub decision: Option<String>,
    pub result_dir: Option<String>,
    pub summary_json: Option<String>,
    pub log_path: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserJobCount {
    pub username: String,
    pub count: u64,
}

impl HistoryRecord {
    /// Fresh row for `job`, or `None` when the job lacks an owner, ticker or date.
    pub fn from_job(job: &Job) -> Result<Option<Self>, HistoryError> {
        let (Some(username), Some(ticker), Some(analysis_date)) = (
            non_blank(job.owner.as_deref()),
            non_blank(job.request.ticker.as_deref()),
            non_blank(job.request.analysis_date.as_deref()),
        ) else {
            return Ok(None);
        };

        let mut record = Self {
            job_id: job.id.as_str().to_owned(),
            username: username.to_owned(),
            ticker: ticker.to_owned(),
            analysis_date: analysis_date.to_owned(),
            status: job.status.as_str().to_owned(),
            decision: None,
            result_dir: None,
            summary_json: None,
            log_path: None,
            error: None,
            created_at: format_rfc3339(job.created_at),
            updated_at: format_rfc3339(job.updated_at),
            completed_at: None,
        };
        record.refresh_from(job)?;
        Ok(Some(record))
    }

    /// Copies the mutable job fields onto an existing row.
    ///
    /// Outcome columns only change when the job carries a result, and the
    /// completion timestamp only moves on a terminal status.
    pub fn refresh_from(&mut self, job: &Job) -> Result<(), HistoryError> {
        self.status = job.status.as_str().to_owned();
        self.updated_at = format_rfc3339(job.updated_at);
        self.error = job.error.clone();
        self.log_path = Some(job.log_path.to_string_lossy().to_string());

        if let Some(outcome) = &job.result {
            self.decision = Some(outcome.summary.decision.clone());
            self.result_dir = Some(outcome.result_dir.to_string_lossy().to_string());
            self.summary_json = Some(
                serde_json::to_string(&outcome.summary)
                    .map_err(|err| HistoryError::Serialization(err.to_string()))?,
            );
        }
        if job.status.is_terminal() {
            self.completed_at = Some(self.updated_at.clone());
        }
        Ok(())
    }
}
