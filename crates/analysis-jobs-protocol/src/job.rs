use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::ids::JobId;
use crate::request::AnalysisRequest;
use crate::stage::StageKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Queued,
    Running,
    Completed,
    Failed,
    /// Reported status after a stop request. The worker keeps running.
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
        )
    }
}

/// Aggregate document written as `summary.json` for every completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub ticker: String,
    pub analysis_date: String,
    pub market: String,
    pub reports: BTreeMap<StageKey, Value>,
    pub decision: String,
    pub generated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub state: BTreeMap<StageKey, Option<Value>>,
    pub result_dir: PathBuf,
    pub summary: AnalysisSummary,
    pub log_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub request: AnalysisRequest,
    pub status: JobStatus,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub result: Option<JobOutcome>,
    pub error: Option<String>,
    pub log_path: PathBuf,
    pub owner: Option<String>,
}

impl Job {
    pub fn queued(id: JobId, request: AnalysisRequest, log_path: PathBuf) -> Self {
        let now = OffsetDateTime::now_utc();
        let owner = request.owner().map(ToOwned::to_owned);
        Self {
            id,
            request,
            status: JobStatus::Queued,
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
            log_path,
            owner,
        }
    }

    pub fn decision(&self) -> Option<&str> {
        self.result
            .as_ref()
            .map(|outcome| outcome.summary.decision.as_str())
            .filter(|decision| !decision.is_empty())
    }

    pub fn result_dir(&self) -> Option<&PathBuf> {
        self.result.as_ref().map(|outcome| &outcome.result_dir)
    }
}
