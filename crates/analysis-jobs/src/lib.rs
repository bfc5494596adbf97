//! Analysis job orchestration.
//!
//! Re-exports the workspace crates under one name: submit an
//! [`AnalysisRequest`] to a [`JobRegistry`], which runs it through an
//! [`ExecutionDriver`] on a bounded [`WorkerPool`] and mirrors each status
//! change through a [`HistoryBridge`].

pub use analysis_jobs_config as config;
pub use analysis_jobs_driver as driver;
pub use analysis_jobs_history as history;
pub use analysis_jobs_protocol as protocol;
pub use analysis_jobs_registry as registry;
pub use pipeline_command as command;

pub use analysis_jobs_driver::{ExecutionDriver, JobLog};
pub use analysis_jobs_history::{HistoryBridge, HistoryStore, SqliteHistoryStore};
pub use analysis_jobs_protocol::{
    AnalysisError, AnalysisRequest, AnalysisResult, Job, JobId, JobStatus, PipelineConfig,
};
pub use analysis_jobs_registry::{JobRegistry, WorkerPool};
pub use pipeline_command::CommandPipelineFactory;
