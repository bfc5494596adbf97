//! Execution driver for a single analysis job.
//!
//! Validates the request, merges overrides over the baseline pipeline
//! config, consumes the pipeline delta stream while logging stage progress,
//! and persists report artifacts next to the job log.

pub mod artifacts;
pub mod driver;
pub mod log;
pub mod overrides;

pub use artifacts::{ArtifactDirs, FinalState, REPORTS_DIR_NAME, SUMMARY_FILE_NAME};
pub use driver::{ExecutionDriver, StageProgress};
pub use log::{JobLog, LOG_FILE_NAME};
pub use overrides::merge_overrides;
