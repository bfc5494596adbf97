//! Shared analysis job protocol.
//!
//! Types exchanged between the job registry, the execution driver, the
//! history store and pipeline adapters.

pub mod clock;
pub mod error;
pub mod ids;
pub mod job;
pub mod pipeline;
pub mod request;
pub mod stage;

pub use error::{AnalysisError, AnalysisResult};
pub use ids::JobId;
pub use job::{AnalysisSummary, Job, JobOutcome, JobStatus};
pub use pipeline::{
    AnalysisPipeline, PipelineConfig, PipelineDeltaStream, PipelineDeltaSubscription,
    PipelineFactory, PipelineState,
};
pub use request::{AnalysisRequest, AnalysisSelections};
pub use stage::{PipelineDelta, StageKey};
