use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("invalid analysis request: {0}")]
    Validation(String),
    #[error("analysis pipeline error: {0}")]
    Pipeline(String),
    #[error("analysis persistence error: {0}")]
    Persistence(String),
    #[error("analysis configuration error: {0}")]
    Configuration(String),
    #[error("analysis job not found: {0}")]
    NotFound(String),
    #[error("analysis job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: &'static str,
        to: &'static str,
    },
    #[error("analysis internal error: {0}")]
    Internal(String),
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
