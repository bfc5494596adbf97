use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("history persistence error: {0}")]
    Persistence(String),
    #[error("history serialization error: {0}")]
    Serialization(String),
}
