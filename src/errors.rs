use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("BOOTSTRAP_FAILED: {0}")]
    Bootstrap(String),
    #[error("{0}")]
    Query(String),
    #[error("QUERY_REJECTED: {0}")]
    Policy(String),
    #[error("COMPLETION_FAILED: {0}")]
    Completion(String),
    #[error("CONFIG_INVALID: {0}")]
    Config(String),
    #[error("TURN_IN_FLIGHT: {0}")]
    Busy(String),
    #[error("INVALID_INPUT: {0}")]
    Invalid(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("UNAUTHORIZED: {0}")]
    Unauthorized(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

// Engine errors pass through with the engine's own text.
impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Query(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        Self::Completion(value.to_string())
    }
}

impl From<parquet::errors::ParquetError> for AppError {
    fn from(value: parquet::errors::ParquetError) -> Self {
        Self::Bootstrap(value.to_string())
    }
}

impl From<arrow_schema::ArrowError> for AppError {
    fn from(value: arrow_schema::ArrowError) -> Self {
        Self::Bootstrap(value.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Internal(format!("worker task failed: {}", value))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
