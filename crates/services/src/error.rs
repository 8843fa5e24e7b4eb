use thiserror::Error;
use validator::ValidationErrors;

use crate::dao::base::DaoError;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Validation: {0}")]
    Validation(String),
    #[error("Notification not found")]
    NotFound,
    #[error("Notification already exists: {0}")]
    AlreadyExists(String),
    #[error("Quota enforcement failed: {0}")]
    QuotaExceeded(String),
    #[error("Notification expired")]
    Expired,
    #[error("Engine is shutting down")]
    ShuttingDown,
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type NotificationResult<T> = Result<T, NotificationError>;

impl NotificationError {
    /// Label used for `notifications_errors_total`.
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationError::Validation(_) => "validation",
            NotificationError::NotFound => "not_found",
            NotificationError::AlreadyExists(_) => "already_exists",
            NotificationError::QuotaExceeded(_) => "quota",
            NotificationError::Expired => "expired",
            NotificationError::ShuttingDown => "shutdown",
            NotificationError::Internal(_) => "store",
        }
    }
}

impl From<DaoError> for NotificationError {
    fn from(err: DaoError) -> Self {
        match err {
            DaoError::NotFound => NotificationError::NotFound,
            DaoError::DuplicateKey(msg) => NotificationError::AlreadyExists(msg),
            DaoError::Validation(msg) => NotificationError::Validation(msg),
            DaoError::Mongo(e) => NotificationError::Internal(e.to_string()),
            DaoError::BsonSer(e) => NotificationError::Internal(e.to_string()),
            DaoError::BsonDe(e) => NotificationError::Internal(e.to_string()),
        }
    }
}

impl From<ValidationErrors> for NotificationError {
    fn from(err: ValidationErrors) -> Self {
        NotificationError::Validation(err.to_string())
    }
}

/// Failures while assembling the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error("HTTP client setup failed: {0}")]
    Http(#[from] reqwest::Error),
}
