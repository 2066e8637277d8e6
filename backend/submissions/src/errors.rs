//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("State check failed: {0}")]
    StateCheckFailed(String),

    #[error("Payment verification timed out")]
    PaymentTimeout,

    #[error("Payment cancelled before checkout completed")]
    PaymentCancelled,

    #[error("Payment verification failed: {0}")]
    PaymentVerificationFailed(String),

    #[error("Invalid file: {0}")]
    InvalidFile(String),

    #[error("Upload failed (retryable): {0}")]
    UploadRetryable(String),

    #[error("Upload rejected by storage: {0}")]
    UploadUnauthorized(String),

    #[error("Submission id allocation failed: {0}")]
    AllocationFailed(String),

    #[error("Submission already exists: {0}")]
    DuplicateSubmission(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
