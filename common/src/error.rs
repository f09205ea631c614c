use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("Deadline exceeded: {0}")]
    Timeout(String),
    #[error("Generation failed: {0}")]
    GenerationFailed(String),
    #[error("Quality persistence error: {0}")]
    QualityPersistence(String),
    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Retryable failures are upstream outages and deadline expiries; input
    /// and integrity errors are surfaced without retry.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::UpstreamUnavailable(_) | AppError::Timeout(_)
        )
    }
}
